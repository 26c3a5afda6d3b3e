//! Pay-per-request compute gateway.
//!
//! A solve goes through token resolution, a balance gate, input screening,
//! evaluation and settlement, in that order. Only settled requests are
//! debited and logged.

pub mod evaluator;
pub mod validate;

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::api_key::to_ledger_scale;
use crate::models::transaction::summarize_input;
use crate::models::ApiKey;
use crate::store::{ChargeOutcome, LedgerStore};
use evaluator::{EvalError, Evaluator};

/// Operation name written to the usage log for a solve.
pub const SOLVE_OPERATION: &str = "solve";

#[derive(Debug, Deserialize)]
pub struct SolveRequest {
    pub expression: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveResponse {
    pub result: serde_json::Value,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub remaining_balance: Decimal,
}

#[derive(Clone)]
pub struct ComputeGateway {
    store: Arc<dyn LedgerStore>,
    evaluator: Arc<dyn Evaluator>,
    unit_price: Decimal,
    max_expression_len: usize,
}

impl ComputeGateway {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        evaluator: Arc<dyn Evaluator>,
        unit_price: Decimal,
        max_expression_len: usize,
    ) -> Self {
        Self {
            store,
            evaluator,
            unit_price: to_ledger_scale(unit_price),
            max_expression_len,
        }
    }

    /// Steps 1 and 2: resolve the presented token and check it can pay.
    #[tracing::instrument(skip_all)]
    pub async fn authorize(
        &self,
        token: Option<&str>,
        payment_url: &str,
    ) -> Result<ApiKey, AppError> {
        let token = match token.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => {
                return Err(AppError::MissingToken {
                    payment_url: payment_url.to_string(),
                    min_cost: self.unit_price,
                })
            }
        };

        let key = self
            .store
            .get_by_token(token)
            .await?
            .ok_or(AppError::InvalidToken)?;

        if !key.can_afford(self.unit_price) {
            tracing::info!(key_id = key.id, balance = %key.balance, "solve refused: insufficient balance");
            return Err(AppError::InsufficientBalance {
                payment_url: payment_url.to_string(),
                min_cost: self.unit_price,
                current_balance: key.balance,
            });
        }

        Ok(key)
    }

    /// Steps 3 to 6: screen, evaluate, settle.
    #[tracing::instrument(skip_all, fields(key_id = key.id))]
    pub async fn execute(
        &self,
        key: &ApiKey,
        expression: &str,
        payment_url: &str,
    ) -> Result<SolveResponse, AppError> {
        validate::check_expression(expression, self.max_expression_len)
            .map_err(|r| AppError::validation(r.message(), Some("expression")))?;

        let result = match self.evaluator.evaluate(expression) {
            Ok(scalar) => scalar.to_json(),
            Err(EvalError::NonScalar) => {
                return Err(AppError::Evaluation("Invalid result type".into()))
            }
            Err(EvalError::Invalid(reason)) => {
                tracing::debug!(%reason, "evaluator rejected expression");
                return Err(AppError::Evaluation(
                    "Invalid mathematical expression".into(),
                ));
            }
        };

        let summary = summarize_input(expression);
        match self
            .store
            .charge(key.id, self.unit_price, SOLVE_OPERATION, &summary)
            .await?
        {
            ChargeOutcome::Settled { key, transaction } => {
                tracing::info!(
                    transaction_id = transaction.id,
                    cost = %transaction.cost,
                    remaining = %key.balance,
                    "solve settled"
                );
                Ok(SolveResponse {
                    result,
                    cost: self.unit_price,
                    remaining_balance: key.balance,
                })
            }
            // Lost a race with a concurrent request on the same key.
            ChargeOutcome::Insufficient { balance } => {
                tracing::warn!(balance = %balance, "solve refused at settlement: insufficient balance");
                Err(AppError::InsufficientBalance {
                    payment_url: payment_url.to_string(),
                    min_cost: self.unit_price,
                    current_balance: balance,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use evaluator::{EvalexprEvaluator, Scalar};
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PAY: &str = "http://localhost/";

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    /// Counts calls so tests can assert the evaluator was never reached.
    #[derive(Default)]
    struct CountingEvaluator {
        calls: AtomicUsize,
    }

    impl Evaluator for CountingEvaluator {
        fn evaluate(&self, expression: &str) -> Result<Scalar, EvalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            EvalexprEvaluator.evaluate(expression)
        }
    }

    async fn setup(balance: &str) -> (Arc<MemoryStore>, Arc<CountingEvaluator>, ComputeGateway, ApiKey) {
        let store = Arc::new(MemoryStore::new());
        let evaluator = Arc::new(CountingEvaluator::default());
        let key = store
            .create_key("user-1", "test", "sk_live", dec(balance))
            .await
            .unwrap();
        let gateway = ComputeGateway::new(store.clone(), evaluator.clone(), dec("0.01"), 1000);
        (store, evaluator, gateway, key)
    }

    #[tokio::test]
    async fn test_missing_and_blank_tokens() {
        let (_, _, gateway, _) = setup("1").await;
        for token in [None, Some(""), Some("   ")] {
            let err = gateway.authorize(token, PAY).await.unwrap_err();
            assert!(matches!(err, AppError::MissingToken { .. }));
        }
    }

    #[tokio::test]
    async fn test_unknown_token_is_invalid() {
        let (_, _, gateway, _) = setup("1").await;
        let err = gateway.authorize(Some("sk_nope"), PAY).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
    }

    #[tokio::test]
    async fn test_balance_gate() {
        let (_, _, gateway, _) = setup("0.0099").await;
        let err = gateway.authorize(Some("sk_live"), PAY).await.unwrap_err();
        match err {
            AppError::InsufficientBalance {
                current_balance,
                min_cost,
                ..
            } => {
                assert_eq!(current_balance, dec("0.0099"));
                assert_eq!(min_cost, dec("0.01"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exact_balance_passes_gate() {
        let (_, _, gateway, _) = setup("0.01").await;
        assert!(gateway.authorize(Some("sk_live"), PAY).await.is_ok());
    }

    #[tokio::test]
    async fn test_successful_solve_debits_once() {
        let (store, _, gateway, key) = setup("1").await;
        let key = gateway.authorize(Some("sk_live"), PAY).await.unwrap();
        let resp = gateway.execute(&key, "6 * 7", PAY).await.unwrap();
        assert_eq!(resp.result, serde_json::json!(42));
        assert_eq!(resp.cost, dec("0.01"));
        assert_eq!(resp.remaining_balance.to_string(), "0.9900");

        let history = store.list_transactions("user-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].operation, SOLVE_OPERATION);
        assert_eq!(history[0].cost.to_string(), "0.0100");
    }

    #[tokio::test]
    async fn test_blocked_expression_never_evaluated_or_charged() {
        let (store, evaluator, gateway, key) = setup("1").await;
        let err = gateway.execute(&key, "import(x)", PAY).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.get_by_id(key.id).await.unwrap().unwrap().balance, dec("1"));
        assert!(store.list_transactions("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evaluation_failures_are_not_metered() {
        let (store, _, gateway, key) = setup("1").await;
        let err = gateway.execute(&key, "1 +", PAY).await.unwrap_err();
        assert!(matches!(err, AppError::Evaluation(ref m) if m == "Invalid mathematical expression"));
        let err = gateway.execute(&key, "1, 2", PAY).await.unwrap_err();
        assert!(matches!(err, AppError::Evaluation(ref m) if m == "Invalid result type"));
        assert!(store.list_transactions("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_long_expression_logged_as_summary() {
        let (store, _, gateway, key) = setup("1").await;
        let expr = vec!["1"; 40].join(" + ");
        gateway.execute(&key, &expr, PAY).await.unwrap();
        let history = store.list_transactions("user-1").await.unwrap();
        let logged = history[0].input.as_deref().unwrap();
        assert!(logged.ends_with("..."));
        assert_eq!(logged.chars().count(), 53);
    }

    #[tokio::test]
    async fn test_settlement_race_is_reported_as_insufficient() {
        let (store, _, gateway, _) = setup("0.01").await;
        // Both requests pass the gate before either settles.
        let first = gateway.authorize(Some("sk_live"), PAY).await.unwrap();
        let second = gateway.authorize(Some("sk_live"), PAY).await.unwrap();
        gateway.execute(&first, "1 + 1", PAY).await.unwrap();
        let err = gateway.execute(&second, "1 + 1", PAY).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance { .. }));
        let key = store.get_by_id(first.id).await.unwrap().unwrap();
        assert_eq!(key.balance, Decimal::ZERO);
        assert_eq!(store.list_transactions("user-1").await.unwrap().len(), 1);
    }

    #[test]
    fn test_solve_response_uses_numbers() {
        let resp = SolveResponse {
            result: serde_json::json!(4),
            cost: dec("0.0100"),
            remaining_balance: dec("0.9900"),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["cost"], 0.01);
        assert_eq!(json["remainingBalance"], 0.99);
    }
}
