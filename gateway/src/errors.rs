use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;

use crate::store::LedgerError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing payment token")]
    MissingToken { payment_url: String, min_cost: Decimal },

    #[error("invalid api token")]
    InvalidToken,

    #[error("insufficient balance: {current_balance} < {min_cost}")]
    InsufficientBalance {
        payment_url: String,
        min_cost: Decimal,
        current_balance: Decimal,
    },

    #[error("validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: field.map(String::from),
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::MissingToken { .. } => "missing_token",
            AppError::InvalidToken => "invalid_token",
            AppError::InsufficientBalance { .. } => "insufficient_balance",
            AppError::Validation { .. } => "validation_error",
            AppError::Evaluation(_) => "evaluation_error",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Ledger(LedgerError::KeyNotFound(_)) => "not_found",
            AppError::Ledger(LedgerError::BalanceOutOfRange(_)) => "validation_error",
            AppError::Ledger(LedgerError::Database(_)) | AppError::Internal(_) => "internal",
        }
    }
}

fn payment_required(message: &str, payment_url: &str, min_cost: Decimal) -> Value {
    json!({
        "error": "Payment Required",
        "message": message,
        "paymentUrl": payment_url,
        "minCost": min_cost.to_f64().unwrap_or_default(),
    })
}

fn message(msg: &str) -> Value {
    json!({ "message": msg })
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::MissingToken {
                payment_url,
                min_cost,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                payment_required("Missing X-Payment-Token header.", payment_url, *min_cost),
            ),
            AppError::InsufficientBalance {
                payment_url,
                min_cost,
                current_balance,
            } => {
                let mut body = payment_required("Insufficient balance.", payment_url, *min_cost);
                body["currentBalance"] = json!(current_balance.to_f64().unwrap_or_default());
                (StatusCode::PAYMENT_REQUIRED, body)
            }
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, message("Invalid API token")),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, message("Unauthorized")),
            AppError::Validation { message: msg, field } => {
                let mut body = message(msg);
                if let Some(field) = field {
                    body["field"] = json!(field);
                }
                (StatusCode::BAD_REQUEST, body)
            }
            AppError::Evaluation(msg) => (StatusCode::BAD_REQUEST, message(msg)),
            AppError::Forbidden => (StatusCode::FORBIDDEN, message("Forbidden")),
            AppError::NotFound(what) => {
                (StatusCode::NOT_FOUND, message(&format!("{} not found", what)))
            }
            AppError::Ledger(LedgerError::KeyNotFound(_)) => {
                (StatusCode::NOT_FOUND, message("Key not found"))
            }
            AppError::Ledger(LedgerError::BalanceOutOfRange(_)) => (
                StatusCode::BAD_REQUEST,
                json!({ "message": "Invalid amount", "field": "amount" }),
            ),
            AppError::Ledger(LedgerError::Database(e)) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    message("Internal server error"),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    message("Internal server error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_is_402_without_balance() {
        let resp = AppError::MissingToken {
            payment_url: "http://localhost/".into(),
            min_cost: Decimal::from_str("0.01").unwrap(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
        let body = body_json(resp).await;
        assert_eq!(body["error"], "Payment Required");
        assert_eq!(body["paymentUrl"], "http://localhost/");
        assert_eq!(body["minCost"], 0.01);
        assert!(body.get("currentBalance").is_none());
    }

    #[tokio::test]
    async fn test_insufficient_balance_reports_current_balance() {
        let resp = AppError::InsufficientBalance {
            payment_url: "https://pay.example/".into(),
            min_cost: Decimal::from_str("0.01").unwrap(),
            current_balance: Decimal::from_str("0.0050").unwrap(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
        let body = body_json(resp).await;
        assert_eq!(body["message"], "Insufficient balance.");
        assert_eq!(body["currentBalance"], 0.005);
    }

    #[tokio::test]
    async fn test_validation_error_carries_field() {
        let resp = AppError::validation("Expression is required", Some("expression")).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["message"], "Expression is required");
        assert_eq!(body["field"], "expression");
    }

    #[tokio::test]
    async fn test_validation_error_without_field_omits_it() {
        let body = body_json(AppError::validation("Invalid amount", None).into_response()).await;
        assert!(body.get("field").is_none());
    }

    #[tokio::test]
    async fn test_storage_failures_do_not_leak_details() {
        let err = AppError::Ledger(LedgerError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(err.kind(), "internal");
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(resp).await["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_balance_out_of_range_is_a_client_error() {
        let err = AppError::Ledger(LedgerError::BalanceOutOfRange(1));
        assert_eq!(err.kind(), "validation_error");
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["message"], "Invalid amount");
        assert_eq!(body["field"], "amount");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::InvalidToken.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("Key").into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Ledger(LedgerError::KeyNotFound(3)).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Evaluation("Invalid mathematical expression".into())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
    }
}
