//! Process-local ledger for development and tests.
//!
//! A single async mutex guards all state, so every operation (including
//! `charge`) is atomic with respect to every other one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use super::{ChargeOutcome, LedgerError, LedgerResult, LedgerStore};
use crate::models::api_key::{to_ledger_scale, within_balance_range};
use crate::models::{ApiKey, NewTransaction, Transaction};

#[derive(Default)]
struct Inner {
    keys: BTreeMap<i64, ApiKey>,
    transactions: Vec<Transaction>,
    next_key_id: i64,
    next_tx_id: i64,
}

impl Inner {
    fn live_key_mut(&mut self, id: i64) -> Option<&mut ApiKey> {
        self.keys.get_mut(&id).filter(|k| k.active)
    }

    fn append(&mut self, tx: NewTransaction) -> Transaction {
        self.next_tx_id += 1;
        let row = Transaction {
            id: self.next_tx_id,
            api_key_id: tx.api_key_id,
            operation: tx.operation,
            cost: to_ledger_scale(tx.cost),
            input: tx.input,
            success: tx.success,
            created_at: Utc::now(),
        };
        self.transactions.push(row.clone());
        row
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_key(
        &self,
        user_id: &str,
        name: &str,
        token: &str,
        balance: Decimal,
    ) -> LedgerResult<ApiKey> {
        let mut inner = self.inner.lock().await;
        inner.next_key_id += 1;
        let key = ApiKey {
            id: inner.next_key_id,
            user_id: user_id.to_string(),
            token: token.to_string(),
            name: name.to_string(),
            balance: to_ledger_scale(balance),
            active: true,
            created_at: Utc::now(),
        };
        inner.keys.insert(key.id, key.clone());
        Ok(key)
    }

    async fn get_by_token(&self, token: &str) -> LedgerResult<Option<ApiKey>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .keys
            .values()
            .find(|k| k.active && k.token == token)
            .cloned())
    }

    async fn get_by_id(&self, id: i64) -> LedgerResult<Option<ApiKey>> {
        let inner = self.inner.lock().await;
        Ok(inner.keys.get(&id).filter(|k| k.active).cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> LedgerResult<Vec<ApiKey>> {
        let inner = self.inner.lock().await;
        // Ids are monotonic, so reverse id order is newest first.
        Ok(inner
            .keys
            .values()
            .rev()
            .filter(|k| k.active && k.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: i64) -> LedgerResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.live_key_mut(id) {
            Some(key) => {
                key.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn debit(&self, id: i64, amount: Decimal) -> LedgerResult<ApiKey> {
        let mut inner = self.inner.lock().await;
        let key = inner.live_key_mut(id).ok_or(LedgerError::KeyNotFound(id))?;
        let balance = key
            .balance
            .checked_add(amount)
            .map(to_ledger_scale)
            .filter(|b| within_balance_range(*b))
            .ok_or(LedgerError::BalanceOutOfRange(id))?;
        key.balance = balance;
        Ok(key.clone())
    }

    async fn record(&self, tx: NewTransaction) -> LedgerResult<Transaction> {
        let mut inner = self.inner.lock().await;
        if !inner.keys.contains_key(&tx.api_key_id) {
            return Err(LedgerError::KeyNotFound(tx.api_key_id));
        }
        Ok(inner.append(tx))
    }

    async fn charge(
        &self,
        id: i64,
        cost: Decimal,
        operation: &str,
        input_summary: &str,
    ) -> LedgerResult<ChargeOutcome> {
        let mut inner = self.inner.lock().await;
        let key = inner.live_key_mut(id).ok_or(LedgerError::KeyNotFound(id))?;
        if key.balance < cost {
            return Ok(ChargeOutcome::Insufficient {
                balance: key.balance,
            });
        }
        key.balance = key
            .balance
            .checked_sub(cost)
            .map(to_ledger_scale)
            .ok_or(LedgerError::BalanceOutOfRange(id))?;
        let key = key.clone();
        let transaction = inner.append(NewTransaction {
            api_key_id: id,
            operation: operation.to_string(),
            cost,
            input: Some(input_summary.to_string()),
            success: true,
        });
        Ok(ChargeOutcome::Settled { key, transaction })
    }

    async fn list_transactions(&self, user_id: &str) -> LedgerResult<Vec<Transaction>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transactions
            .iter()
            .rev()
            .filter(|t| {
                inner
                    .keys
                    .get(&t.api_key_id)
                    .is_some_and(|k| k.user_id == user_id)
            })
            .cloned()
            .collect())
    }

    async fn ping(&self) -> LedgerResult<()> {
        Ok(())
    }
}
