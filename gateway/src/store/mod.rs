pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{ApiKey, NewTransaction, Transaction};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("api key {0} not found")]
    KeyNotFound(i64),

    #[error("balance of api key {0} would leave the ledger's range")]
    BalanceOutOfRange(i64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result of a conditional settlement.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    /// Balance debited and the transaction row written, atomically.
    Settled {
        key: ApiKey,
        transaction: Transaction,
    },
    /// Balance was below the cost at the moment of the debit; nothing was written.
    Insufficient { balance: Decimal },
}

/// Persistence for API keys and the usage log.
/// Implementations: PgStore (Postgres via sqlx), MemoryStore (process-local).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Issue a new key for `user_id` with a starting balance.
    async fn create_key(
        &self,
        user_id: &str,
        name: &str,
        token: &str,
        balance: Decimal,
    ) -> LedgerResult<ApiKey>;

    /// Live key by its secret token.
    async fn get_by_token(&self, token: &str) -> LedgerResult<Option<ApiKey>>;

    /// Live key by id.
    async fn get_by_id(&self, id: i64) -> LedgerResult<Option<ApiKey>>;

    /// Live keys owned by `user_id`, newest first.
    async fn list_by_user(&self, user_id: &str) -> LedgerResult<Vec<ApiKey>>;

    /// Revoke a key. Returns false if no live key had that id.
    async fn delete(&self, id: i64) -> LedgerResult<bool>;

    /// Atomically apply `balance += amount` and return the updated key.
    async fn debit(&self, id: i64, amount: Decimal) -> LedgerResult<ApiKey>;

    /// Append one row to the usage log.
    async fn record(&self, tx: NewTransaction) -> LedgerResult<Transaction>;

    /// Debit `cost` only if the balance covers it, and log a successful
    /// `operation` in the same atomic unit.
    async fn charge(
        &self,
        id: i64,
        cost: Decimal,
        operation: &str,
        input_summary: &str,
    ) -> LedgerResult<ChargeOutcome>;

    /// Usage log across all of `user_id`'s keys (revoked included), newest first.
    async fn list_transactions(&self, user_id: &str) -> LedgerResult<Vec<Transaction>>;

    /// Cheap liveness probe of the backing storage.
    async fn ping(&self) -> LedgerResult<()>;
}
