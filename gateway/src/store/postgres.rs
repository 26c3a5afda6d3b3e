use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{ChargeOutcome, LedgerError, LedgerResult, LedgerStore};
use crate::models::{ApiKey, NewTransaction, Transaction};

const KEY_COLUMNS: &str = "id, user_id, token, name, balance, active, created_at";
const TX_COLUMNS: &str = "id, api_key_id, operation, cost, input, success, created_at";

/// SQLSTATE for a value that does not fit its NUMERIC column.
const NUMERIC_OUT_OF_RANGE: &str = "22003";

fn is_numeric_overflow(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some(NUMERIC_OUT_OF_RANGE))
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    // -- API Keys --

    async fn create_key(
        &self,
        user_id: &str,
        name: &str,
        token: &str,
        balance: Decimal,
    ) -> LedgerResult<ApiKey> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            "INSERT INTO api_keys (user_id, token, name, balance) VALUES ($1, $2, $3, $4) RETURNING {KEY_COLUMNS}"
        ))
        .bind(user_id)
        .bind(token)
        .bind(name)
        .bind(balance)
        .fetch_one(&self.pool)
        .await?;
        Ok(key)
    }

    async fn get_by_token(&self, token: &str) -> LedgerResult<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys WHERE token = $1 AND active = true"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    async fn get_by_id(&self, id: i64) -> LedgerResult<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys WHERE id = $1 AND active = true"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    async fn list_by_user(&self, user_id: &str) -> LedgerResult<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys WHERE user_id = $1 AND active = true ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn delete(&self, id: i64) -> LedgerResult<bool> {
        // Soft delete: transactions keep referencing the row.
        let result = sqlx::query("UPDATE api_keys SET active = false WHERE id = $1 AND active = true")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Ledger --

    async fn debit(&self, id: i64, amount: Decimal) -> LedgerResult<ApiKey> {
        sqlx::query_as::<_, ApiKey>(&format!(
            "UPDATE api_keys SET balance = balance + $2 WHERE id = $1 AND active = true RETURNING {KEY_COLUMNS}"
        ))
        .bind(id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_numeric_overflow(&e) {
                LedgerError::BalanceOutOfRange(id)
            } else {
                LedgerError::Database(e)
            }
        })?
        .ok_or(LedgerError::KeyNotFound(id))
    }

    async fn record(&self, tx: NewTransaction) -> LedgerResult<Transaction> {
        let row = sqlx::query_as::<_, Transaction>(&format!(
            r#"INSERT INTO transactions (api_key_id, operation, cost, input, success)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {TX_COLUMNS}"#
        ))
        .bind(tx.api_key_id)
        .bind(&tx.operation)
        .bind(tx.cost)
        .bind(&tx.input)
        .bind(tx.success)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn charge(
        &self,
        id: i64,
        cost: Decimal,
        operation: &str,
        input_summary: &str,
    ) -> LedgerResult<ChargeOutcome> {
        let mut db_tx = self.pool.begin().await?;

        // Check and debit in one statement: zero rows means the balance (or the key) is gone.
        let debited = sqlx::query_as::<_, ApiKey>(&format!(
            r#"UPDATE api_keys SET balance = balance - $2
               WHERE id = $1 AND active = true AND balance >= $2
               RETURNING {KEY_COLUMNS}"#
        ))
        .bind(id)
        .bind(cost)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(key) = debited else {
            let balance = sqlx::query_scalar::<_, Decimal>(
                "SELECT balance FROM api_keys WHERE id = $1 AND active = true",
            )
            .bind(id)
            .fetch_optional(&mut *db_tx)
            .await?;
            db_tx.rollback().await?;
            return match balance {
                Some(balance) => Ok(ChargeOutcome::Insufficient { balance }),
                None => Err(LedgerError::KeyNotFound(id)),
            };
        };

        let transaction = sqlx::query_as::<_, Transaction>(&format!(
            r#"INSERT INTO transactions (api_key_id, operation, cost, input, success)
               VALUES ($1, $2, $3, $4, true)
               RETURNING {TX_COLUMNS}"#
        ))
        .bind(id)
        .bind(operation)
        .bind(cost)
        .bind(input_summary)
        .fetch_one(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        Ok(ChargeOutcome::Settled { key, transaction })
    }

    async fn list_transactions(&self, user_id: &str) -> LedgerResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(
            r#"SELECT t.id, t.api_key_id, t.operation, t.cost, t.input, t.success, t.created_at
               FROM transactions t
               INNER JOIN api_keys k ON k.id = t.api_key_id
               WHERE k.user_id = $1
               ORDER BY t.created_at DESC, t.id DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn ping(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
