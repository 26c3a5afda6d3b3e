use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Number of decimal places every ledger amount is stored with.
pub const LEDGER_SCALE: u32 = 4;

/// Largest magnitude a balance can hold: `NUMERIC(14,4)`.
pub const MAX_BALANCE: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, LEDGER_SCALE);

/// Prefix of every issued API token.
pub const TOKEN_PREFIX: &str = "sk_";

/// A billing account: an opaque secret token with a credit balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: i64,
    pub user_id: String,
    /// Shown once in the dashboard; clients present it as `X-Payment-Token`.
    #[serde(rename = "key")]
    pub token: String,
    pub name: String,
    pub balance: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// True when the key can pay for one request at `price`.
    pub fn can_afford(&self, price: Decimal) -> bool {
        self.balance >= price
    }
}

/// Generate a fresh token: `sk_` followed by 16 random bytes in hex.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", TOKEN_PREFIX, hex::encode(bytes))
}

/// Round to the ledger's precision and pin the scale, so `1` renders as `1.0000`.
pub fn to_ledger_scale(amount: Decimal) -> Decimal {
    let mut amount = amount.round_dp(LEDGER_SCALE);
    amount.rescale(LEDGER_SCALE);
    amount
}

/// True when `amount` fits the balance column.
pub fn within_balance_range(amount: Decimal) -> bool {
    amount.abs() <= MAX_BALANCE
}
