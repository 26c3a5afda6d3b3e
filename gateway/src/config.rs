use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

const PLACEHOLDER_SECRET: &str = "CHANGE_ME_SESSION_SECRET";

/// Which ledger backend the server runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("unknown store backend '{}': expected postgres or memory", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub store: StoreBackend,
    /// HMAC key for dashboard session tokens.
    pub session_secret: String,
    /// Fixed price of one successful solve.
    pub unit_price: Decimal,
    /// Starting balance of a newly issued key.
    pub trial_balance: Decimal,
    pub max_expression_len: usize,
    /// Top-up link returned in 402 bodies. Derived from the request host when unset.
    pub public_url: Option<String>,
    pub dashboard_origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "postgres://localhost/metergate".into(),
            db_max_connections: 10,
            store: StoreBackend::Postgres,
            session_secret: PLACEHOLDER_SECRET.into(),
            unit_price: Decimal::new(1, 2),
            trial_balance: Decimal::ONE,
            max_expression_len: 1000,
            public_url: None,
            dashboard_origin: "http://localhost:3000".into(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}='{}': {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    let defaults = Config::default();

    let session_secret =
        std::env::var("METERGATE_SESSION_SECRET").unwrap_or_else(|_| PLACEHOLDER_SECRET.into());

    if session_secret == PLACEHOLDER_SECRET {
        let env_mode = std::env::var("METERGATE_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "METERGATE_SESSION_SECRET is still the insecure placeholder. \
                 Set a random secret before running in production."
            );
        }
        eprintln!("⚠️  METERGATE_SESSION_SECRET is not set, using insecure placeholder.");
    }

    let cfg = Config {
        port: env_parse("METERGATE_PORT", defaults.port)?,
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        db_max_connections: env_parse("METERGATE_DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
        store: env_parse("METERGATE_STORE", defaults.store)?,
        session_secret,
        unit_price: env_parse("METERGATE_UNIT_PRICE", defaults.unit_price)?,
        trial_balance: env_parse("METERGATE_TRIAL_BALANCE", defaults.trial_balance)?,
        max_expression_len: env_parse("METERGATE_MAX_EXPRESSION_LEN", defaults.max_expression_len)?,
        public_url: std::env::var("METERGATE_PUBLIC_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        dashboard_origin: std::env::var("METERGATE_DASHBOARD_ORIGIN")
            .unwrap_or(defaults.dashboard_origin),
    };
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.unit_price <= Decimal::ZERO {
            anyhow::bail!("METERGATE_UNIT_PRICE must be positive (got {})", self.unit_price);
        }
        if self.trial_balance < Decimal::ZERO {
            anyhow::bail!("METERGATE_TRIAL_BALANCE must not be negative (got {})", self.trial_balance);
        }
        if self.max_expression_len == 0 {
            anyhow::bail!("METERGATE_MAX_EXPRESSION_LEN must be at least 1");
        }
        Ok(())
    }
}
