pub mod api_key;
pub mod transaction;

pub use api_key::ApiKey;
pub use transaction::{NewTransaction, Transaction};
