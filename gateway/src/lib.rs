//! metergate: pay-per-request compute gateway with a credit ledger.
//!
//! The binary in `main.rs` wires these modules to a listener; integration
//! tests in `tests/` drive the same router in-process.

pub mod api;
pub mod cli;
pub mod compute;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod store;

use std::sync::Arc;

use compute::evaluator::{EvalexprEvaluator, Evaluator};
use compute::ComputeGateway;
use store::LedgerStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub gateway: ComputeGateway,
    pub config: config::Config,
}

impl AppState {
    /// State with the default `evalexpr` evaluator.
    pub fn new(config: config::Config, store: Arc<dyn LedgerStore>) -> Self {
        Self::with_evaluator(config, store, Arc::new(EvalexprEvaluator))
    }

    pub fn with_evaluator(
        config: config::Config,
        store: Arc<dyn LedgerStore>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        let gateway = ComputeGateway::new(
            store.clone(),
            evaluator,
            config.unit_price,
            config.max_expression_len,
        );
        Self {
            store,
            gateway,
            config,
        }
    }
}
