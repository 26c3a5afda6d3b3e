//! Prometheus metrics for the metering path.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Metrics live in the global default registry and are registered on first use.

use once_cell::sync::Lazy;
use prometheus::{opts, register_counter, register_counter_vec, Counter, CounterVec, Encoder, TextEncoder};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

static SOLVE_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!("metergate_solve_requests_total", "Compute requests by outcome"),
        &["outcome"]
    )
    .expect("failed to register metergate_solve_requests_total")
});

static CREDITS_CHARGED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(opts!(
        "metergate_credits_charged_total",
        "Credits debited for settled compute requests"
    ))
    .expect("failed to register metergate_credits_charged_total")
});

static CREDITS_TOPPED_UP: Lazy<Counter> = Lazy::new(|| {
    register_counter!(opts!(
        "metergate_credits_topped_up_total",
        "Credits added to keys through top-ups"
    ))
    .expect("failed to register metergate_credits_topped_up_total")
});

/// Outcome label for a settled solve.
pub const SETTLED: &str = "settled";

pub fn record_solve(outcome: &str) {
    SOLVE_REQUESTS.with_label_values(&[outcome]).inc();
}

pub fn record_charge(cost: Decimal) {
    if let Some(cost) = cost.to_f64() {
        if cost > 0.0 {
            CREDITS_CHARGED.inc_by(cost);
        }
    }
}

pub fn record_topup(amount: Decimal) {
    if let Some(amount) = amount.to_f64() {
        if amount > 0.0 {
            CREDITS_TOPPED_UP.inc_by(amount);
        }
    }
}

/// Encode all registered metrics as Prometheus text format.
/// Called by the `/metrics` HTTP handler.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_solve_shows_up_in_output() {
        record_solve(SETTLED);
        record_charge(Decimal::new(1, 2));
        let output = encode_metrics();
        assert!(output.contains("metergate_solve_requests_total"));
        assert!(output.contains("outcome=\"settled\""));
        assert!(output.contains("metergate_credits_charged_total"));
    }

    #[test]
    fn test_non_positive_amounts_ignored() {
        // Counter::inc_by panics on negative values; these must be filtered first.
        record_charge(Decimal::NEGATIVE_ONE);
        record_topup(Decimal::ZERO);
    }
}
