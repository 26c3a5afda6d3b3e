use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};

use crate::compute::{SolveRequest, SolveResponse};
use crate::errors::AppError;
use crate::middleware::metrics;
use crate::AppState;

/// Token from `X-Payment-Token`, falling back to `Authorization: Bearer`.
pub fn payment_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-payment-token")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
}

/// Where a caller can top up: the configured public URL, else this host's root.
pub fn payment_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(url) = &state.config.public_url {
        return url.clone();
    }
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|p| *p == "https" || *p == "http")
        .unwrap_or("http");
    format!("{}://{}/", proto, host)
}

/// POST /api/compute/solve: evaluate one expression for the unit price
pub async fn solve(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<SolveRequest>, JsonRejection>,
) -> Result<Json<SolveResponse>, AppError> {
    let result = run_solve(&state, &headers, payload).await;
    match &result {
        Ok(resp) => {
            metrics::record_solve(metrics::SETTLED);
            metrics::record_charge(resp.cost);
        }
        Err(e) => metrics::record_solve(e.kind()),
    }
    result.map(Json)
}

async fn run_solve(
    state: &AppState,
    headers: &HeaderMap,
    payload: Result<Json<SolveRequest>, JsonRejection>,
) -> Result<SolveResponse, AppError> {
    let payment_url = payment_url(state, headers);
    let key = state
        .gateway
        .authorize(payment_token(headers), &payment_url)
        .await?;

    // The body is only looked at once the caller is known to be able to pay.
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(%rejection, "solve body rejected");
        AppError::validation("Expression is required", Some("expression"))
    })?;

    state
        .gateway
        .execute(&key, &request.expression, &payment_url)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_payment_token_prefers_dedicated_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-payment-token", HeaderValue::from_static("sk_a"));
        headers.insert("authorization", HeaderValue::from_static("Bearer sk_b"));
        assert_eq!(payment_token(&headers), Some("sk_a"));
    }

    #[test]
    fn test_payment_token_from_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer sk_b"));
        assert_eq!(payment_token(&headers), Some("sk_b"));
    }

    #[test]
    fn test_payment_token_absent() {
        let mut headers = HeaderMap::new();
        assert_eq!(payment_token(&headers), None);
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(payment_token(&headers), None);
    }
}
