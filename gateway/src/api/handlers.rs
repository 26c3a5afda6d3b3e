use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::errors::AppError;
use crate::middleware::metrics;
use crate::middleware::session::AuthUser;
use crate::models::api_key::{generate_token, to_ledger_scale, MAX_BALANCE};
use crate::models::{ApiKey, Transaction};
use crate::AppState;

const MAX_KEY_NAME_CHARS: usize = 100;

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct TopUpRequest {
    pub amount: f64,
}

// ── Helpers ──────────────────────────────────────────────────

/// Load a live key and check it belongs to the caller.
async fn owned_key(state: &AppState, user: &AuthUser, id: i64) -> Result<ApiKey, AppError> {
    let key = state
        .store
        .get_by_id(id)
        .await?
        .ok_or(AppError::NotFound("Key"))?;
    if key.user_id != user.0 {
        tracing::warn!(key_id = id, user = %user.0, "ownership check failed");
        return Err(AppError::Forbidden);
    }
    Ok(key)
}

fn parse_key_name(raw: &str) -> Result<String, AppError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::validation("Name is required", Some("name")));
    }
    if name.chars().count() > MAX_KEY_NAME_CHARS {
        return Err(AppError::validation(
            format!("Name too long (max {} characters)", MAX_KEY_NAME_CHARS),
            Some("name"),
        ));
    }
    Ok(name.to_string())
}

fn parse_amount(amount: f64) -> Result<Decimal, AppError> {
    let invalid = || AppError::validation("Invalid amount", Some("amount"));
    if !amount.is_finite() || amount <= 0.0 {
        return Err(invalid());
    }
    let amount = Decimal::from_f64_retain(amount)
        .map(to_ledger_scale)
        .ok_or_else(invalid)?;
    // Positive amounts below the ledger's precision round to zero.
    if amount <= Decimal::ZERO || amount > MAX_BALANCE {
        return Err(invalid());
    }
    Ok(amount)
}

// ── Key Handlers ─────────────────────────────────────────────

/// GET /api/keys: the caller's live keys
pub async fn list_keys(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<ApiKey>>, AppError> {
    let keys = state.store.list_by_user(&user.0).await?;
    Ok(Json(keys))
}

/// POST /api/keys: issue a new key with the trial balance
pub async fn create_key(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<CreateKeyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiKey>), AppError> {
    let Json(payload) =
        payload.map_err(|_| AppError::validation("Name is required", Some("name")))?;
    let name = parse_key_name(&payload.name)?;

    let key = state
        .store
        .create_key(&user.0, &name, &generate_token(), state.config.trial_balance)
        .await?;
    tracing::info!(key_id = key.id, user = %user.0, "api key issued");

    Ok((StatusCode::CREATED, Json(key)))
}

/// POST /api/keys/:id/topup: add credits to an owned key
pub async fn top_up_key(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    payload: Result<Json<TopUpRequest>, JsonRejection>,
) -> Result<Json<ApiKey>, AppError> {
    let Json(payload) =
        payload.map_err(|_| AppError::validation("Invalid amount", Some("amount")))?;
    let amount = parse_amount(payload.amount)?;

    owned_key(&state, &user, id).await?;
    let key = state.store.debit(id, amount).await?;
    metrics::record_topup(amount);
    tracing::info!(key_id = id, amount = %amount, balance = %key.balance, "api key topped up");

    Ok(Json(key))
}

/// DELETE /api/keys/:id: revoke an owned key
pub async fn delete_key(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    owned_key(&state, &user, id).await?;
    if !state.store.delete(id).await? {
        return Err(AppError::NotFound("Key"));
    }
    tracing::info!(key_id = id, "api key revoked");
    Ok(StatusCode::NO_CONTENT)
}

// ── Transaction Handlers ─────────────────────────────────────

/// GET /api/transactions: the caller's usage log, newest first
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let rows = state.store.list_transactions(&user.0).await?;
    Ok(Json(rows))
}
