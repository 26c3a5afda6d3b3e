//! Dashboard session tokens.
//!
//! A session token is `<user_id>.<hex HMAC-SHA256(secret, user_id)>`. The
//! gateway only verifies them; minting happens in the CLI or in whatever
//! login front end shares the secret.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

fn signature(secret: &str, user_id: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(user_id.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Mint a session token for `user_id`.
pub fn sign(secret: &str, user_id: &str) -> String {
    format!("{}.{}", user_id, hex::encode(signature(secret, user_id)))
}

/// Return the user id if `token` carries a valid signature.
pub fn verify(secret: &str, token: &str) -> Option<String> {
    // User ids may contain dots; the signature never does.
    let (user_id, sig_hex) = token.rsplit_once('.')?;
    if user_id.is_empty() {
        return None;
    }
    let provided = hex::decode(sig_hex).ok()?;
    let expected = signature(secret, user_id);
    if provided.ct_eq(&expected).into() {
        Some(user_id.to_string())
    } else {
        None
    }
}

/// The authenticated dashboard user behind a management request.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| {
                tracing::warn!("management API: missing session token");
                AppError::Unauthorized
            })?;

        match verify(&state.config.session_secret, token) {
            Some(user_id) => Ok(AuthUser(user_id)),
            None => {
                tracing::warn!("management API: invalid session token");
                Err(AppError::Unauthorized)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_then_verify() {
        let token = sign("secret", "user-42");
        assert!(token.starts_with("user-42."));
        assert_eq!(verify("secret", &token).as_deref(), Some("user-42"));
    }

    #[test]
    fn test_user_id_with_dots() {
        let token = sign("secret", "alice.smith@example.com");
        assert_eq!(
            verify("secret", &token).as_deref(),
            Some("alice.smith@example.com")
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign("secret", "user-42");
        assert!(verify("other", &token).is_none());
    }

    #[test]
    fn test_tampered_user_rejected() {
        let token = sign("secret", "user-42");
        let forged = token.replacen("user-42", "user-43", 1);
        assert!(verify("secret", &forged).is_none());
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        assert!(verify("secret", "").is_none());
        assert!(verify("secret", "no-dot").is_none());
        assert!(verify("secret", "user.not-hex").is_none());
        assert!(verify("secret", &format!(".{}", hex::encode([0u8; 32]))).is_none());
    }
}
