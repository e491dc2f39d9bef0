use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::roles::Role;

/// Claims carried in an access token. `exp` is an absolute Unix timestamp;
/// nothing about a token is stored server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token signature invalid")]
    BadSignature,
    #[error("token missing a required claim")]
    MissingClaim,
    #[error("token malformed")]
    Malformed,
}

/// Sign a new HS256 token for `username` expiring `ttl_minutes` from now.
pub fn issue(secret: &str, username: &str, role: Role, ttl_minutes: i64) -> anyhow::Result<String> {
    let exp = (Utc::now() + Duration::minutes(ttl_minutes)).timestamp();
    let claims = Claims { sub: username.to_string(), role, exp };
    let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))?;
    Ok(token)
}

/// Verify signature and expiry and decode the claims. Zero leeway: a token is
/// invalid the instant `exp` passes.
///
/// Claims are pulled out of the raw payload one by one rather than deserialized
/// into [`Claims`] directly, so a payload with a missing or mistyped field
/// reports `MissingClaim` instead of a generic decode failure.
pub fn validate(secret: &str, token: &str) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    let data = decode::<serde_json::Value>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            ErrorKind::MissingRequiredClaim(_) => TokenError::MissingClaim,
            _ => TokenError::Malformed,
        })?;
    let payload = data.claims;
    let sub = payload.get("sub").and_then(|v| v.as_str()).ok_or(TokenError::MissingClaim)?;
    let role = payload.get("role").and_then(|v| v.as_str()).ok_or(TokenError::MissingClaim)?;
    // A role outside the closed set never came from us
    let role = Role::parse(role).ok_or(TokenError::Malformed)?;
    let exp = payload.get("exp").and_then(|v| v.as_i64()).ok_or(TokenError::MissingClaim)?;
    Ok(Claims { sub: sub.to_string(), role, exp })
}
