//! Bearer credential verification
//!
//! The service does not issue identities; it only checks HS256 tokens signed
//! with the shared secret and extracts the numeric subject.

use crate::error::{ArenaError, Result};
use crate::types::UserId;
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Default shared secret for local development
pub const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";

/// Claims carried by access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Numeric user id, as a number or numeric string
    pub sub: Value,
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

/// Resolves a bearer credential to a user identity
#[cfg_attr(test, mockall::automock)]
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<UserId>;
}

/// HS256 verifier over a shared secret
pub struct JwtIdentityVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl IdentityVerifier for JwtIdentityVerifier {
    fn verify(&self, token: &str) -> Result<UserId> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ArenaError::unauthorized("Bearer token is required"));
        }

        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| {
                debug!("Rejected token: {}", e);
                match e.kind() {
                    JwtErrorKind::ExpiredSignature => ArenaError::unauthorized("Token expired"),
                    JwtErrorKind::InvalidSignature => {
                        ArenaError::unauthorized("Invalid token signature")
                    }
                    _ => ArenaError::unauthorized("Invalid token"),
                }
            },
        )?;

        subject_id(&data.claims.sub)
            .ok_or_else(|| ArenaError::unauthorized("Invalid token subject"))
    }
}

fn subject_id(sub: &Value) -> Option<UserId> {
    let id = match sub {
        Value::Number(number) => number.as_u64()?,
        Value::String(text) => text.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    (id > 0).then_some(id)
}

/// Sign an access token for a user, valid for `ttl_seconds`
pub fn issue_token(secret: &str, user_id: UserId, ttl_seconds: u64) -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ArenaError::internal(format!("System clock before epoch: {}", e)))?
        .as_secs();

    let claims = AccessClaims {
        sub: Value::from(user_id),
        exp: now + ttl_seconds,
        iat: now,
        nickname: None,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ArenaError::internal(format!("Failed to sign token: {}", e)))
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
