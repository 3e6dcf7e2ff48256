//! Shared-secret bearer authentication.
//!
//! Every route except the health check requires
//! `Authorization: Bearer <token>`, where the token equals the configured
//! API token. The comparison runs in constant time.

use axum::http::{header, HeaderMap};
use subtle::ConstantTimeEq;

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No `Authorization` header, or not a `Bearer` credential.
    Missing,
    /// A bearer token that does not match.
    Invalid,
}

impl AuthFailure {
    pub fn message(self) -> &'static str {
        match self {
            AuthFailure::Missing => "Missing bearer token",
            AuthFailure::Invalid => "Invalid token",
        }
    }
}

/// Extracts the bearer credential. The scheme is matched
/// case-insensitively; surrounding whitespace is ignored.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

pub fn check_bearer(headers: &HeaderMap, expected: &str) -> Result<(), AuthFailure> {
    let presented = bearer_token(headers).ok_or(AuthFailure::Missing)?;
    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(AuthFailure::Invalid)
    }
}
