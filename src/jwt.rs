//! Read-only access to JWT claims.
//!
//! Signatures are NOT verified. Claims are used for display and routing
//! decisions only; the backend remains the authority.

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use serde_json::Value;

/// Decode the payload segment of `token` into a JSON object.
///
/// Returns `None` unless the token has exactly three dot-separated parts and
/// the middle one is base64url-encoded JSON object.
#[must_use]
pub fn decode_claims(token: &str) -> Option<Value> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return None;
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.is_object().then_some(claims)
}

/// The `role` claim, when present and a non-empty string.
#[must_use]
pub fn role(token: &str) -> Option<String> {
    decode_claims(token)?
        .get("role")
        .and_then(Value::as_str)
        .filter(|role| !role.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
#[path = "jwt_test.rs"]
mod tests;
