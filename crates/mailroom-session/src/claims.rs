//! Token codec: reads the claims out of a signed access token.
//!
//! The signature is **not** verified here. That is the server's job; the
//! client only needs the expiry (to schedule renewal) and the role (to gate
//! routes and UI). Every function in this module is total: a malformed
//! token simply has no claims.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use serde_json::Value;

/// The claims the session layer cares about.
///
/// Derived from the token on demand and never stored on their own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    /// Expiry, in seconds since the Unix epoch.
    pub exp: Option<u64>,
    /// Issued-at, in seconds since the Unix epoch.
    pub iat: Option<u64>,
    /// Subject (user id).
    pub sub: Option<String>,
    /// Role, e.g. `"admin"` or `"user"`.
    pub role: Option<String>,
}

/// Decodes the payload of a `header.payload.signature` token.
///
/// Returns `None` for anything that is not three dot-separated segments
/// with a base64url JSON object in the middle.
pub fn decode(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };

    let payload = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()?;
    let Value::Object(map) = serde_json::from_slice::<Value>(&bytes).ok()?
    else {
        return None;
    };

    Some(Claims {
        exp: map.get("exp").and_then(epoch_seconds),
        iat: map.get("iat").and_then(epoch_seconds),
        sub: map.get("sub").and_then(Value::as_str).map(str::to_string),
        role: map
            .get("role")
            .and_then(Value::as_str)
            .filter(|role| !role.is_empty())
            .map(str::to_string),
    })
}

/// NumericDate claims may be fractional; negative or non-finite values are
/// treated as missing.
fn epoch_seconds(value: &Value) -> Option<u64> {
    let secs = value.as_f64()?;
    (secs.is_finite() && secs >= 0.0).then(|| secs.floor() as u64)
}

fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

/// Whole seconds left before the token expires.
///
/// `0` when the token is expired, has no `exp` claim, or is malformed:
/// callers treat all three as "needs a refresh".
pub fn seconds_until_expiry(token: &str) -> u64 {
    let Some(exp) = decode(token).and_then(|claims| claims.exp) else {
        return 0;
    };
    let left = (exp as f64 - now_epoch_secs()).floor();
    if left > 0.0 { left as u64 } else { 0 }
}

/// The token's role claim, if present and non-empty.
pub fn role_of(token: &str) -> Option<String> {
    decode(token).and_then(|claims| claims.role)
}

/// Whether the token is past its expiry. A token without `exp` counts as
/// expired.
pub fn is_expired(token: &str) -> bool {
    match decode(token).and_then(|claims| claims.exp) {
        Some(exp) => (exp as f64) < now_epoch_secs(),
        None => true,
    }
}

/// Whether the token is still valid but has at most `threshold_secs` left.
pub fn will_expire_soon(token: &str, threshold_secs: u64) -> bool {
    let left = seconds_until_expiry(token);
    left > 0 && left <= threshold_secs
}
