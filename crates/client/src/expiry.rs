// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remaining-validity estimation for access tokens.
//!
//! Tokens are opaque bearer strings; the only claim this module reads is the
//! embedded `exp` (Unix seconds) in the JWT-shaped middle segment. Nothing is
//! verified locally; trust decisions belong to the service.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Assumed remaining lifetime when a token carries no readable expiry
/// (15 minutes).
pub const DEFAULT_FALLBACK_TTL_MS: u64 = 900_000;

/// Milliseconds until `access_token`'s claimed expiry, from the wall clock.
pub fn millis_remaining(access_token: &str) -> u64 {
    millis_remaining_at(access_token, epoch_ms(), DEFAULT_FALLBACK_TTL_MS)
}

/// Milliseconds until the token's `exp` claim, measured from `now_ms`.
///
/// A token whose expiry cannot be read (wrong segmentation, bad base64, bad
/// JSON, missing or non-numeric `exp`) is assigned `fallback_ms` rather than
/// treated as already expired, and so is a claim that is already in the past.
/// Real expiry is caught by the 401 path on the next authenticated call.
pub fn millis_remaining_at(access_token: &str, now_ms: u64, fallback_ms: u64) -> u64 {
    match claimed_expiry_ms(access_token) {
        Some(exp_ms) if exp_ms > now_ms => exp_ms - now_ms,
        _ => fallback_ms,
    }
}

/// The `exp` claim of a JWT-shaped token, as epoch milliseconds.
fn claimed_expiry_ms(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_f64()?;
    if !exp.is_finite() || exp <= 0.0 {
        return None;
    }
    Some((exp * 1000.0) as u64)
}

/// Current wall clock as milliseconds since the Unix epoch.
pub(crate) fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "expiry_tests.rs"]
mod tests;
