/// Access token claims
///
/// Reads the payload segment of a JWT without verifying its signature.
/// The client only needs `exp` to schedule refreshes; the backend remains
/// the authority on whether a token is valid.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

/// Subset of RFC 7519 claims the client cares about
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Claims {
    /// Expiration time (Unix timestamp, seconds)
    pub exp: Option<f64>,
    /// Subject
    pub sub: Option<String>,
}

impl Claims {
    /// Decode the payload segment of `token`.
    ///
    /// Returns `None` for anything that is not a three-part token with a
    /// base64url JSON object in the middle.
    pub fn decode_unverified(token: &str) -> Option<Self> {
        let mut parts = token.split('.');
        let (_header, payload) = (parts.next()?, parts.next()?);
        if payload.is_empty() {
            return None;
        }

        // Tolerate padded and standard-alphabet payloads.
        let normalized: String = payload
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                other => other,
            })
            .collect();

        let bytes = URL_SAFE_NO_PAD.decode(normalized.as_bytes()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Expiry in epoch milliseconds
    pub fn expires_at_ms(&self) -> Option<i64> {
        match self.exp {
            Some(exp) if exp.is_finite() && exp > 0.0 => Some((exp * 1000.0) as i64),
            _ => None,
        }
    }
}

/// Expiry embedded in an access token, in epoch milliseconds.
pub fn parse_jwt_exp_ms(token: &str) -> Option<i64> {
    Claims::decode_unverified(token).and_then(|claims| claims.expires_at_ms())
}
