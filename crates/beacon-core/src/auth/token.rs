//! Access token decoding.
//!
//! Tokens are opaque to the dashboard except for the JWT payload segment,
//! which carries the subject and expiry. Signatures are not verified here;
//! the API does that on every request.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};

/// Reasons a token cannot be accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TokenError {
    #[error("invalid token format: expected 3 segments, got {0}")]
    Segments(usize),
    #[error("invalid token payload encoding")]
    Encoding,
    #[error("invalid token payload: {0}")]
    Payload(String),
    #[error("missing claim: exp")]
    MissingExpiry,
}

/// Claims decoded from the payload segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    pub subject: Option<String>,
    pub expires_at_secs: u64,
    /// Every other claim, untouched.
    pub extra: Map<String, JsonValue>,
}

impl Claims {
    pub fn expires_at_millis(&self) -> u64 {
        self.expires_at_secs.saturating_mul(1000)
    }

    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.expires_at_secs).ok()?, 0)
    }
}

/// Decodes the claims of a `header.payload.signature` token.
///
/// # Errors
/// Returns `TokenError` if the structure is malformed or `exp` is missing.
pub fn decode_claims(raw: &str) -> Result<Claims, TokenError> {
    let parts: Vec<&str> = raw.split('.').collect();
    if parts.len() != 3 {
        return Err(TokenError::Segments(parts.len()));
    }

    // Some issuers pad the segment; base64url-no-pad rejects that.
    let payload = parts[1].trim_end_matches('=');
    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::Encoding)?;
    let json: JsonValue =
        serde_json::from_slice(&decoded).map_err(|e| TokenError::Payload(e.to_string()))?;
    let JsonValue::Object(mut extra) = json else {
        return Err(TokenError::Payload("payload is not an object".into()));
    };

    let expires_at_secs = match extra.remove("exp") {
        Some(JsonValue::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or(TokenError::MissingExpiry)?,
        _ => return Err(TokenError::MissingExpiry),
    };
    let subject = match extra.remove("sub") {
        Some(JsonValue::String(s)) => Some(s),
        _ => None,
    };

    Ok(Claims {
        subject,
        expires_at_secs,
        extra,
    })
}

/// Result of checking a token against the clock.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenValidation {
    pub valid: bool,
    /// Negative once expired; zero when there is no token.
    pub expires_in_ms: i64,
    pub claims: Option<Claims>,
}

impl TokenValidation {
    pub fn missing() -> Self {
        Self {
            valid: false,
            expires_in_ms: 0,
            claims: None,
        }
    }

    pub fn at(claims: Claims, now_millis: u64) -> Self {
        let expires_at = i64::try_from(claims.expires_at_millis()).unwrap_or(i64::MAX);
        let now = i64::try_from(now_millis).unwrap_or(i64::MAX);
        let expires_in_ms = expires_at.saturating_sub(now);
        Self {
            valid: expires_in_ms > 0,
            expires_in_ms,
            claims: Some(claims),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_tokens::{expiring_at, with_payload};
    use super::*;

    #[test]
    fn test_decode_claims_reads_subject_and_expiry() {
        let token = with_payload(&serde_json::json!({
            "sub": "user-1",
            "exp": 1_700_000_000u64,
            "role": "analyst",
        }));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.subject.as_deref(), Some("user-1"));
        assert_eq!(claims.expires_at_millis(), 1_700_000_000_000);
        assert_eq!(claims.extra.get("role").and_then(|v| v.as_str()), Some("analyst"));
        assert!(claims.expires_at_utc().is_some());
    }

    #[test]
    fn test_decode_claims_rejects_wrong_segment_count() {
        assert_eq!(decode_claims("a.b"), Err(TokenError::Segments(2)));
        assert_eq!(decode_claims("opaque"), Err(TokenError::Segments(1)));
    }

    #[test]
    fn test_decode_claims_rejects_bad_base64() {
        assert_eq!(decode_claims("a.!!!.c"), Err(TokenError::Encoding));
    }

    #[test]
    fn test_decode_claims_rejects_non_json_payload() {
        let body = URL_SAFE_NO_PAD.encode("not json");
        let err = decode_claims(&format!("h.{body}.s")).unwrap_err();
        assert!(matches!(err, TokenError::Payload(_)));
    }

    #[test]
    fn test_decode_claims_requires_numeric_exp() {
        let missing = with_payload(&serde_json::json!({ "sub": "u" }));
        assert_eq!(decode_claims(&missing), Err(TokenError::MissingExpiry));

        let stringly = with_payload(&serde_json::json!({ "sub": "u", "exp": "soon" }));
        assert_eq!(decode_claims(&stringly), Err(TokenError::MissingExpiry));
    }

    #[test]
    fn test_validation_future_and_past() {
        let claims = decode_claims(&expiring_at("u", 2_000)).unwrap();

        let future = TokenValidation::at(claims.clone(), 1_000_000);
        assert!(future.valid);
        assert_eq!(future.expires_in_ms, 1_000_000);

        let past = TokenValidation::at(claims, 2_500_000);
        assert!(!past.valid);
        assert!(past.expires_in_ms < 0);
    }

    #[test]
    fn test_validation_saturates_far_future_expiry() {
        let claims = decode_claims(&expiring_at("u", 10_000_000_000_000_000)).unwrap();
        let validation = TokenValidation::at(claims, 1_700_000_000_000);
        assert!(validation.valid);
        assert_eq!(validation.expires_in_ms, i64::MAX - 1_700_000_000_000);
    }

    #[test]
    fn test_validation_at_exact_expiry_is_invalid() {
        let claims = decode_claims(&expiring_at("u", 10)).unwrap();
        assert!(!TokenValidation::at(claims, 10_000).valid);
    }
}
