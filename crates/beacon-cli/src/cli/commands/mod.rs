//! CLI command handlers.

pub mod config;
pub mod decode;
pub mod poll;
pub mod session;

use std::fmt::Write as _;
use std::time::Duration;

use beacon_core::auth::TokenValidation;

/// `1h 2m 3s`, `4m 0s`, `12s`.
pub fn human_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{hours}h ");
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{minutes}m ");
    }
    let _ = write!(out, "{seconds}s");
    out
}

/// Multi-line summary of a token check.
pub fn describe_validation(validation: &TokenValidation) -> String {
    let Some(claims) = &validation.claims else {
        return "status:  no token".to_string();
    };

    let subject = claims.subject.as_deref().unwrap_or("-");
    let expires = claims
        .expires_at_utc()
        .map_or_else(|| claims.expires_at_secs.to_string(), |t| t.to_rfc3339());
    let distance = human_duration(Duration::from_millis(validation.expires_in_ms.unsigned_abs()));
    let status = if validation.valid {
        format!("valid (expires in {distance})")
    } else {
        format!("expired ({distance} ago)")
    };

    format!("subject: {subject}\nexpires: {expires}\nstatus:  {status}")
}
