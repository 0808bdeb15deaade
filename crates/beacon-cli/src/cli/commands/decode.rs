//! `beacon decode`: inspect a token without contacting the API.

use anyhow::{Context, Result};
use beacon_core::auth::{TokenValidation, decode_claims};
use beacon_core::clock::{Clock, SystemClock};

pub fn run(token: &str, json: bool) -> Result<()> {
    let claims = decode_claims(token.trim()).context("decode token")?;
    let validation = TokenValidation::at(claims, SystemClock.now_millis());

    if json {
        let claims = validation.claims.as_ref();
        let out = serde_json::json!({
            "subject": claims.and_then(|c| c.subject.clone()),
            "expires_at": claims.map(|c| c.expires_at_secs),
            "valid": validation.valid,
            "expires_in_ms": validation.expires_in_ms,
            "claims": claims.map(|c| c.extra.clone()),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", super::describe_validation(&validation));
    }
    Ok(())
}
