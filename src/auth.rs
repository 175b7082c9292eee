//! Bearer-token verification.
//!
//! spec.md treats the full identity/authentication stack as an external
//! collaborator ("customer profile CRUD, authentication token issuance"
//! are explicitly out of scope, §1). What remains in scope is the
//! minimal contract this system actually depends on: deciding whether an
//! inbound bearer token is one this deployment trusts, and letting the
//! coordinator mint a token for its own calls into the participant
//! ("coordinator-minted administrative token", spec.md §6.1).
//!
//! Tokens here are a signed `subject.expiry.signature` triple — not a
//! JWT, not a session store, just enough to satisfy "the coordinator
//! does not verify account ownership" (spec.md §4.1) while still
//! rejecting requests nobody signed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject: String,
    pub expires_at: u64,
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

fn sign(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Mint a bearer token for `subject`, valid for `ttl_secs` seconds.
pub fn mint(secret: &str, subject: &str, ttl_secs: u64) -> String {
    let expires_at = now() + ttl_secs;
    let payload = format!("{subject}.{expires_at}");
    let signature = sign(secret, &payload);
    format!("{payload}.{signature}")
}

/// Mint the coordinator's service-to-service token for calling a
/// participant's `/2pc/*` endpoints.
pub fn mint_service_token(secret: &str) -> String {
    mint(secret, "coordinator", 300)
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("malformed bearer token")]
    Malformed,
    #[error("bearer token signature does not match")]
    BadSignature,
    #[error("bearer token expired")]
    Expired,
}

/// Verify a bearer token against `secret`, returning its claims.
pub fn verify(secret: &str, token: &str) -> Result<Claims, TokenError> {
    let mut parts = token.rsplitn(2, '.');
    let signature = parts.next().ok_or(TokenError::Malformed)?;
    let payload = parts.next().ok_or(TokenError::Malformed)?;

    let expected = sign(secret, payload);
    if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
        return Err(TokenError::BadSignature);
    }

    let (subject, expires_at) = payload.rsplit_once('.').ok_or(TokenError::Malformed)?;
    let expires_at: u64 = expires_at.parse().map_err(|_| TokenError::Malformed)?;

    if now() > expires_at {
        return Err(TokenError::Expired);
    }

    Ok(Claims {
        subject: subject.to_string(),
        expires_at,
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_then_verify_roundtrips() {
        let token = mint("secret", "alice", 60);
        let claims = verify("secret", &token).unwrap();
        assert_eq!(claims.subject, "alice");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = mint("secret", "alice", 60);
        assert!(matches!(verify("other", &token), Err(TokenError::BadSignature)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = mint("secret", "alice", 0);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(matches!(verify("secret", &token), Err(TokenError::Expired)));
    }

    #[test]
    fn malformed_token_is_rejected() {
        assert!(matches!(verify("secret", "not-a-token"), Err(TokenError::Malformed)));
    }

    #[test]
    fn service_token_has_expected_subject() {
        let token = mint_service_token("secret");
        let claims = verify("secret", &token).unwrap();
        assert_eq!(claims.subject, "coordinator");
    }
}
