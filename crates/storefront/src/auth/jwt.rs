//! HS256 access tokens.

use chrono::Utc;
use common::protocol::Role;
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Seconds of clock skew tolerated when checking `exp`.
const LEEWAY_SECS: u64 = 5;

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    /// Unique per token, so two tokens issued in the same second differ.
    pub jti: Uuid,
}

/// Signs and validates access tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl_secs: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl_secs,
        }
    }

    /// Access token lifetime in seconds.
    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    pub fn issue(&self, user_id: Uuid, email: &str, role: Role) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id,
            email: email.to_owned(),
            role,
            iat: now,
            exp: now + self.ttl_secs,
            jti: Uuid::new_v4(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> AppResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AppError::unexpected(format!("failed to sign access token: {e}")))
    }

    /// Decode and verify `token`. Every failure is `Unauthorized`.
    pub fn validate(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::unauthorized("access token expired"),
                _ => AppError::unauthorized("invalid access token"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"unit-test-secret-unit-test-secret";

    #[test]
    fn issue_then_validate() {
        let issuer = TokenIssuer::new(SECRET, 900);
        let id = Uuid::new_v4();
        let token = issuer.issue(id, "rose@example.com", Role::Partner).unwrap();
        let claims = issuer.validate(&token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.role, Role::Partner);
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn tokens_are_unique() {
        let issuer = TokenIssuer::new(SECRET, 900);
        let id = Uuid::new_v4();
        let a = issuer.issue(id, "a@example.com", Role::Customer).unwrap();
        let b = issuer.issue(id, "a@example.com", Role::Customer).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let issuer = TokenIssuer::new(SECRET, 900);
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            email: "old@example.com".into(),
            role: Role::Customer,
            iat: now - 3600,
            exp: now - 600,
            jti: Uuid::new_v4(),
        };
        let token = issuer.sign(&claims).unwrap();
        let err = issuer.validate(&token).unwrap_err();
        assert_eq!(err.kind().http_status(), 401);
        assert!(err.kind().public_message().contains("expired"));
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let ours = TokenIssuer::new(SECRET, 900);
        let theirs = TokenIssuer::new(b"another-secret-another-secret-xx", 900);
        let token = theirs.issue(Uuid::new_v4(), "x@example.com", Role::Admin).unwrap();
        assert!(ours.validate(&token).is_err());
        assert!(ours.validate("not.a.jwt").is_err());
    }
}
