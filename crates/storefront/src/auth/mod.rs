//! Accounts, credentials and the access/refresh token protocol.
//!
//! Access tokens are short-lived HS256 JWTs. Refresh tokens are opaque random
//! strings whose digests are stored per user; every refresh rotates the stored
//! record, and presenting an already-rotated token revokes the user's whole
//! token family.

pub mod jwt;
pub mod password;
pub mod refresh;
pub mod users;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::protocol::{AuthResponse, LoginRequest, RegisterRequest, Role, UserProfile};
use common::Validator;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{AppError, AppResult};
use jwt::TokenIssuer;
use password::PasswordHasher;
use users::{NewUser, UserRow};

const MIN_PASSWORD_LEN: usize = 8;

/// Registration, login and token lifecycle.
#[derive(Clone, Debug)]
pub struct AuthService {
    db: Database,
    issuer: Arc<TokenIssuer>,
    hasher: PasswordHasher,
    refresh_ttl: Duration,
}

impl AuthService {
    pub fn new(
        db: Database,
        issuer: Arc<TokenIssuer>,
        hasher: PasswordHasher,
        refresh_ttl_secs: i64,
    ) -> Self {
        Self {
            db,
            issuer,
            hasher,
            refresh_ttl: Duration::seconds(refresh_ttl_secs),
        }
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Create a Customer account and sign it in.
    #[instrument(skip_all)]
    pub async fn register(&self, req: &RegisterRequest) -> AppResult<AuthResponse> {
        validate_registration(req)?;

        if users::find_by_email(self.db.pool(), &req.email).await?.is_some() {
            return Err(AppError::conflict("email is already registered"));
        }

        let password_hash = self.hasher.hash(&req.password).await?;
        let row = users::insert(
            self.db.pool(),
            &NewUser {
                email: &req.email,
                password_hash: &password_hash,
                full_name: &req.full_name,
                phone: req.phone.as_deref().filter(|p| !p.trim().is_empty()),
                role: Role::Customer,
            },
        )
        .await?;
        info!(user_id = %row.id, "account registered");
        self.issue_pair(&row).await
    }

    #[instrument(skip_all)]
    pub async fn login(&self, req: &LoginRequest) -> AppResult<AuthResponse> {
        let invalid = || AppError::unauthorized("invalid email or password");

        let Some(row) = users::find_by_email(self.db.pool(), &req.email).await? else {
            return Err(invalid());
        };
        if !self.hasher.verify(&req.password, &row.password_hash).await? {
            warn!(user_id = %row.id, "failed login attempt");
            return Err(invalid());
        }
        self.issue_pair(&row).await
    }

    /// Exchange a refresh token for a new pair, rotating the stored record.
    #[instrument(skip_all)]
    pub async fn refresh(&self, raw_token: &str) -> AppResult<AuthResponse> {
        let now = Utc::now();
        let presented = refresh::hash(raw_token);
        let mut tx = self.db.pool().begin().await?;

        let Some(record) = refresh::find_by_hash(&mut *tx, &presented).await? else {
            return Err(AppError::unauthorized("invalid refresh token"));
        };
        let user_id = record.user_id()?;

        if record.revoked_at.is_some() {
            // Only a rotated token signals theft; a logged-out one is just stale.
            if record.replaced_by_hash.is_some() {
                let revoked = refresh::revoke_all_for_user(&mut *tx, user_id).await?;
                tx.commit().await?;
                warn!(%user_id, revoked, "rotated refresh token replayed; token family revoked");
            } else {
                debug!(%user_id, "logged-out refresh token presented");
            }
            return Err(AppError::unauthorized("refresh token has been revoked"));
        }
        if record.is_expired(now) {
            return Err(AppError::unauthorized("refresh token expired"));
        }

        let Some(user) = users::find_by_id(&mut *tx, user_id).await? else {
            return Err(AppError::unauthorized("account no longer exists"));
        };

        let next = refresh::generate();
        let next_hash = refresh::hash(&next);
        refresh::insert(&mut *tx, user_id, &next_hash, now + self.refresh_ttl).await?;
        if !refresh::revoke(&mut *tx, record.id, Some(&next_hash)).await? {
            // Lost a race with a concurrent refresh of the same token.
            return Err(AppError::unauthorized("refresh token has been revoked"));
        }
        tx.commit().await?;

        self.build_response(&user, next)
    }

    /// Revoke the presented refresh token. Unknown tokens are ignored.
    #[instrument(skip_all)]
    pub async fn logout(&self, raw_token: &str) -> AppResult<()> {
        let presented = refresh::hash(raw_token);
        if let Some(record) = refresh::find_by_hash(self.db.pool(), &presented).await? {
            refresh::revoke(self.db.pool(), record.id, None).await?;
            info!(user_id = %record.user_id, "signed out");
        }
        Ok(())
    }

    pub async fn profile(&self, user_id: Uuid) -> AppResult<UserProfile> {
        users::find_by_id(self.db.pool(), user_id)
            .await?
            .ok_or_else(|| AppError::not_found("account not found"))?
            .to_profile()
    }

    /// Create an account with an explicit role, bypassing self-registration.
    pub async fn create_account(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        role: Role,
    ) -> AppResult<UserRow> {
        let password_hash = self.hasher.hash(password).await?;
        users::insert(
            self.db.pool(),
            &NewUser {
                email,
                password_hash: &password_hash,
                full_name,
                phone: None,
                role,
            },
        )
        .await
    }

    async fn issue_pair(&self, user: &UserRow) -> AppResult<AuthResponse> {
        let raw = refresh::generate();
        refresh::insert(
            self.db.pool(),
            user.user_id()?,
            &refresh::hash(&raw),
            Utc::now() + self.refresh_ttl,
        )
        .await?;
        self.build_response(user, raw)
    }

    fn build_response(&self, user: &UserRow, refresh_token: String) -> AppResult<AuthResponse> {
        let profile = user.to_profile()?;
        let access_token = self.issuer.issue(profile.id, &profile.email, profile.role)?;
        Ok(AuthResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".into(),
            expires_in: self.issuer.ttl_secs(),
            user: profile,
        })
    }
}

fn validate_registration(req: &RegisterRequest) -> AppResult<()> {
    let email = req.email.trim();
    let password_ok = req.password.chars().count() >= MIN_PASSWORD_LEN
        && req.password.chars().any(|c| c.is_ascii_digit())
        && req.password.chars().any(char::is_alphabetic);

    Validator::new()
        .required(email, "email")
        .check(looks_like_email(email), "email", "is not a valid email address")
        .max_len(email, 254, "email")
        .check(
            password_ok,
            "password",
            "must be at least 8 characters and contain a letter and a digit",
        )
        .required(&req.full_name, "full_name")
        .max_len(&req.full_name, 100, "full_name")
        .finish()?;
    Ok(())
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !s.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
pub(crate) fn test_service(db: Database) -> AuthService {
    AuthService::new(
        db,
        Arc::new(TokenIssuer::new(b"auth-test-secret-auth-test-secret", 900)),
        PasswordHasher::new(4),
        3600,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: "peonies4ever".into(),
            full_name: "Daisy Buchanan".into(),
            phone: Some("  ".into()),
        }
    }

    #[test]
    fn email_shape() {
        assert!(looks_like_email("a@b.co"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("@b.co"));
        assert!(!looks_like_email("a b@c.co"));
    }

    #[test]
    fn weak_password_is_field_error() {
        let mut req = registration("d@example.com");
        req.password = "short".into();
        let err = validate_registration(&req).unwrap_err();
        assert!(err.kind().field_errors().unwrap().contains_key("password"));
    }

    #[tokio::test]
    async fn register_then_login() {
        let svc = test_service(Database::in_memory().await);
        let reg = svc.register(&registration("daisy@example.com")).await.unwrap();
        assert_eq!(reg.user.role, Role::Customer);
        assert!(reg.user.phone.is_none());
        assert_eq!(reg.token_type, "Bearer");

        let login = svc
            .login(&LoginRequest {
                email: "DAISY@example.com".into(),
                password: "peonies4ever".into(),
            })
            .await
            .unwrap();
        assert_eq!(login.user.id, reg.user.id);
        let claims = svc.issuer().validate(&login.access_token).unwrap();
        assert_eq!(claims.sub, reg.user.id);
    }

    #[tokio::test]
    async fn duplicate_registration_is_conflict() {
        let svc = test_service(Database::in_memory().await);
        svc.register(&registration("dup@example.com")).await.unwrap();
        let err = svc.register(&registration("dup@example.com")).await.unwrap_err();
        assert_eq!(err.kind().http_status(), 409);
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let svc = test_service(Database::in_memory().await);
        svc.register(&registration("w@example.com")).await.unwrap();
        let err = svc
            .login(&LoginRequest {
                email: "w@example.com".into(),
                password: "nope12345".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn refresh_rotates_and_old_token_dies() {
        let svc = test_service(Database::in_memory().await);
        let first = svc.register(&registration("rot@example.com")).await.unwrap();

        let second = svc.refresh(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert_eq!(second.user.id, first.user.id);

        let err = svc.refresh(&first.refresh_token).await.unwrap_err();
        assert_eq!(err.kind().http_status(), 401);
    }

    #[tokio::test]
    async fn reuse_revokes_whole_family() {
        let svc = test_service(Database::in_memory().await);
        let first = svc.register(&registration("fam@example.com")).await.unwrap();
        let second = svc.refresh(&first.refresh_token).await.unwrap();

        // Replaying the rotated token kills the live successor too.
        assert!(svc.refresh(&first.refresh_token).await.is_err());
        assert!(svc.refresh(&second.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn logout_revokes_and_is_idempotent() {
        let svc = test_service(Database::in_memory().await);
        let pair = svc.register(&registration("out@example.com")).await.unwrap();
        svc.logout(&pair.refresh_token).await.unwrap();
        svc.logout(&pair.refresh_token).await.unwrap();
        svc.logout("never-issued").await.unwrap();
        assert!(svc.refresh(&pair.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn logged_out_token_does_not_revoke_other_sessions() {
        let svc = test_service(Database::in_memory().await);
        let phone = svc.register(&registration("two@example.com")).await.unwrap();
        let laptop = svc
            .login(&LoginRequest {
                email: "two@example.com".into(),
                password: "peonies4ever".into(),
            })
            .await
            .unwrap();

        svc.logout(&phone.refresh_token).await.unwrap();
        let err = svc.refresh(&phone.refresh_token).await.unwrap_err();
        assert_eq!(err.kind().http_status(), 401);

        let next = svc.refresh(&laptop.refresh_token).await.unwrap();
        assert_eq!(next.user.id, laptop.user.id);
    }

    #[tokio::test]
    async fn unknown_refresh_token_is_unauthorized() {
        let svc = test_service(Database::in_memory().await);
        let err = svc.refresh("garbage").await.unwrap_err();
        assert_eq!(err.kind().code(), "UNAUTHORIZED");
    }
}
