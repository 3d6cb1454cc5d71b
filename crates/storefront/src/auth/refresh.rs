//! Opaque refresh tokens: generation, hashing and the stored revocable record.
//!
//! Only the SHA-256 digest of a token is persisted. A record is live while
//! `revoked_at` is unset and `expires_at` lies in the future.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqliteExecutor};
use uuid::Uuid;

use crate::db::parse_uuid;
use crate::error::AppResult;

/// Entropy of a refresh token in bytes.
const TOKEN_BYTES: usize = 48;

/// New random refresh token, URL-safe base64 without padding.
pub fn generate() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Digest under which a token is stored and looked up.
pub fn hash(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

#[derive(Debug, Clone, FromRow)]
pub struct RefreshRecord {
    pub id: i64,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_hash: Option<String>,
}

impl RefreshRecord {
    pub fn user_id(&self) -> AppResult<Uuid> {
        parse_uuid(&self.user_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

pub async fn insert<'e, E: SqliteExecutor<'e>>(
    exec: E,
    user_id: Uuid,
    token_hash: &str,
    expires_at: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO refresh_tokens (user_id, token_hash, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(user_id.to_string())
    .bind(token_hash)
    .bind(expires_at)
    .bind(Utc::now())
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn find_by_hash<'e, E: SqliteExecutor<'e>>(
    exec: E,
    token_hash: &str,
) -> AppResult<Option<RefreshRecord>> {
    Ok(sqlx::query_as::<_, RefreshRecord>(
        "SELECT id, user_id, token_hash, expires_at, created_at, revoked_at, replaced_by_hash
         FROM refresh_tokens WHERE token_hash = ?1",
    )
    .bind(token_hash)
    .fetch_optional(exec)
    .await?)
}

/// Revoke one record, recording its successor when rotating.
/// Returns `false` if it was already revoked.
pub async fn revoke<'e, E: SqliteExecutor<'e>>(
    exec: E,
    id: i64,
    replaced_by_hash: Option<&str>,
) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE refresh_tokens SET revoked_at = ?1, replaced_by_hash = ?2
         WHERE id = ?3 AND revoked_at IS NULL",
    )
    .bind(Utc::now())
    .bind(replaced_by_hash)
    .bind(id)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Revoke every live record of `user_id`. Returns the number revoked.
pub async fn revoke_all_for_user<'e, E: SqliteExecutor<'e>>(exec: E, user_id: Uuid) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE refresh_tokens SET revoked_at = ?1 WHERE user_id = ?2 AND revoked_at IS NULL",
    )
    .bind(Utc::now())
    .bind(user_id.to_string())
    .execute(exec)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::users::{self, NewUser};
    use crate::db::Database;
    use chrono::Duration;
    use common::protocol::Role;

    async fn user(db: &Database) -> Uuid {
        users::insert(
            db.pool(),
            &NewUser {
                email: "r@example.com",
                password_hash: "h",
                full_name: "R",
                phone: None,
                role: Role::Customer,
            },
        )
        .await
        .unwrap()
        .user_id()
        .unwrap()
    }

    #[test]
    fn generated_tokens_differ_and_hash_is_stable() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(hash(&a), hash(&a));
        assert_ne!(hash(&a), a);
    }

    #[tokio::test]
    async fn revoke_is_single_shot() {
        let db = Database::in_memory().await;
        let uid = user(&db).await;
        let h = hash("token-one");
        insert(db.pool(), uid, &h, Utc::now() + Duration::days(1)).await.unwrap();

        let rec = find_by_hash(db.pool(), &h).await.unwrap().unwrap();
        assert!(rec.revoked_at.is_none());
        assert!(revoke(db.pool(), rec.id, Some("next")).await.unwrap());
        assert!(!revoke(db.pool(), rec.id, None).await.unwrap());

        let rec = find_by_hash(db.pool(), &h).await.unwrap().unwrap();
        assert!(rec.revoked_at.is_some());
        assert_eq!(rec.replaced_by_hash.as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn revoke_all_only_touches_live_records() {
        let db = Database::in_memory().await;
        let uid = user(&db).await;
        let expiry = Utc::now() + Duration::days(1);
        insert(db.pool(), uid, &hash("a"), expiry).await.unwrap();
        insert(db.pool(), uid, &hash("b"), expiry).await.unwrap();
        let rec = find_by_hash(db.pool(), &hash("a")).await.unwrap().unwrap();
        revoke(db.pool(), rec.id, None).await.unwrap();

        assert_eq!(revoke_all_for_user(db.pool(), uid).await.unwrap(), 1);
    }

    #[test]
    fn expiry_check() {
        let now = Utc::now();
        let rec = RefreshRecord {
            id: 1,
            user_id: Uuid::new_v4().to_string(),
            token_hash: "h".into(),
            expires_at: now - Duration::seconds(1),
            created_at: now - Duration::days(7),
            revoked_at: None,
            replaced_by_hash: None,
        };
        assert!(rec.is_expired(now));
    }
}
