//! Startup seeding of the administrator account.

use common::protocol::Role;
use tracing::{info, warn};

use crate::auth::{users, AuthService};
use crate::config::Config;
use crate::db::Database;
use crate::error::AppResult;

/// Create the configured admin account if no account uses its email.
///
/// Does nothing when no admin credentials are configured. An existing account
/// with the same email is left as it is.
pub async fn ensure_admin(cfg: &Config, db: &Database, auth: &AuthService) -> AppResult<()> {
    let (Some(email), Some(password)) = (cfg.admin_email.as_deref(), cfg.admin_password.as_deref())
    else {
        warn!("ADMIN_EMAIL not set; no administrator account seeded");
        return Ok(());
    };

    match users::find_by_email(db.pool(), email).await? {
        Some(existing) if existing.role()? == Role::Admin => {
            info!(email, "administrator account present");
        }
        Some(existing) => {
            warn!(email, role = %existing.role, "ADMIN_EMAIL belongs to a non-admin account; not changed");
        }
        None => {
            auth.create_account(email, password, "Administrator", Role::Admin)
                .await?;
            info!(email, "administrator account created");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_service;
    use crate::config::test_config;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let db = Database::in_memory().await;
        let auth = test_service(db.clone());
        let mut cfg = test_config();
        cfg.admin_email = Some("root@example.com".into());
        cfg.admin_password = Some("changeme123".into());

        ensure_admin(&cfg, &db, &auth).await.unwrap();
        ensure_admin(&cfg, &db, &auth).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'Admin'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn existing_customer_is_left_alone() {
        let db = Database::in_memory().await;
        let auth = test_service(db.clone());
        auth.create_account("boss@example.com", "pw123456", "Boss", Role::Customer)
            .await
            .unwrap();
        let mut cfg = test_config();
        cfg.admin_email = Some("boss@example.com".into());
        cfg.admin_password = Some("ignored1".into());

        ensure_admin(&cfg, &db, &auth).await.unwrap();
        let user = users::find_by_email(db.pool(), "boss@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.role().unwrap(), Role::Customer);
    }

    #[tokio::test]
    async fn missing_credentials_skip_seeding() {
        let db = Database::in_memory().await;
        let auth = test_service(db.clone());
        ensure_admin(&test_config(), &db, &auth).await.unwrap();
        assert!(users::find_by_email(db.pool(), "root@example.com").await.unwrap().is_none());
    }
}
