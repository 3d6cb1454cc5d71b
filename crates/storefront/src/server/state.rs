//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::auth::{jwt::TokenIssuer, password::PasswordHasher, AuthService};
use crate::catalog::{CatalogService, OccasionCache};
use crate::config::Config;
use crate::db::Database;
use crate::notify::NotificationHub;
use crate::orders::OrderService;
use crate::partners::PartnerService;
use crate::payment::PaymentGateway;

/// Application state shared across all request handlers.
///
/// Every field is a cheap clone over shared internals.
#[derive(Clone, Debug)]
pub struct AppState {
    pub db: Database,
    pub auth: AuthService,
    pub catalog: CatalogService,
    pub orders: OrderService,
    pub partners: PartnerService,
    pub hub: NotificationHub,
    /// Browser origins allowed by CORS.
    pub cors_origins: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(cfg: &Config, db: Database, payments: Arc<dyn PaymentGateway>) -> Self {
        let issuer = Arc::new(TokenIssuer::new(
            cfg.jwt_secret.as_bytes(),
            cfg.access_token_ttl_secs,
        ));
        let auth = AuthService::new(
            db.clone(),
            issuer,
            PasswordHasher::default(),
            cfg.refresh_token_ttl_secs,
        );
        Self::with_auth(cfg, db, auth, payments)
    }

    fn with_auth(
        cfg: &Config,
        db: Database,
        auth: AuthService,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        let hub = NotificationHub::new(cfg.notification_buffer);
        Self {
            catalog: CatalogService::new(db.clone(), OccasionCache::new()),
            orders: OrderService::new(db.clone(), payments, hub.clone(), cfg.currency.clone()),
            partners: PartnerService::new(db.clone(), hub.clone()),
            auth,
            hub,
            db,
            cors_origins: Arc::new(cfg.cors_origins()),
        }
    }

    /// State over a fresh in-memory database with a cheap password hasher.
    #[cfg(test)]
    pub(crate) async fn for_tests(payments: Arc<dyn PaymentGateway>) -> Self {
        let db = Database::in_memory().await;
        let auth = crate::auth::test_service(db.clone());
        Self::with_auth(&crate::config::test_config(), db, auth, payments)
    }
}
