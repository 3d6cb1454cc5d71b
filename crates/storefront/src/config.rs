//! Configuration loading and validation for the storefront service.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Minimum length of the HS256 signing secret, in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Validated storefront service configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// sqlx connection string for the SQLite database.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Port the HTTP server listens on.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// HS256 secret used to sign access tokens. **Required.**
    pub jwt_secret: String,

    /// Access token lifetime in seconds.
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_secs: i64,

    /// Refresh token lifetime in seconds.
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl_secs: i64,

    /// PayPal REST API base URL (sandbox or live).
    #[serde(default = "default_paypal_base_url")]
    pub paypal_base_url: String,

    /// PayPal REST app client id. **Required.**
    pub paypal_client_id: String,

    /// PayPal REST app secret. **Required.**
    pub paypal_client_secret: String,

    /// ISO 4217 currency all prices are expressed in.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Comma-separated list of browser origins allowed by CORS. Empty disables CORS.
    #[serde(default)]
    pub cors_allowed_origins: String,

    /// Email of the admin account seeded at startup.
    #[serde(default)]
    pub admin_email: Option<String>,

    /// Password of the admin account seeded at startup.
    #[serde(default)]
    pub admin_password: Option<String>,

    /// OTLP endpoint. When unset, only structured logs are emitted.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Per-group capacity of the notification hub broadcast channels.
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

// Secrets stay out of logs even when the config is printed with `{:?}`.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("http_port", &self.http_port)
            .field("jwt_secret", &"[REDACTED]")
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("paypal_base_url", &self.paypal_base_url)
            .field("paypal_client_id", &self.paypal_client_id)
            .field("paypal_client_secret", &"[REDACTED]")
            .field("currency", &self.currency)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("admin_email", &self.admin_email)
            .field("otel_exporter_otlp_endpoint", &self.otel_exporter_otlp_endpoint)
            .field("log_level", &self.log_level)
            .field("notification_buffer", &self.notification_buffer)
            .finish()
    }
}

fn default_database_url() -> String {
    "sqlite://storefront.db?mode=rwc".into()
}
fn default_http_port() -> u16 {
    8080
}
fn default_access_token_ttl() -> i64 {
    900
}
fn default_refresh_token_ttl() -> i64 {
    7 * 24 * 3600
}
fn default_paypal_base_url() -> String {
    "https://api-m.sandbox.paypal.com".into()
}
fn default_currency() -> String {
    "USD".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_notification_buffer() -> usize {
    64
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.database_url, "DATABASE_URL")?;
        ensure_non_empty(&self.paypal_base_url, "PAYPAL_BASE_URL")?;
        ensure_non_empty(&self.paypal_client_id, "PAYPAL_CLIENT_ID")?;
        ensure_non_empty(&self.paypal_client_secret, "PAYPAL_CLIENT_SECRET")?;

        if self.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            anyhow::bail!("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} bytes");
        }
        if self.access_token_ttl_secs <= 0 {
            anyhow::bail!("ACCESS_TOKEN_TTL_SECS must be > 0");
        }
        if self.refresh_token_ttl_secs <= self.access_token_ttl_secs {
            anyhow::bail!("REFRESH_TOKEN_TTL_SECS must be greater than ACCESS_TOKEN_TTL_SECS");
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            anyhow::bail!("CURRENCY must be a three-letter ISO 4217 code");
        }
        if self.notification_buffer == 0 {
            anyhow::bail!("NOTIFICATION_BUFFER must be > 0");
        }
        if self.admin_email.is_some() != self.admin_password.is_some() {
            anyhow::bail!("ADMIN_EMAIL and ADMIN_PASSWORD must be set together");
        }
        Ok(())
    }

    /// Parsed list of CORS origins.
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".into(),
        http_port: default_http_port(),
        jwt_secret: "test-secret-test-secret-test-secret!!".into(),
        access_token_ttl_secs: default_access_token_ttl(),
        refresh_token_ttl_secs: default_refresh_token_ttl(),
        paypal_base_url: default_paypal_base_url(),
        paypal_client_id: "client".into(),
        paypal_client_secret: "secret".into(),
        currency: default_currency(),
        cors_allowed_origins: String::new(),
        admin_email: None,
        admin_password: None,
        otel_exporter_otlp_endpoint: None,
        log_level: default_log_level(),
        notification_buffer: default_notification_buffer(),
    }
}
