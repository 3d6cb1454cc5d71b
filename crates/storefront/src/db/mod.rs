//! SQLite persistence: connection pool, schema bootstrap, row helpers.

pub mod schema;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Cheaply cloneable handle to the connection pool.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open a pool for `url` with foreign keys enforced.
    ///
    /// In-memory databases are pinned to a single long-lived connection, since
    /// every SQLite connection to `:memory:` opens a distinct database.
    #[instrument(skip_all)]
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let in_memory = url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(url)?
            .foreign_keys(true)
            .create_if_missing(true);

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(8)
                .acquire_timeout(Duration::from_secs(5))
        };

        let pool = pool_options.connect_with(options).await?;
        info!(in_memory, "database pool opened");
        Ok(Self { pool })
    }

    /// Create every table and index that does not exist yet.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        schema::create_tables(&self.pool).await
    }

    /// Fresh, migrated in-memory database.
    #[cfg(test)]
    pub async fn in_memory() -> Self {
        let db = Self::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `true` when the database answers a trivial query.
    pub async fn ping(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "database ping failed");
                false
            }
        }
    }
}

/// Parse a user id stored as hyphenated text.
pub(crate) fn parse_uuid(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| AppError::unexpected(format!("corrupt user id {raw:?}: {e}")))
}

/// Parse a text-encoded enum column.
pub(crate) fn parse_column<T>(raw: &str) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| AppError::unexpected(format!("corrupt column value: {e}")))
}
