//! Idempotent schema bootstrap.

use sqlx::SqlitePool;
use tracing::{debug, info, instrument};

const STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE COLLATE NOCASE,
        password_hash TEXT NOT NULL,
        full_name TEXT NOT NULL,
        phone TEXT,
        role TEXT NOT NULL CHECK (role IN ('Admin', 'Customer', 'Partner')),
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS refresh_tokens (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        token_hash TEXT NOT NULL UNIQUE,
        expires_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        revoked_at TEXT,
        replaced_by_hash TEXT
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens(user_id)",
    r"
    CREATE TABLE IF NOT EXISTS occasions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE COLLATE NOCASE,
        description TEXT,
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS bouquets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        occasion_id INTEGER NOT NULL REFERENCES occasions(id) ON DELETE RESTRICT,
        name TEXT NOT NULL,
        description TEXT,
        price_cents INTEGER NOT NULL CHECK (price_cents > 0),
        is_available BOOLEAN NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_bouquets_occasion ON bouquets(occasion_id)",
    r"
    CREATE TABLE IF NOT EXISTS images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bouquet_id INTEGER NOT NULL REFERENCES bouquets(id) ON DELETE CASCADE,
        url TEXT NOT NULL,
        is_primary BOOLEAN NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_images_bouquet ON images(bouquet_id)",
    r"
    CREATE TABLE IF NOT EXISTS orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL REFERENCES users(id),
        status TEXT NOT NULL,
        total_cents INTEGER NOT NULL,
        currency TEXT NOT NULL,
        recipient_name TEXT NOT NULL,
        delivery_address TEXT NOT NULL,
        delivery_date TEXT,
        card_message TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)",
    r"
    CREATE TABLE IF NOT EXISTS order_details (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
        bouquet_id INTEGER NOT NULL REFERENCES bouquets(id),
        bouquet_name TEXT NOT NULL,
        unit_price_cents INTEGER NOT NULL,
        quantity INTEGER NOT NULL CHECK (quantity > 0)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_order_details_order ON order_details(order_id)",
    r"
    CREATE TABLE IF NOT EXISTS partner_applications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        business_name TEXT NOT NULL,
        contact_phone TEXT NOT NULL,
        address TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL,
        rejection_reason TEXT,
        created_at TEXT NOT NULL,
        reviewed_at TEXT,
        reviewed_by TEXT REFERENCES users(id)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_partner_applications_user ON partner_applications(user_id)",
    r"
    CREATE TABLE IF NOT EXISTS paypal_transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
        provider_order_id TEXT NOT NULL UNIQUE,
        capture_id TEXT,
        status TEXT NOT NULL,
        amount_cents INTEGER NOT NULL,
        currency TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_paypal_transactions_order ON paypal_transactions(order_id)",
];

/// Execute every `CREATE ... IF NOT EXISTS` statement in order.
#[instrument(skip(pool))]
pub(crate) async fn create_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    debug!(count = STATEMENTS.len(), "ensuring schema");
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("database schema ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let db = Database::in_memory().await;
        db.migrate().await.unwrap();
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(count, 9);
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let db = Database::in_memory().await;
        let result = sqlx::query(
            "INSERT INTO images (bouquet_id, url, is_primary, created_at) VALUES (999, 'x', 0, '2024-01-01')",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_err());
    }
}
