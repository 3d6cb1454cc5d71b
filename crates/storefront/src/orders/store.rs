//! Order, order line and payment transaction rows.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use common::protocol::{Order, OrderLine, OrderStatus};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::db::{parse_column, parse_uuid};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub user_id: String,
    pub status: String,
    pub total_cents: i64,
    pub currency: String,
    pub recipient_name: String,
    pub delivery_address: String,
    pub delivery_date: Option<NaiveDate>,
    pub card_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRow {
    pub fn status(&self) -> AppResult<OrderStatus> {
        parse_column(&self.status)
    }

    pub fn into_order(self, lines: Vec<OrderLine>) -> AppResult<Order> {
        Ok(Order {
            id: self.id,
            user_id: parse_uuid(&self.user_id)?,
            status: parse_column(&self.status)?,
            total_cents: self.total_cents,
            currency: self.currency,
            recipient_name: self.recipient_name,
            delivery_address: self.delivery_address,
            delivery_date: self.delivery_date,
            card_message: self.card_message,
            lines,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct LineRow {
    order_id: i64,
    bouquet_id: i64,
    bouquet_name: String,
    unit_price_cents: i64,
    quantity: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct TransactionRow {
    pub id: i64,
    pub order_id: i64,
    pub provider_order_id: String,
    pub capture_id: Option<String>,
    pub status: String,
}

/// A priced line, snapshotting the bouquet name and price at checkout.
#[derive(Debug, Clone)]
pub struct NewLine {
    pub bouquet_id: i64,
    pub bouquet_name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
}

pub struct NewOrder<'a> {
    pub user_id: Uuid,
    pub total_cents: i64,
    pub currency: &'a str,
    pub recipient_name: &'a str,
    pub delivery_address: &'a str,
    pub delivery_date: Option<NaiveDate>,
    pub card_message: Option<&'a str>,
    pub lines: &'a [NewLine],
}

const SELECT_ORDER: &str = "SELECT id, user_id, status, total_cents, currency, recipient_name, \
     delivery_address, delivery_date, card_message, created_at, updated_at FROM orders";

/// Insert a pending order together with its lines, atomically.
pub async fn insert_order(pool: &SqlitePool, order: &NewOrder<'_>) -> AppResult<i64> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let id = sqlx::query(
        "INSERT INTO orders (user_id, status, total_cents, currency, recipient_name, delivery_address,
         delivery_date, card_message, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
    )
    .bind(order.user_id.to_string())
    .bind(OrderStatus::Pending.as_str())
    .bind(order.total_cents)
    .bind(order.currency)
    .bind(order.recipient_name)
    .bind(order.delivery_address)
    .bind(order.delivery_date)
    .bind(order.card_message)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for line in order.lines {
        sqlx::query(
            "INSERT INTO order_details (order_id, bouquet_id, bouquet_name, unit_price_cents, quantity)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(id)
        .bind(line.bouquet_id)
        .bind(&line.bouquet_name)
        .bind(line.unit_price_cents)
        .bind(i64::from(line.quantity))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(id)
}

pub async fn delete_order<'e, E: SqliteExecutor<'e>>(exec: E, id: i64) -> AppResult<()> {
    sqlx::query("DELETE FROM orders WHERE id = ?1")
        .bind(id)
        .execute(exec)
        .await?;
    Ok(())
}

pub async fn find_order<'e, E: SqliteExecutor<'e>>(exec: E, id: i64) -> AppResult<Option<OrderRow>> {
    let sql = format!("{SELECT_ORDER} WHERE id = ?1");
    Ok(sqlx::query_as::<_, OrderRow>(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?)
}

/// Orders newest first, optionally restricted to one owner and a status set.
pub async fn list_orders<'e, E: SqliteExecutor<'e>>(
    exec: E,
    owner: Option<Uuid>,
    statuses: &[OrderStatus],
) -> AppResult<Vec<OrderRow>> {
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_ORDER);
    qb.push(" WHERE 1 = 1");
    if let Some(owner) = owner {
        qb.push(" AND user_id = ").push_bind(owner.to_string());
    }
    if !statuses.is_empty() {
        qb.push(" AND status IN (");
        let mut sep = qb.separated(", ");
        for s in statuses {
            sep.push_bind(s.as_str());
        }
        sep.push_unseparated(")");
    }
    qb.push(" ORDER BY created_at DESC, id DESC");
    Ok(qb.build_query_as().fetch_all(exec).await?)
}

/// Lines of every order in `order_ids`, keyed by order id.
pub async fn lines_for<'e, E: SqliteExecutor<'e>>(
    exec: E,
    order_ids: &[i64],
) -> AppResult<HashMap<i64, Vec<OrderLine>>> {
    let mut out: HashMap<i64, Vec<OrderLine>> = HashMap::new();
    if order_ids.is_empty() {
        return Ok(out);
    }
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT order_id, bouquet_id, bouquet_name, unit_price_cents, quantity \
         FROM order_details WHERE order_id IN (",
    );
    let mut sep = qb.separated(", ");
    for id in order_ids {
        sep.push_bind(*id);
    }
    sep.push_unseparated(") ORDER BY id");
    let rows: Vec<LineRow> = qb.build_query_as().fetch_all(exec).await?;
    for r in rows {
        let quantity = u32::try_from(r.quantity)
            .map_err(|_| AppError::unexpected(format!("corrupt quantity on order {}", r.order_id)))?;
        out.entry(r.order_id).or_default().push(OrderLine {
            bouquet_id: r.bouquet_id,
            bouquet_name: r.bouquet_name,
            unit_price_cents: r.unit_price_cents,
            quantity,
            line_total_cents: r.unit_price_cents * r.quantity,
        });
    }
    Ok(out)
}

pub async fn attach_lines(pool: &SqlitePool, rows: Vec<OrderRow>) -> AppResult<Vec<Order>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut lines = lines_for(pool, &ids).await?;
    rows.into_iter()
        .map(|r| {
            let l = lines.remove(&r.id).unwrap_or_default();
            r.into_order(l)
        })
        .collect()
}

/// Move an order from `from` to `to`. Returns `false` when the order was not
/// in `from` any more.
pub async fn transition<'e, E: SqliteExecutor<'e>>(
    exec: E,
    id: i64,
    from: OrderStatus,
    to: OrderStatus,
) -> AppResult<bool> {
    let result = sqlx::query("UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4")
        .bind(to.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(from.as_str())
        .execute(exec)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn insert_transaction<'e, E: SqliteExecutor<'e>>(
    exec: E,
    order_id: i64,
    provider_order_id: &str,
    status: &str,
    amount_cents: i64,
    currency: &str,
) -> AppResult<i64> {
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO paypal_transactions (order_id, provider_order_id, status, amount_cents, currency, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
    )
    .bind(order_id)
    .bind(provider_order_id)
    .bind(status)
    .bind(amount_cents)
    .bind(currency)
    .bind(now)
    .execute(exec)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// The latest transaction of `order_id` that can still be captured.
pub async fn open_transaction<'e, E: SqliteExecutor<'e>>(
    exec: E,
    order_id: i64,
) -> AppResult<Option<TransactionRow>> {
    Ok(sqlx::query_as::<_, TransactionRow>(
        "SELECT id, order_id, provider_order_id, capture_id, status FROM paypal_transactions
         WHERE order_id = ?1 AND status = ?2 ORDER BY id DESC LIMIT 1",
    )
    .bind(order_id)
    .bind(super::txn_status::CREATED)
    .fetch_optional(exec)
    .await?)
}

pub async fn set_transaction_status<'e, E: SqliteExecutor<'e>>(
    exec: E,
    id: i64,
    status: &str,
    capture_id: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE paypal_transactions SET status = ?1, capture_id = coalesce(?2, capture_id), updated_at = ?3
         WHERE id = ?4",
    )
    .bind(status)
    .bind(capture_id)
    .bind(Utc::now())
    .bind(id)
    .execute(exec)
    .await?;
    Ok(())
}
