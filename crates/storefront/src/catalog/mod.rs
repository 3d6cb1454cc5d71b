//! Product catalog: occasions, bouquets and their images.

pub mod cache;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use common::protocol::{
    Bouquet, BouquetQuery, BouquetRequest, Image, ImageRequest, Occasion, OccasionRequest, Page,
};
use common::Validator;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteExecutor};
use tracing::{debug, info, instrument};

use crate::db::Database;
use crate::error::{AppError, AppResult};
pub use cache::OccasionCache;

pub const DEFAULT_PAGE_SIZE: u32 = 12;
pub const MAX_PAGE_SIZE: u32 = 100;
/// Upper bound on a single bouquet price, in cents.
const MAX_PRICE_CENTS: i64 = 10_000_000;

#[derive(Debug, Clone, FromRow)]
struct OccasionRow {
    id: i64,
    name: String,
    description: Option<String>,
}

impl From<OccasionRow> for Occasion {
    fn from(r: OccasionRow) -> Self {
        Occasion {
            id: r.id,
            name: r.name,
            description: r.description,
        }
    }
}

/// A bouquet row without its images.
#[derive(Debug, Clone, FromRow)]
pub struct BouquetRow {
    pub id: i64,
    pub occasion_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub is_available: bool,
}

impl BouquetRow {
    fn into_bouquet(self, images: Vec<Image>) -> Bouquet {
        Bouquet {
            id: self.id,
            occasion_id: self.occasion_id,
            name: self.name,
            description: self.description,
            price_cents: self.price_cents,
            is_available: self.is_available,
            images,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct ImageRow {
    id: i64,
    bouquet_id: i64,
    url: String,
    is_primary: bool,
}

impl From<ImageRow> for Image {
    fn from(r: ImageRow) -> Self {
        Image {
            id: r.id,
            bouquet_id: r.bouquet_id,
            url: r.url,
            is_primary: r.is_primary,
        }
    }
}

const SELECT_BOUQUET: &str =
    "SELECT id, occasion_id, name, description, price_cents, is_available FROM bouquets";

/// Catalog reads for the storefront and writes for admins.
#[derive(Clone, Debug)]
pub struct CatalogService {
    db: Database,
    occasions: OccasionCache,
}

impl CatalogService {
    pub fn new(db: Database, occasions: OccasionCache) -> Self {
        Self { db, occasions }
    }

    #[cfg(test)]
    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    // -----------------------------------------------------------------------
    // Occasions
    // -----------------------------------------------------------------------

    /// All occasions ordered by name, served from the cache when warm.
    pub async fn list_occasions(&self) -> AppResult<Arc<Vec<Occasion>>> {
        if let Some(snapshot) = self.occasions.get() {
            return Ok(snapshot);
        }
        let loaded = self.load_occasions().await?;
        Ok(self.occasions.fill(loaded))
    }

    async fn load_occasions(&self) -> AppResult<Vec<Occasion>> {
        let rows = sqlx::query_as::<_, OccasionRow>(
            "SELECT id, name, description FROM occasions ORDER BY name",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(Occasion::from).collect())
    }

    /// Swap a fresh list into the cache after an occasion write commits.
    async fn refresh_occasions(&self) -> AppResult<()> {
        let _writer = self.occasions.lock_writes().await;
        let loaded = self.load_occasions().await?;
        debug!(count = loaded.len(), "occasion cache reloaded");
        self.occasions.replace(loaded);
        Ok(())
    }

    pub async fn get_occasion(&self, id: i64) -> AppResult<Occasion> {
        sqlx::query_as::<_, OccasionRow>("SELECT id, name, description FROM occasions WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .map(Occasion::from)
            .ok_or_else(|| AppError::not_found(format!("occasion {id} not found")))
    }

    #[instrument(skip(self, req))]
    pub async fn create_occasion(&self, req: &OccasionRequest) -> AppResult<Occasion> {
        validate_occasion(req)?;
        let id = sqlx::query(
            "INSERT INTO occasions (name, description, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(req.name.trim())
        .bind(trimmed(&req.description))
        .bind(Utc::now())
        .execute(self.db.pool())
        .await
        .map_err(|e| unique_as_conflict(e, "an occasion with this name already exists"))?
        .last_insert_rowid();
        self.refresh_occasions().await?;
        info!(occasion_id = id, "occasion created");
        self.get_occasion(id).await
    }

    #[instrument(skip(self, req))]
    pub async fn update_occasion(&self, id: i64, req: &OccasionRequest) -> AppResult<Occasion> {
        validate_occasion(req)?;
        let result = sqlx::query("UPDATE occasions SET name = ?1, description = ?2 WHERE id = ?3")
            .bind(req.name.trim())
            .bind(trimmed(&req.description))
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(|e| unique_as_conflict(e, "an occasion with this name already exists"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("occasion {id} not found")));
        }
        self.refresh_occasions().await?;
        self.get_occasion(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_occasion(&self, id: i64) -> AppResult<()> {
        let (bouquets,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM bouquets WHERE occasion_id = ?1")
                .bind(id)
                .fetch_one(self.db.pool())
                .await?;
        if bouquets > 0 {
            return Err(AppError::conflict(format!(
                "occasion {id} still has {bouquets} bouquet(s)"
            )));
        }
        let result = sqlx::query("DELETE FROM occasions WHERE id = ?1")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("occasion {id} not found")));
        }
        self.refresh_occasions().await?;
        info!(occasion_id = id, "occasion deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bouquets
    // -----------------------------------------------------------------------

    pub async fn list_bouquets(&self, query: &BouquetQuery) -> AppResult<Page<Bouquet>> {
        let page = query.page.unwrap_or(1);
        let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        Validator::new()
            .check(page >= 1, "page", "must be at least 1")
            .check(
                (1..=MAX_PAGE_SIZE).contains(&page_size),
                "page_size",
                "must be between 1 and 100",
            )
            .finish()?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM bouquets");
        push_filters(&mut count, query);
        let (total,): (i64,) = count.build_query_as().fetch_one(self.db.pool()).await?;

        let mut select = QueryBuilder::<Sqlite>::new(SELECT_BOUQUET);
        push_filters(&mut select, query);
        select
            .push(" ORDER BY name, id LIMIT ")
            .push_bind(i64::from(page_size))
            .push(" OFFSET ")
            .push_bind(i64::from(page - 1) * i64::from(page_size));
        let rows: Vec<BouquetRow> = select.build_query_as().fetch_all(self.db.pool()).await?;

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut images = load_images(self.db.pool(), &ids).await?;
        let items = rows
            .into_iter()
            .map(|r| {
                let imgs = images.remove(&r.id).unwrap_or_default();
                r.into_bouquet(imgs)
            })
            .collect();

        Ok(Page {
            items,
            page,
            page_size,
            total,
        })
    }

    pub async fn get_bouquet(&self, id: i64) -> AppResult<Bouquet> {
        let row = self.bouquet_row(id).await?;
        let mut images = load_images(self.db.pool(), &[id]).await?;
        Ok(row.into_bouquet(images.remove(&id).unwrap_or_default()))
    }

    async fn bouquet_row(&self, id: i64) -> AppResult<BouquetRow> {
        let sql = format!("{SELECT_BOUQUET} WHERE id = ?1");
        sqlx::query_as::<_, BouquetRow>(&sql)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::not_found(format!("bouquet {id} not found")))
    }

    #[instrument(skip(self, req))]
    pub async fn create_bouquet(&self, req: &BouquetRequest) -> AppResult<Bouquet> {
        self.validate_bouquet(req).await?;
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO bouquets (occasion_id, name, description, price_cents, is_available, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        )
        .bind(req.occasion_id)
        .bind(req.name.trim())
        .bind(trimmed(&req.description))
        .bind(req.price_cents)
        .bind(req.is_available.unwrap_or(true))
        .bind(now)
        .execute(self.db.pool())
        .await?
        .last_insert_rowid();
        info!(bouquet_id = id, "bouquet created");
        self.get_bouquet(id).await
    }

    #[instrument(skip(self, req))]
    pub async fn update_bouquet(&self, id: i64, req: &BouquetRequest) -> AppResult<Bouquet> {
        self.bouquet_row(id).await?;
        self.validate_bouquet(req).await?;
        sqlx::query(
            "UPDATE bouquets SET occasion_id = ?1, name = ?2, description = ?3, price_cents = ?4,
             is_available = COALESCE(?5, is_available), updated_at = ?6 WHERE id = ?7",
        )
        .bind(req.occasion_id)
        .bind(req.name.trim())
        .bind(trimmed(&req.description))
        .bind(req.price_cents)
        .bind(req.is_available)
        .bind(Utc::now())
        .bind(id)
        .execute(self.db.pool())
        .await?;
        self.get_bouquet(id).await
    }

    /// Delete a bouquet and, by cascade, its images. Bouquets that appear in
    /// orders are kept for the order history.
    #[instrument(skip(self))]
    pub async fn delete_bouquet(&self, id: i64) -> AppResult<()> {
        self.bouquet_row(id).await?;
        let (ordered,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM order_details WHERE bouquet_id = ?1")
                .bind(id)
                .fetch_one(self.db.pool())
                .await?;
        if ordered > 0 {
            return Err(AppError::conflict(
                "bouquet has been ordered; mark it unavailable instead",
            ));
        }
        sqlx::query("DELETE FROM bouquets WHERE id = ?1")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        info!(bouquet_id = id, "bouquet deleted");
        Ok(())
    }

    async fn validate_bouquet(&self, req: &BouquetRequest) -> AppResult<()> {
        let occasion_exists = sqlx::query("SELECT 1 FROM occasions WHERE id = ?1")
            .bind(req.occasion_id)
            .fetch_optional(self.db.pool())
            .await?
            .is_some();
        Validator::new()
            .required(&req.name, "name")
            .max_len(&req.name, 100, "name")
            .max_len(req.description.as_deref().unwrap_or(""), 2000, "description")
            .check(
                req.price_cents > 0 && req.price_cents <= MAX_PRICE_CENTS,
                "price_cents",
                "must be a positive amount",
            )
            .check(occasion_exists, "occasion_id", "does not exist")
            .finish()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Images
    // -----------------------------------------------------------------------

    /// Attach an image. A new primary image demotes any existing one.
    #[instrument(skip(self, req))]
    pub async fn add_image(&self, bouquet_id: i64, req: &ImageRequest) -> AppResult<Image> {
        self.bouquet_row(bouquet_id).await?;
        let url = req.url.trim();
        Validator::new()
            .required(url, "url")
            .max_len(url, 2048, "url")
            .check(
                url.starts_with("https://") || url.starts_with("http://") || url.starts_with('/'),
                "url",
                "must be an absolute http(s) URL or a site-relative path",
            )
            .finish()?;

        let mut tx = self.db.pool().begin().await?;
        if req.is_primary {
            sqlx::query("UPDATE images SET is_primary = 0 WHERE bouquet_id = ?1")
                .bind(bouquet_id)
                .execute(&mut *tx)
                .await?;
        }
        let id = sqlx::query(
            "INSERT INTO images (bouquet_id, url, is_primary, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(bouquet_id)
        .bind(url)
        .bind(req.is_primary)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;

        Ok(Image {
            id,
            bouquet_id,
            url: url.to_owned(),
            is_primary: req.is_primary,
        })
    }

    pub async fn delete_image(&self, id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM images WHERE id = ?1")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("image {id} not found")));
        }
        Ok(())
    }
}

/// Bouquet rows for `ids`, keyed by id. Missing ids are simply absent.
pub(crate) async fn bouquets_by_id<'e, E: SqliteExecutor<'e>>(
    exec: E,
    ids: &[i64],
) -> AppResult<HashMap<i64, BouquetRow>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_BOUQUET);
    qb.push(" WHERE id IN (");
    let mut sep = qb.separated(", ");
    for id in ids {
        sep.push_bind(*id);
    }
    sep.push_unseparated(")");
    let rows: Vec<BouquetRow> = qb.build_query_as().fetch_all(exec).await?;
    Ok(rows.into_iter().map(|r| (r.id, r)).collect())
}

async fn load_images<'e, E: SqliteExecutor<'e>>(
    exec: E,
    bouquet_ids: &[i64],
) -> AppResult<HashMap<i64, Vec<Image>>> {
    let mut out: HashMap<i64, Vec<Image>> = HashMap::new();
    if bouquet_ids.is_empty() {
        return Ok(out);
    }
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT id, bouquet_id, url, is_primary FROM images WHERE bouquet_id IN (",
    );
    let mut sep = qb.separated(", ");
    for id in bouquet_ids {
        sep.push_bind(*id);
    }
    sep.push_unseparated(") ORDER BY is_primary DESC, id");
    let rows: Vec<ImageRow> = qb.build_query_as().fetch_all(exec).await?;
    for row in rows {
        out.entry(row.bouquet_id).or_default().push(row.into());
    }
    Ok(out)
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, query: &BouquetQuery) {
    qb.push(" WHERE 1 = 1");
    if let Some(occasion_id) = query.occasion_id {
        qb.push(" AND occasion_id = ").push_bind(occasion_id);
    }
    if query.available_only.unwrap_or(false) {
        qb.push(" AND is_available = 1");
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let needle = search.to_lowercase();
        qb.push(" AND (instr(lower(name), ")
            .push_bind(needle.clone())
            .push(") > 0 OR instr(lower(coalesce(description, '')), ")
            .push_bind(needle)
            .push(") > 0)");
    }
}

fn validate_occasion(req: &OccasionRequest) -> AppResult<()> {
    Validator::new()
        .required(&req.name, "name")
        .max_len(&req.name, 80, "name")
        .max_len(req.description.as_deref().unwrap_or(""), 1000, "description")
        .finish()?;
    Ok(())
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn unique_as_conflict(e: sqlx::Error, message: &str) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::conflict(message),
        _ => e.into(),
    }
}
