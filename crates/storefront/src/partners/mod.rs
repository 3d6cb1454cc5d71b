//! Partner onboarding: customers apply, admins review.

use chrono::{DateTime, Utc};
use common::protocol::{
    ApplicationStatus, Notification, NotificationKind, PartnerApplication,
    PartnerApplicationRequest, Role,
};
use common::Validator;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteExecutor};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::users;
use crate::db::{parse_column, parse_uuid, Database};
use crate::error::{AppError, AppResult};
use crate::notify::{groups::user_group, NotificationHub, ADMINS};

#[derive(Debug, Clone, FromRow)]
struct ApplicationRow {
    id: i64,
    user_id: String,
    business_name: String,
    contact_phone: String,
    address: String,
    description: Option<String>,
    status: String,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    reviewed_at: Option<DateTime<Utc>>,
}

impl ApplicationRow {
    fn into_application(self) -> AppResult<PartnerApplication> {
        Ok(PartnerApplication {
            id: self.id,
            user_id: parse_uuid(&self.user_id)?,
            business_name: self.business_name,
            contact_phone: self.contact_phone,
            address: self.address,
            description: self.description,
            status: parse_column(&self.status)?,
            rejection_reason: self.rejection_reason,
            created_at: self.created_at,
            reviewed_at: self.reviewed_at,
        })
    }
}

const SELECT_APPLICATION: &str = "SELECT id, user_id, business_name, contact_phone, address, \
     description, status, rejection_reason, created_at, reviewed_at FROM partner_applications";

#[derive(Clone, Debug)]
pub struct PartnerService {
    db: Database,
    hub: NotificationHub,
}

impl PartnerService {
    pub fn new(db: Database, hub: NotificationHub) -> Self {
        Self { db, hub }
    }

    /// File an application. Partners and users with a pending application
    /// cannot apply again.
    #[instrument(skip(self, req))]
    pub async fn apply(
        &self,
        user_id: Uuid,
        req: &PartnerApplicationRequest,
    ) -> AppResult<PartnerApplication> {
        validate_application(req)?;

        let mut tx = self.db.pool().begin().await?;
        let user = users::find_by_id(&mut *tx, user_id)
            .await?
            .ok_or_else(|| AppError::unauthorized("account no longer exists"))?;
        match user.role()? {
            Role::Partner => return Err(AppError::conflict("you are already a partner")),
            Role::Admin => return Err(AppError::forbidden("administrators cannot apply")),
            Role::Customer => {}
        }
        let (pending,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM partner_applications WHERE user_id = ?1 AND status = ?2",
        )
        .bind(user_id.to_string())
        .bind(ApplicationStatus::Pending.as_str())
        .fetch_one(&mut *tx)
        .await?;
        if pending > 0 {
            return Err(AppError::conflict("you already have a pending application"));
        }

        let id = sqlx::query(
            "INSERT INTO partner_applications
             (user_id, business_name, contact_phone, address, description, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(user_id.to_string())
        .bind(req.business_name.trim())
        .bind(req.contact_phone.trim())
        .bind(req.address.trim())
        .bind(req.description.as_deref().map(str::trim).filter(|s| !s.is_empty()))
        .bind(ApplicationStatus::Pending.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        let application = find(&mut *tx, id).await?;
        tx.commit().await?;
        info!(application_id = id, "partner application submitted");

        self.hub
            .publish(
                ADMINS,
                Notification {
                    kind: NotificationKind::ApplicationSubmitted,
                    title: "New partner application".into(),
                    body: format!("{} applied to become a partner.", application.business_name),
                    order_id: None,
                    application_id: Some(id),
                    created_at: Utc::now(),
                },
            )
            .await;
        Ok(application)
    }

    pub async fn mine(&self, user_id: Uuid) -> AppResult<Vec<PartnerApplication>> {
        let sql = format!("{SELECT_APPLICATION} WHERE user_id = ?1 ORDER BY created_at DESC, id DESC");
        sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(user_id.to_string())
            .fetch_all(self.db.pool())
            .await?
            .into_iter()
            .map(ApplicationRow::into_application)
            .collect()
    }

    pub async fn list(&self, status: Option<ApplicationStatus>) -> AppResult<Vec<PartnerApplication>> {
        let mut qb = QueryBuilder::<Sqlite>::new(SELECT_APPLICATION);
        if let Some(status) = status {
            qb.push(" WHERE status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY created_at DESC, id DESC");
        let rows: Vec<ApplicationRow> = qb.build_query_as().fetch_all(self.db.pool()).await?;
        rows.into_iter().map(ApplicationRow::into_application).collect()
    }

    /// Approve a pending application and promote its owner to partner.
    #[instrument(skip(self))]
    pub async fn approve(&self, reviewer: Uuid, id: i64) -> AppResult<PartnerApplication> {
        let mut tx = self.db.pool().begin().await?;
        let current = find(&mut *tx, id).await?;
        mark_reviewed(&mut *tx, &current, reviewer, ApplicationStatus::Approved, None).await?;
        users::set_role(&mut *tx, current.user_id, Role::Partner).await?;
        let application = find(&mut *tx, id).await?;
        tx.commit().await?;
        info!(application_id = id, user_id = %application.user_id, "partner application approved");

        self.notify_applicant(&application, "Your partner application was approved.".into())
            .await;
        Ok(application)
    }

    #[instrument(skip(self, reason))]
    pub async fn reject(&self, reviewer: Uuid, id: i64, reason: &str) -> AppResult<PartnerApplication> {
        let reason = reason.trim();
        Validator::new()
            .required(reason, "reason")
            .max_len(reason, 500, "reason")
            .finish()?;

        let mut tx = self.db.pool().begin().await?;
        let current = find(&mut *tx, id).await?;
        mark_reviewed(&mut *tx, &current, reviewer, ApplicationStatus::Rejected, Some(reason)).await?;
        let application = find(&mut *tx, id).await?;
        tx.commit().await?;
        info!(application_id = id, "partner application rejected");

        self.notify_applicant(
            &application,
            format!("Your partner application was rejected: {reason}"),
        )
        .await;
        Ok(application)
    }

    async fn notify_applicant(&self, application: &PartnerApplication, body: String) {
        self.hub
            .publish(
                &user_group(application.user_id),
                Notification {
                    kind: NotificationKind::ApplicationReviewed,
                    title: format!("Application {}", application.status),
                    body,
                    order_id: None,
                    application_id: Some(application.id),
                    created_at: Utc::now(),
                },
            )
            .await;
    }
}

async fn find<'e, E: SqliteExecutor<'e>>(exec: E, id: i64) -> AppResult<PartnerApplication> {
    let sql = format!("{SELECT_APPLICATION} WHERE id = ?1");
    sqlx::query_as::<_, ApplicationRow>(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?
        .ok_or_else(|| AppError::not_found(format!("application {id} not found")))?
        .into_application()
}

async fn mark_reviewed<'e, E: SqliteExecutor<'e>>(
    exec: E,
    current: &PartnerApplication,
    reviewer: Uuid,
    outcome: ApplicationStatus,
    reason: Option<&str>,
) -> AppResult<()> {
    if current.status != ApplicationStatus::Pending {
        return Err(AppError::conflict(format!(
            "application {} has already been {}",
            current.id,
            current.status.as_str().to_lowercase()
        )));
    }
    let result = sqlx::query(
        "UPDATE partner_applications
         SET status = ?1, rejection_reason = ?2, reviewed_at = ?3, reviewed_by = ?4
         WHERE id = ?5 AND status = ?6",
    )
    .bind(outcome.as_str())
    .bind(reason)
    .bind(Utc::now())
    .bind(reviewer.to_string())
    .bind(current.id)
    .bind(ApplicationStatus::Pending.as_str())
    .execute(exec)
    .await?;
    // Another reviewer decided between our read and this write.
    if result.rows_affected() != 1 {
        return Err(AppError::conflict(format!(
            "application {} has already been reviewed",
            current.id
        )));
    }
    Ok(())
}

fn validate_application(req: &PartnerApplicationRequest) -> AppResult<()> {
    Validator::new()
        .required(&req.business_name, "business_name")
        .max_len(&req.business_name, 120, "business_name")
        .required(&req.contact_phone, "contact_phone")
        .max_len(&req.contact_phone, 30, "contact_phone")
        .check(
            req.contact_phone
                .trim()
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')')),
            "contact_phone",
            "may contain only digits, spaces and + - ( )",
        )
        .required(&req.address, "address")
        .max_len(&req.address, 500, "address")
        .max_len(req.description.as_deref().unwrap_or(""), 2000, "description")
        .finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::users::NewUser;

    async fn setup() -> (PartnerService, NotificationHub, Uuid, Uuid) {
        let db = Database::in_memory().await;
        let mut ids = Vec::new();
        for (email, role) in [("shop@example.com", Role::Customer), ("admin@example.com", Role::Admin)] {
            let row = users::insert(
                db.pool(),
                &NewUser {
                    email,
                    password_hash: "h",
                    full_name: "Someone",
                    phone: None,
                    role,
                },
            )
            .await
            .unwrap();
            ids.push(row.user_id().unwrap());
        }
        let hub = NotificationHub::new(8);
        (PartnerService::new(db, hub.clone()), hub, ids[0], ids[1])
    }

    fn request() -> PartnerApplicationRequest {
        PartnerApplicationRequest {
            business_name: "Petal Express".into(),
            contact_phone: "+1 (555) 010-2000".into(),
            address: "12 Market St".into(),
            description: Some("Same-day delivery downtown".into()),
        }
    }

    #[tokio::test]
    async fn approve_promotes_and_notifies() {
        let (svc, hub, customer, admin) = setup().await;
        let mut admins = hub.subscribe(ADMINS).await;
        let mut mine = hub.subscribe(&user_group(customer)).await;

        let app = svc.apply(customer, &request()).await.unwrap();
        assert_eq!(app.status, ApplicationStatus::Pending);
        assert_eq!(admins.recv().await.unwrap().kind, NotificationKind::ApplicationSubmitted);

        let approved = svc.approve(admin, app.id).await.unwrap();
        assert_eq!(approved.status, ApplicationStatus::Approved);
        assert!(approved.reviewed_at.is_some());
        assert_eq!(mine.recv().await.unwrap().kind, NotificationKind::ApplicationReviewed);

        let user = users::find_by_id(svc.db.pool(), customer).await.unwrap().unwrap();
        assert_eq!(user.role().unwrap(), Role::Partner);

        let err = svc.apply(customer, &request()).await.unwrap_err();
        assert_eq!(err.kind().code(), "CONFLICT");
        let err = svc.reject(admin, app.id, "late").await.unwrap_err();
        assert_eq!(err.kind().code(), "CONFLICT");
    }

    #[tokio::test]
    async fn approving_twice_conflicts_without_side_effects() {
        let (svc, hub, customer, admin) = setup().await;
        let app = svc.apply(customer, &request()).await.unwrap();
        svc.approve(admin, app.id).await.unwrap();

        let err = svc.approve(admin, app.id).await.unwrap_err();
        assert_eq!(err.kind().code(), "CONFLICT");

        // A reviewer still holding the pending snapshot loses the guarded update.
        let mut mine = hub.subscribe(&user_group(customer)).await;
        let stale = PartnerApplication {
            status: ApplicationStatus::Pending,
            ..svc.mine(customer).await.unwrap().remove(0)
        };
        let err = mark_reviewed(svc.db.pool(), &stale, admin, ApplicationStatus::Rejected, Some("late"))
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "CONFLICT");

        let stored = svc.mine(customer).await.unwrap().remove(0);
        assert_eq!(stored.status, ApplicationStatus::Approved);
        assert!(stored.rejection_reason.is_none());
        assert!(mine.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_pending_application_conflicts() {
        let (svc, _, customer, _) = setup().await;
        svc.apply(customer, &request()).await.unwrap();
        let err = svc.apply(customer, &request()).await.unwrap_err();
        assert_eq!(err.kind().http_status(), 409);
    }

    #[tokio::test]
    async fn rejected_applicant_may_reapply() {
        let (svc, _, customer, admin) = setup().await;
        let first = svc.apply(customer, &request()).await.unwrap();

        let err = svc.reject(admin, first.id, "  ").await.unwrap_err();
        assert!(err.kind().field_errors().unwrap().contains_key("reason"));

        let rejected = svc.reject(admin, first.id, "Outside delivery area").await.unwrap();
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Outside delivery area"));

        svc.apply(customer, &request()).await.unwrap();
        assert_eq!(svc.mine(customer).await.unwrap().len(), 2);
        assert_eq!(svc.list(Some(ApplicationStatus::Pending)).await.unwrap().len(), 1);
        assert_eq!(svc.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_application_reports_fields() {
        let (svc, _, customer, _) = setup().await;
        let err = svc
            .apply(
                customer,
                &PartnerApplicationRequest {
                    business_name: String::new(),
                    contact_phone: "call me".into(),
                    address: "x".into(),
                    description: None,
                },
            )
            .await
            .unwrap_err();
        let fields = err.kind().field_errors().unwrap();
        assert!(fields.contains_key("business_name"));
        assert!(fields.contains_key("contact_phone"));
    }

    #[tokio::test]
    async fn unknown_application_is_not_found() {
        let (svc, _, _, admin) = setup().await;
        assert_eq!(svc.approve(admin, 77).await.unwrap_err().kind().http_status(), 404);
    }
}
