//! Account rows.

use chrono::{DateTime, Utc};
use common::protocol::{Role, UserProfile};
use sqlx::{FromRow, SqliteExecutor};
use uuid::Uuid;

use crate::db::{parse_column, parse_uuid};
use crate::error::AppResult;

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn user_id(&self) -> AppResult<Uuid> {
        parse_uuid(&self.id)
    }

    pub fn role(&self) -> AppResult<Role> {
        parse_column(&self.role)
    }

    pub fn to_profile(&self) -> AppResult<UserProfile> {
        Ok(UserProfile {
            id: self.user_id()?,
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            phone: self.phone.clone(),
            role: self.role()?,
            created_at: self.created_at,
        })
    }
}

/// Fields of a new account. The password is already hashed.
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub full_name: &'a str,
    pub phone: Option<&'a str>,
    pub role: Role,
}

const SELECT_USER: &str =
    "SELECT id, email, password_hash, full_name, phone, role, created_at FROM users";

pub async fn insert<'e, E: SqliteExecutor<'e>>(exec: E, user: &NewUser<'_>) -> AppResult<UserRow> {
    let row = UserRow {
        id: Uuid::new_v4().to_string(),
        email: user.email.trim().to_lowercase(),
        password_hash: user.password_hash.to_owned(),
        full_name: user.full_name.trim().to_owned(),
        phone: user.phone.map(|p| p.trim().to_owned()),
        role: user.role.as_str().to_owned(),
        created_at: Utc::now(),
    };
    sqlx::query(
        "INSERT INTO users (id, email, password_hash, full_name, phone, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&row.id)
    .bind(&row.email)
    .bind(&row.password_hash)
    .bind(&row.full_name)
    .bind(&row.phone)
    .bind(&row.role)
    .bind(row.created_at)
    .execute(exec)
    .await?;
    Ok(row)
}

pub async fn find_by_email<'e, E: SqliteExecutor<'e>>(
    exec: E,
    email: &str,
) -> AppResult<Option<UserRow>> {
    let sql = format!("{SELECT_USER} WHERE email = ?1");
    Ok(sqlx::query_as::<_, UserRow>(&sql)
        .bind(email.trim().to_lowercase())
        .fetch_optional(exec)
        .await?)
}

pub async fn find_by_id<'e, E: SqliteExecutor<'e>>(exec: E, id: Uuid) -> AppResult<Option<UserRow>> {
    let sql = format!("{SELECT_USER} WHERE id = ?1");
    Ok(sqlx::query_as::<_, UserRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(exec)
        .await?)
}

pub async fn set_role<'e, E: SqliteExecutor<'e>>(exec: E, id: Uuid, role: Role) -> AppResult<()> {
    sqlx::query("UPDATE users SET role = ?1 WHERE id = ?2")
        .bind(role.as_str())
        .bind(id.to_string())
        .execute(exec)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn new_user(email: &str) -> NewUser<'_> {
        NewUser {
            email,
            password_hash: "$2b$04$hash",
            full_name: " Iris Green ",
            phone: None,
            role: Role::Customer,
        }
    }

    #[tokio::test]
    async fn insert_normalises_and_finds_by_email() {
        let db = Database::in_memory().await;
        let row = insert(db.pool(), &new_user("Iris@Example.COM")).await.unwrap();
        assert_eq!(row.email, "iris@example.com");
        assert_eq!(row.full_name, "Iris Green");

        let found = find_by_email(db.pool(), "IRIS@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, row.id);
        assert_eq!(found.role().unwrap(), Role::Customer);
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict() {
        let db = Database::in_memory().await;
        insert(db.pool(), &new_user("a@example.com")).await.unwrap();
        let err = insert(db.pool(), &new_user("A@example.com")).await.unwrap_err();
        assert_eq!(err.kind().code(), "CONFLICT");
    }

    #[tokio::test]
    async fn set_role_promotes() {
        let db = Database::in_memory().await;
        let row = insert(db.pool(), &new_user("p@example.com")).await.unwrap();
        let id = row.user_id().unwrap();
        set_role(db.pool(), id, Role::Partner).await.unwrap();
        let found = find_by_id(db.pool(), id).await.unwrap().unwrap();
        assert_eq!(found.role().unwrap(), Role::Partner);
    }
}
