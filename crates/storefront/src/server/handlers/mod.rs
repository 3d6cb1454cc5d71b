//! Axum request handlers, grouped by resource.

pub mod auth;
pub mod catalog;
pub mod health;
pub mod hub;
pub mod orders;
pub mod partners;

use crate::error::AppError;

/// Catch-all 404 handler.
pub async fn not_found() -> AppError {
    AppError::not_found("the requested resource does not exist")
}
