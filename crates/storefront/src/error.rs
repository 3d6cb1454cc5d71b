//! Service-side error wrapper and its conversion into HTTP responses.
//!
//! Every handler returns [`AppResult`]. Lower layers (sqlx, bcrypt, JWT, the
//! payment gateway) convert into the closed [`ServiceError`] taxonomy here, so
//! nothing but that taxonomy ever reaches the response writer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::{protocol::ErrorResponse, ServiceError};

/// Service-side error. Thin wrapper so foreign error types can convert into
/// the shared taxonomy.
#[derive(Debug)]
pub struct AppError(pub ServiceError);

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self(ServiceError::Unauthorized(message.into()))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self(ServiceError::Forbidden(message.into()))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self(ServiceError::NotFound(message.into()))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self(ServiceError::Conflict(message.into()))
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self(ServiceError::Api(message.into()))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self(ServiceError::validation(message))
    }

    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self(ServiceError::invalid_field(field, message))
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self(ServiceError::Unexpected(message.into()))
    }

    pub fn kind(&self) -> &ServiceError {
        &self.0
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for AppError {}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Self::not_found("resource not found"),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::conflict("resource already exists")
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                Self::conflict("resource is referenced by other records")
            }
            _ => Self::unexpected(format!("database error: {e}")),
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(e: bcrypt::BcryptError) -> Self {
        Self::unexpected(format!("password hashing failed: {e}"))
    }
}

impl From<crate::payment::PaymentError> for AppError {
    fn from(e: crate::payment::PaymentError) -> Self {
        use crate::payment::PaymentError;
        match e {
            PaymentError::Declined(reason) => Self::api(format!("payment was not completed: {reason}")),
            PaymentError::Provider { status, body } => {
                tracing::warn!(status, %body, "payment provider returned an error");
                Self::api(format!("payment provider rejected the request ({status})"))
            }
            PaymentError::Transport(detail) => {
                tracing::warn!(error = %detail, "payment provider unreachable");
                Self::api("payment provider is unavailable, please try again later")
            }
        }
    }
}

/// Marker stored in response extensions. The error-envelope middleware turns
/// it into the JSON body once the trace id is known.
#[derive(Debug, Clone)]
pub(crate) struct PendingError(pub ErrorResponse);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            code: self.0.code().to_owned(),
            message: self.0.public_message(),
            errors: self.0.field_errors().cloned(),
            trace_id: String::new(),
        };

        let mut resp = status.into_response();
        resp.extensions_mut().insert(PendingError(body));
        resp.extensions_mut().insert(std::sync::Arc::new(self));
        resp
    }
}
