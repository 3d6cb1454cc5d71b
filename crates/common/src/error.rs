//! Common error types shared across crates.

use std::collections::BTreeMap;

use thiserror::Error;

/// Field name → list of human-readable validation messages.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Top-level service error type.
///
/// The taxonomy is closed. Every variant maps to exactly one HTTP status and
/// one machine-readable code, see [`ServiceError::http_status`] and
/// [`ServiceError::code`]:
/// - [`ServiceError::Validation`] → 400 `VALIDATION_ERROR`
/// - [`ServiceError::Unauthorized`] → 401 `UNAUTHORIZED`
/// - [`ServiceError::Forbidden`] → 403 `FORBIDDEN`
/// - [`ServiceError::NotFound`] → 404 `NOT_FOUND`
/// - [`ServiceError::Conflict`] → 409 `CONFLICT`
/// - [`ServiceError::Api`] → 400 `API_ERROR`
/// - [`ServiceError::Unexpected`] → 500 `INTERNAL_SERVER_ERROR`
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Request input failed validation. `errors` may carry per-field detail.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        errors: FieldErrors,
    },

    /// Missing, malformed, or expired credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, but the caller's role does not permit the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with current resource state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A domain-level failure that is the caller's concern but not a field
    /// validation problem, e.g. the payment provider declined a capture.
    #[error("api error: {0}")]
    Api(String),

    /// Anything else. The message is logged, never sent to callers.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Message sent to callers in place of the detail of an unexpected error.
pub const GENERIC_ERROR_MESSAGE: &str = "an unexpected error occurred";

impl ServiceError {
    /// Validation error without field detail.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            errors: FieldErrors::new(),
        }
    }

    /// Validation error for a single field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut errors = FieldErrors::new();
        errors.insert(field.into(), vec![message.clone()]);
        Self::Validation { message, errors }
    }

    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::Validation { .. } => 400,
            ServiceError::Unauthorized(_) => 401,
            ServiceError::Forbidden(_) => 403,
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::Api(_) => 400,
            ServiceError::Unexpected(_) => 500,
        }
    }

    /// Returns the machine-readable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation { .. } => "VALIDATION_ERROR",
            ServiceError::Unauthorized(_) => "UNAUTHORIZED",
            ServiceError::Forbidden(_) => "FORBIDDEN",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::Api(_) => "API_ERROR",
            ServiceError::Unexpected(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Message that is safe to expose to callers.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Validation { message, .. } => message.clone(),
            ServiceError::Unauthorized(m)
            | ServiceError::Forbidden(m)
            | ServiceError::NotFound(m)
            | ServiceError::Conflict(m)
            | ServiceError::Api(m) => m.clone(),
            ServiceError::Unexpected(_) => GENERIC_ERROR_MESSAGE.into(),
        }
    }

    /// Per-field validation detail, if any.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            ServiceError::Validation { errors, .. } if !errors.is_empty() => Some(errors),
            _ => None,
        }
    }
}

/// Accumulates field errors and turns them into a single
/// [`ServiceError::Validation`].
#[derive(Debug, Default)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` against `field` when `ok` is false.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) -> &mut Self {
        if !ok {
            self.errors
                .entry(field.to_owned())
                .or_default()
                .push(message.to_owned());
        }
        self
    }

    /// Record an error when `value` is blank.
    pub fn required(&mut self, value: &str, field: &str) -> &mut Self {
        self.check(!value.trim().is_empty(), field, "is required")
    }

    /// Record an error when `value` is longer than `max` characters.
    pub fn max_len(&mut self, value: &str, max: usize, field: &str) -> &mut Self {
        let ok = value.chars().count() <= max;
        self.check(ok, field, &format!("must be at most {max} characters"))
    }

    /// `Ok(())` when nothing was recorded.
    pub fn finish(&mut self) -> Result<(), ServiceError> {
        if self.errors.is_empty() {
            return Ok(());
        }
        Err(ServiceError::Validation {
            message: "one or more fields are invalid".into(),
            errors: std::mem::take(&mut self.errors),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_kinds() -> Vec<ServiceError> {
        vec![
            ServiceError::validation("x"),
            ServiceError::Unauthorized("x".into()),
            ServiceError::Forbidden("x".into()),
            ServiceError::NotFound("x".into()),
            ServiceError::Conflict("x".into()),
            ServiceError::Api("x".into()),
            ServiceError::Unexpected("x".into()),
        ]
    }

    #[test]
    fn http_status_codes() {
        let statuses: Vec<u16> = all_kinds().iter().map(ServiceError::http_status).collect();
        assert_eq!(statuses, vec![400, 401, 403, 404, 409, 400, 500]);
    }

    #[test]
    fn each_kind_has_a_distinct_code() {
        let mut codes: Vec<&str> = all_kinds().iter().map(ServiceError::code).collect();
        assert_eq!(
            codes,
            vec![
                "VALIDATION_ERROR",
                "UNAUTHORIZED",
                "FORBIDDEN",
                "NOT_FOUND",
                "CONFLICT",
                "API_ERROR",
                "INTERNAL_SERVER_ERROR"
            ]
        );
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), 7);
    }

    #[test]
    fn unexpected_hides_detail() {
        let e = ServiceError::Unexpected("disk I/O error at /var/lib/db".into());
        assert_eq!(e.public_message(), GENERIC_ERROR_MESSAGE);
        assert!(e.to_string().contains("disk I/O"));
    }

    #[test]
    fn invalid_field_carries_detail() {
        let e = ServiceError::invalid_field("email", "is not a valid address");
        let errors = e.field_errors().unwrap();
        assert_eq!(errors["email"], vec!["is not a valid address".to_string()]);
    }

    #[test]
    fn validator_collects_multiple_fields() {
        let err = Validator::new()
            .required("", "name")
            .max_len("abcdef", 3, "name")
            .check(false, "quantity", "must be positive")
            .finish()
            .unwrap_err();
        let errors = err.field_errors().unwrap();
        assert_eq!(errors["name"].len(), 2);
        assert_eq!(errors["quantity"].len(), 1);
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn validator_passes_clean_input() {
        assert!(Validator::new().required("Rose", "name").finish().is_ok());
    }
}
