//! Axum middleware layers applied to the router.
//!
//! Includes the error envelope, request tracing, timeout enforcement and
//! response compression.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use common::protocol::ErrorResponse;
use common::ServiceError;
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{AppError, PendingError};

/// Default per-request timeout applied to all routes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response header carrying the per-request trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Give every request a trace id and render failures as the JSON envelope.
///
/// Handler errors arrive as a [`PendingError`] extension and get the trace id
/// filled in. Bodyless or plain-text failures produced by axum itself
/// (unknown method, timeout, upgrade refused) are wrapped as well.
pub async fn error_envelope(req: Request, next: Next) -> Response {
    let trace_id = Uuid::new_v4().simple().to_string();
    let span = info_span!(
        "request",
        %trace_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut resp = next.run(req).instrument(span.clone()).await;
    let status = resp.status();

    if let Some(PendingError(mut body)) = resp.extensions_mut().remove::<PendingError>() {
        body.trace_id = trace_id.clone();
        if let Some(err) = resp.extensions_mut().remove::<Arc<AppError>>() {
            span.in_scope(|| log_error(&err, status));
        }
        resp = with_json_body(resp, &body);
    } else if (status.is_client_error() || status.is_server_error()) && !is_json(&resp) {
        let body = ErrorResponse {
            code: fallback_code(status).to_owned(),
            message: fallback_message(status),
            errors: None,
            trace_id: trace_id.clone(),
        };
        span.in_scope(|| debug!(status = status.as_u16(), "framework rejection wrapped"));
        resp = with_json_body(resp, &body);
    }

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        resp.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    resp
}

fn log_error(err: &AppError, status: StatusCode) {
    match err.kind() {
        ServiceError::Unexpected(detail) => {
            error!(status = status.as_u16(), error = %detail, "request failed unexpectedly");
        }
        ServiceError::Unauthorized(_) | ServiceError::Forbidden(_) => {
            warn!(status = status.as_u16(), code = err.kind().code(), error = %err, "request denied");
        }
        _ => debug!(status = status.as_u16(), code = err.kind().code(), error = %err, "request rejected"),
    }
}

fn is_json(resp: &Response) -> bool {
    resp.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

fn with_json_body(resp: Response, body: &ErrorResponse) -> Response {
    let bytes = match serde_json::to_vec(body) {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to serialise error envelope");
            Vec::new()
        }
    };
    let (mut parts, _) = resp.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Response::from_parts(parts, Body::from(bytes))
}

/// Envelope code for a status that did not come from an [`AppError`].
fn fallback_code(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => "VALIDATION_ERROR",
        StatusCode::UNAUTHORIZED => "UNAUTHORIZED",
        StatusCode::FORBIDDEN => "FORBIDDEN",
        StatusCode::NOT_FOUND => "NOT_FOUND",
        StatusCode::CONFLICT => "CONFLICT",
        s if s.is_server_error() => "INTERNAL_SERVER_ERROR",
        _ => "API_ERROR",
    }
}

fn fallback_message(status: StatusCode) -> String {
    if status.is_server_error() {
        return common::error::GENERIC_ERROR_MESSAGE.to_owned();
    }
    status
        .canonical_reason()
        .map(str::to_lowercase)
        .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()))
}
