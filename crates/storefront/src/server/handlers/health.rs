use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use common::protocol::HealthResponse;

use crate::server::state::AppState;

/// `GET /health`: `200 OK` when the database answers, `503` otherwise.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.db.ping().await;
    let (code, status) = if database {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        code,
        Json(HealthResponse {
            status: status.into(),
            database,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::MockPaymentGateway;
    use axum::{body::Body, http::Request, routing::get, Router};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_database() {
        let state = AppState::for_tests(Arc::new(MockPaymentGateway::new())).await;
        let app = Router::new()
            .route("/health", get(health))
            .with_state(state.clone());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        state.db.pool().close().await;
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
