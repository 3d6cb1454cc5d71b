//! Axum router construction.

use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info_span, warn, Span};

use super::{
    handlers::{self, auth, catalog, health, hub, orders, partners},
    middleware,
    state::AppState,
};

/// Build the application [`Router`] with all routes and middleware attached.
pub fn build(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);

    let api = Router::new()
        // auth
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        // catalog
        .route("/occasions", get(catalog::list_occasions))
        .route("/occasions/:id", get(catalog::get_occasion))
        .route("/bouquets", get(catalog::list_bouquets))
        .route("/bouquets/:id", get(catalog::get_bouquet))
        .route("/admin/occasions", post(catalog::create_occasion))
        .route(
            "/admin/occasions/:id",
            put(catalog::update_occasion).delete(catalog::delete_occasion),
        )
        .route("/admin/bouquets", post(catalog::create_bouquet))
        .route(
            "/admin/bouquets/:id",
            put(catalog::update_bouquet).delete(catalog::delete_bouquet),
        )
        .route("/admin/bouquets/:id/images", post(catalog::add_image))
        .route("/admin/images/:id", delete(catalog::delete_image))
        // orders
        .route("/orders", get(orders::list_mine))
        .route("/orders/checkout", post(orders::checkout))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/capture", post(orders::capture))
        .route("/orders/:id/status", put(orders::update_status))
        .route("/admin/orders", get(orders::admin_list))
        .route("/partner/orders", get(orders::partner_list))
        // partners
        .route("/partners/applications", post(partners::apply))
        .route("/partners/applications/me", get(partners::mine))
        .route("/admin/partner-applications", get(partners::admin_list))
        .route(
            "/admin/partner-applications/:id/approve",
            post(partners::approve),
        )
        .route("/admin/partner-applications/:id/reject", post(partners::reject));

    Router::new()
        .nest("/api", api)
        .route("/hubs/notifications", get(hub::connect))
        .route("/health", get(health::health))
        .fallback(handlers::not_found)
        .layer(TimeoutLayer::new(middleware::REQUEST_TIMEOUT))
        .layer(from_fn(middleware::error_envelope))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Span for one HTTP request. Only the path is recorded: the hub takes its
/// access token in the query string.
fn request_span(req: &Request) -> Span {
    info_span!(
        "http_request",
        method = %req.method(),
        path = %req.uri().path(),
    )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::HeaderName::from_static(middleware::TRACE_ID_HEADER)])
}
