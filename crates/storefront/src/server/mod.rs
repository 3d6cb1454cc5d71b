//! Axum HTTP server: routing, extractors, middleware and handlers.
//!
//! # Responsibilities
//! - Define the Axum router with all routes and shared middleware.
//! - Authenticate callers from bearer access tokens.
//! - Render every failure as the JSON error envelope.
//! - Inject shared application state (`AppState`) into handlers.

pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
