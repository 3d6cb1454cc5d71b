//! `storefront`: florist shop API server entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (OTEL + tracing).
//! 3. Open the SQLite pool and ensure the schema.
//! 4. Build the PayPal gateway and the shared application state.
//! 5. Seed the administrator account.
//! 6. Build the Axum router and start the HTTP server.

mod auth;
mod catalog;
mod config;
mod db;
mod error;
mod notify;
mod orders;
mod partners;
mod payment;
mod seed;
mod server;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use config::Config;
use db::Database;
use payment::paypal::PayPalGateway;
use server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        http_port = cfg.http_port,
        "storefront starting"
    );

    // -----------------------------------------------------------------------
    // 3. Database
    // -----------------------------------------------------------------------
    let db = Database::connect(&cfg.database_url)
        .await
        .context("failed to open database")?;
    db.migrate().await.context("failed to create schema")?;

    // -----------------------------------------------------------------------
    // 4. Payment gateway and application state
    // -----------------------------------------------------------------------
    let gateway = PayPalGateway::new(
        &cfg.paypal_base_url,
        &cfg.paypal_client_id,
        &cfg.paypal_client_secret,
    )
    .context("failed to build PayPal client")?;
    let state = AppState::new(&cfg, db.clone(), Arc::new(gateway));

    // -----------------------------------------------------------------------
    // 5. Administrator seed
    // -----------------------------------------------------------------------
    seed::ensure_admin(&cfg, &db, &state.auth)
        .await
        .context("failed to seed administrator account")?;

    // -----------------------------------------------------------------------
    // 6. HTTP server
    // -----------------------------------------------------------------------
    let router = server::router::build(state);
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.http_port).into();
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("storefront stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
