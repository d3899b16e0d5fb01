//! Server startup.

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use tower_http::cors;

use crate::config::Config;
use crate::handlers;
use crate::util::{SigDown, Telemetry};

/// Runs the paywall server until SIGTERM or SIGINT.
///
/// - Loads `.env` variables.
/// - Initializes logging and, when configured, OpenTelemetry export.
/// - Loads and validates the JSON config.
/// - Serves the endpoints from [`handlers`] with the x402 paywall in front of priced routes.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let telemetry = Telemetry::init()?;

    let config = Config::load()?;
    tracing::info!(
        recipient = %config.recipient(),
        chain_id = config.chain_id(),
        routes = config.routes().len(),
        "Loaded configuration"
    );

    let http_endpoints = Router::new()
        .merge(handlers::routes(&config)?)
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any)
                .expose_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let sig_down = SigDown::try_new()?;
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(sig_down.shutdown())
        .await?;
    sig_down.recv().await;

    Ok(())
}
