//! Gateway HTTP entrypoint.
//!
//! Boots configuration, telemetry, the shared gateway state, and the axum
//! server with correlation-id tagging, metrics recording, CORS, and graceful
//! shutdown on SIGINT/SIGTERM.

use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use x402_stacks_gateway::config::Config;
use x402_stacks_gateway::gateway::Gateway;
use x402_stacks_gateway::metrics::MetricsLayer;
use x402_stacks_gateway::registry;
use x402_stacks_gateway::telemetry::Telemetry;
use x402_stacks_gateway::trace_id::TraceIdLayer;
use x402_stacks_gateway::util::shutdown_token;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let _telemetry = Telemetry::init();

    let config = Config::load()?;
    let gateway = Gateway::from_config(&config)?;

    let shutdown = shutdown_token()?;
    gateway.spawn_workers(config.log_sink_url.clone(), shutdown.clone());

    let router = registry::build_router(gateway.clone())?
        .layer(MetricsLayer::new(gateway.metrics.clone()))
        .layer(TraceIdLayer)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!(network = %config.network, pay_to = %config.pay_to, "starting gateway at http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!("failed to bind to {addr}: {e}");
        e
    })?;

    let graceful_shutdown = async move { shutdown.cancelled().await };
    axum::serve(listener, router)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}
