//! Round-Robin Reverse Proxy
//!
//! Main entry point for the proxy.
//! Responsibilities:
//! 1. Parse CLI arguments to load configuration.
//! 2. Build the shared HTTP client and the upstream pool.
//! 3. Set up the Axum web server: `/status`, `/health`, `/metrics`, and a
//!    catch-all relay route for everything else.
//! 4. Handle graceful shutdown on `Ctrl+C` or `SIGTERM`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router, Server,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::fmt::init;

use carousel_proxy::balancer::LoadBalancer;
use carousel_proxy::config::try_load_config;
use carousel_proxy::metrics::HTTP_REQUESTS_TOTAL;
use carousel_proxy::upstream::{ProxyError, StaticUpstream, Upstream};

/// Relays every request that did not match an operational route.
async fn handle_proxy(State(balancer): State<Arc<LoadBalancer>>, req: Request<Body>) -> Response {
    HTTP_REQUESTS_TOTAL.inc();
    balancer.route_request(req).await
}

/// Returns proxy status including the upstream pool and selection strategy.
async fn handle_status(State(balancer): State<Arc<LoadBalancer>>) -> impl IntoResponse {
    axum::Json(balancer.status())
}

/// Simple health check endpoint for monitoring services.
async fn handle_health() -> impl IntoResponse {
    axum::Json(json!({"status": "healthy"}))
}

/// Exposes Prometheus metrics.
async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer)
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain".to_string())],
                format!("Error encoding metrics: {}", e).into_bytes(),
            )
        }
    }
}

/// Command-line interface for the application.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

/// Main entry point: initialize logging, load config, build the upstream
/// pool, and serve until a shutdown signal arrives.
#[tokio::main]
async fn main() -> Result<(), ProxyError> {
    init();

    let args = Cli::parse();
    let cfg = try_load_config(&args.config)?.unwrap_or_default().finalize()?;

    // Finalize guarantees every field below is present.
    let server_cfg = cfg.server.unwrap();
    let proxy_cfg = cfg.proxy.unwrap();
    let bind_addr = server_cfg.bind_addr.unwrap();
    let connect_timeout_ms = proxy_cfg.connect_timeout_ms.unwrap();
    let timeout_secs = proxy_cfg.timeout_secs.unwrap();
    let addresses = proxy_cfg.upstreams.unwrap();

    let client = reqwest::Client::builder()
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_millis(connect_timeout_ms))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ProxyError::Config(e.to_string()))?;

    let upstreams = addresses
        .iter()
        .map(|address| {
            StaticUpstream::new(address, client.clone()).map(|u| Arc::new(u) as Arc<dyn Upstream>)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let balancer = Arc::new(LoadBalancer::new(bind_addr, upstreams)?);

    let app = Router::new()
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .route("/metrics", get(metrics_handler))
        .fallback(handle_proxy)
        .with_state(balancer.clone());

    let addr = balancer
        .bind_addr
        .parse()
        .map_err(|e: std::net::AddrParseError| ProxyError::Config(e.to_string()))?;
    let server = Server::bind(&addr).serve(app.into_make_service());

    let graceful = server.with_graceful_shutdown(shutdown_signal());

    info!(bind_addr = %balancer.bind_addr, "Starting carousel-proxy");
    info!("Endpoints: /status /health /metrics");

    if let Err(e) = graceful.await {
        error!("Axum server error: {}", e);
    }

    info!("Shutdown complete.");
    Ok(())
}

/// Listens for shutdown signals.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received. Starting shutdown."),
        _ = terminate => info!("SIGTERM received. Starting shutdown."),
    }
}
