//! Gateway service entry point.

use anyhow::Result;
use cluster::HttpGsClient;
use gateway::{create_router, AppState, CommandRouter, Hub};
use metrics_exporter_prometheus::PrometheusBuilder;
use services::{AuthService, MockAuthService};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Gateway service");

    let http_port: u16 = env::var("GATEWAY_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .expect("GATEWAY_PORT must be a number");
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9093".to_string())
        .parse()
        .expect("METRICS_PORT must be a number");
    let gs_url = env::var("GS_URL").unwrap_or_else(|_| "http://localhost:8082".to_string());

    info!("Configuration:");
    info!("  GATEWAY_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);
    info!("  GS_URL: {}", gs_url);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");

    // Reference auth: tokens issued from DEV_TOKENS ("token:user_id,...").
    // A production deployment swaps in a real auth service behind the same
    // trait.
    let auth = Arc::new(MockAuthService::new());
    if let Ok(dev_tokens) = env::var("DEV_TOKENS") {
        for pair in dev_tokens.split(',') {
            let Some((token, user)) = pair.split_once(':') else {
                warn!(pair, "ignoring malformed DEV_TOKENS entry");
                continue;
            };
            match user.trim().parse::<i64>() {
                Ok(user_id) => auth.issue_token(token.trim(), user_id, &format!("user{}", user_id)),
                Err(_) => warn!(pair, "ignoring malformed DEV_TOKENS entry"),
            }
        }
    }
    let auth: Arc<dyn AuthService> = auth;

    let hub = Hub::new();
    let router = CommandRouter::new(Arc::new(HttpGsClient::new(&gs_url)));

    let state = Arc::new(AppState {
        hub: hub.clone(),
        router,
        auth,
    });
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Closing all connections...");
    hub.shutdown();

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
