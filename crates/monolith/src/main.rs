//! Single-process deployment: every service wired in one binary.

mod app;

use anyhow::Result;
use app::App;
use gms::MachineConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
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

    info!("Starting color game (monolith)");

    let http_port: u16 = env::var("GATEWAY_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .expect("GATEWAY_PORT must be a number");
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9090".to_string())
        .parse()
        .expect("METRICS_PORT must be a number");
    let node_id: u16 = env::var("GS_NODE_ID")
        .unwrap_or_else(|_| "1".to_string())
        .parse()
        .expect("GS_NODE_ID must be a number < 1024");

    info!("Configuration:");
    info!("  GATEWAY_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);
    info!("  GS_NODE_ID: {}", node_id);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");

    let app = Arc::new(App::build(MachineConfig::default(), node_id));

    // Dev tokens for the reference auth service ("token:user_id,...")
    if let Ok(dev_tokens) = env::var("DEV_TOKENS") {
        for pair in dev_tokens.split(',') {
            match pair.split_once(':').map(|(t, u)| (t, u.trim().parse::<i64>())) {
                Some((token, Ok(user_id))) => {
                    app.auth
                        .issue_token(token.trim(), user_id, &format!("user{}", user_id));
                }
                _ => warn!(pair, "ignoring malformed DEV_TOKENS entry"),
            }
        }
    }

    let machine = app.machine.clone();
    let machine_handle = tokio::spawn(async move { machine.run().await });

    let router = app.http_router();
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down: finishing current round...");
    app.machine.stop();
    let _ = machine_handle.await;
    app.hub.shutdown();

    info!("Stopped");
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
