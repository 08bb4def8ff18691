//! GS service entry point.
//!
//! Runs the player engine against the GMS RPC surface and fans settlement
//! notifications out across all gateway instances.

use anyhow::{Context, Result};
use cluster::{BroadcastClient, HttpGmsClient};
use gs::{api, BetIdGenerator, MemoryBetOrderRepository, MemoryBetRepository, PlayerEngine,
    RedisBetRepository};
use gs::bet_repo::BetRepository;
use metrics_exporter_prometheus::PrometheusBuilder;
use services::{MemoryRegistry, GATEWAY_SERVICE};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting GS service");

    let http_port: u16 = env::var("GS_PORT")
        .unwrap_or_else(|_| "8082".to_string())
        .parse()
        .expect("GS_PORT must be a number");
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9092".to_string())
        .parse()
        .expect("METRICS_PORT must be a number");
    let gms_url = env::var("GMS_URL").unwrap_or_else(|_| "http://localhost:8081".to_string());
    let gateway_addrs: Vec<String> = env::var("GATEWAY_ADDRS")
        .unwrap_or_else(|_| "localhost:8080".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    // Every instance needs a distinct node id to keep bet ids globally
    // unique; fail fast rather than risk colliding ids.
    let node_id: u16 = env::var("GS_NODE_ID")
        .context("GS_NODE_ID must be set to a unique id per instance")?
        .parse()
        .context("GS_NODE_ID must be a number < 1024")?;
    let redis_url = env::var("REDIS_URL").ok();

    info!("Configuration:");
    info!("  GS_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);
    info!("  GMS_URL: {}", gms_url);
    info!("  GATEWAY_ADDRS: {:?}", gateway_addrs);
    info!("  GS_NODE_ID: {}", node_id);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");

    let bet_repo: Arc<dyn BetRepository> = match redis_url {
        Some(url) => {
            info!("  REDIS_URL: {}", url);
            Arc::new(RedisBetRepository::new(&url)?)
        }
        None => {
            info!("  REDIS_URL: unset, using in-memory bet store");
            Arc::new(MemoryBetRepository::new())
        }
    };

    let registry = Arc::new(MemoryRegistry::with_static(GATEWAY_SERVICE, &gateway_addrs));
    let broadcaster = BroadcastClient::new(registry, GATEWAY_SERVICE);

    let engine = PlayerEngine::new(
        bet_repo,
        Arc::new(MemoryBetOrderRepository::new()),
        Arc::new(HttpGmsClient::new(&gms_url)),
        Arc::new(services::MockWalletService::new()),
        broadcaster,
        Arc::new(BetIdGenerator::new(node_id)?),
    );

    let state = Arc::new(api::AppState { engine });
    let app = api::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("GS listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("GS stopped");
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
