//! GMS service entry point.
//!
//! Runs the round state machine and exposes the coordinator RPC surface.

use anyhow::Result;
use cluster::{BroadcastClient, HttpGsClient};
use gms::{api, MachineConfig, MemoryGameRoundRepository, RoundCoordinator, StateMachine};
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

    info!("Starting GMS service");

    let http_port: u16 = env::var("GMS_PORT")
        .unwrap_or_else(|_| "8081".to_string())
        .parse()
        .expect("GMS_PORT must be a number");
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9091".to_string())
        .parse()
        .expect("METRICS_PORT must be a number");
    let gs_url = env::var("GS_URL").unwrap_or_else(|_| "http://localhost:8082".to_string());
    let gateway_addrs: Vec<String> = env::var("GATEWAY_ADDRS")
        .unwrap_or_else(|_| "localhost:8080".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    info!("Configuration:");
    info!("  GMS_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);
    info!("  GS_URL: {}", gs_url);
    info!("  GATEWAY_ADDRS: {:?}", gateway_addrs);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");

    // Gateway fan-out goes through the cluster broadcast client; the
    // reference registry is seeded from the environment.
    let registry = Arc::new(MemoryRegistry::with_static(GATEWAY_SERVICE, &gateway_addrs));
    let broadcaster = BroadcastClient::new(registry, GATEWAY_SERVICE);

    let machine = Arc::new(StateMachine::new(MachineConfig::default()));
    let round_repo = Arc::new(MemoryGameRoundRepository::new());
    let coordinator = RoundCoordinator::new(machine.clone(), broadcaster, round_repo);
    coordinator.set_result_receiver(Arc::new(HttpGsClient::new(&gs_url)));
    machine.subscribe(coordinator.clone());

    let machine_runner = machine.clone();
    let machine_handle = tokio::spawn(async move { machine_runner.run().await });

    let state = Arc::new(api::AppState { coordinator });
    let app = api::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("GMS listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let the machine finish the current round, then stop
    info!("Shutting down state machine...");
    machine.stop();
    let _ = machine_handle.await;

    info!("GMS stopped");
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
