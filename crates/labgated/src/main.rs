//! labgate control-plane daemon.
//!
//! Startup order matters: the store schema and the address pool come
//! first, then the WireGuard interface is brought up and the persisted
//! peers are reprogrammed onto it, and only then does the RPC surface
//! start accepting. The `/ready` sentinel appears last. Shutdown drains
//! the RPC server and closes the database pool; device and filter state
//! deliberately survive so tunnels outlive daemon restarts.

mod auth;
mod config;
mod rpc;
mod status;
mod tls;

use std::sync::Arc;

use clap::Parser;
use labgate_device::WgDevice;
use labgate_engine::LifecycleEngine;
use labgate_ipam::PostgresIpam;
use labgate_proto::WireguardServer;
use labgate_store::PostgresPeerStore;
use sqlx::postgres::PgPoolOptions;
use tonic::transport::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use auth::TokenVerifier;
use config::Config;
use rpc::WireguardService;

/// Presence of this file signals readiness to the orchestrator.
const READY_PATH: &str = "/ready";

#[tokio::main]
async fn main() {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(config.environment.default_log_filter())
        }))
        .init();

    if let Err(e) = run(config).await {
        error!(error = %e, "daemon failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let settings = config.vpn_settings()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url())
        .await?;

    let store = PostgresPeerStore::new(pool.clone());
    store.migrate().await?;

    let ipam = PostgresIpam::connect(pool.clone(), &config.vpn_cidr).await?;
    let device = WgDevice::new();

    let engine = Arc::new(LifecycleEngine::new(settings, device, ipam, store));

    engine.init_server().await?;
    engine.init_peers().await?;

    let addr = config.grpc_addr()?;
    let verifier = TokenVerifier::new(&config.grpc_sign_key, &config.grpc_auth_key);
    let service =
        WireguardServer::with_interceptor(WireguardService::new(engine), verifier.interceptor());

    let mut builder = Server::builder();
    if config.grpc_tls_enabled {
        builder = builder.tls_config(tls::server_tls_config(&config)?)?;
        info!("serving RPC with mutual TLS");
    }

    let server = builder
        .add_service(service)
        .serve_with_shutdown(addr, shutdown_signal());

    std::fs::File::create(READY_PATH)?;
    info!(%addr, "application started");

    server.await?;
    info!("controller stopped");

    pool.close().await;
    info!("application stopped");
    Ok(())
}

async fn shutdown_signal() {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("installing the SIGTERM handler cannot fail");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
    info!("shutdown signal received, draining RPC server");
}
