//! Check-in rewards settlement service.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller ──▶ http (axum) ──▶ CheckInService ──▶ PaymentGateway (merchant API)
//!                                   │
//!                                   ▼
//!                              FileLedger ◀──── SettlementWorker (background task)
//!                                   ▲                 │
//!                                   │                 ▼
//!                             FileAccounts      TokenIssuer ──▶ RpcChainClient ──▶ chain RPC
//! ```
//!
//! Every resource is built here and handed down as an `Arc`; the worker,
//! the issuer's confirmation wait and the HTTP server share one shutdown
//! signal.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use checkin_rewards::blockchain::{RpcChainClient, TokenIssuer, Wallet};
use checkin_rewards::checkin::{CheckInService, SettlementWorker};
use checkin_rewards::config::load_config;
use checkin_rewards::gateway::HttpPaymentGateway;
use checkin_rewards::http::HttpServer;
use checkin_rewards::ledger::{FileAccounts, FileLedger};
use checkin_rewards::lifecycle::{wait_for_signal, Shutdown};
use checkin_rewards::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "checkin-rewards")]
#[command(about = "Daily check-in rewards settlement service", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "CHECKIN_CONFIG", default_value = "config/checkin.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "checkin-rewards starting");
    tracing::info!(
        config_path = %cli.config.display(),
        bind_address = %config.server.bind_address,
        chain_id = config.blockchain.chain_id,
        reward_amount = config.checkin.reward_amount,
        worker_interval_secs = config.checkin.worker_interval_secs,
        max_retry_count = config.checkin.max_retry_count,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let data_dir = config.ledger.data_dir.as_deref().map(Path::new);
    let ledger = Arc::new(FileLedger::open(data_dir)?);
    let accounts = Arc::new(FileAccounts::open(data_dir)?);
    let gateway = Arc::new(HttpPaymentGateway::new(&config.gateway)?);
    let shutdown = Shutdown::new();

    let chain = Arc::new(RpcChainClient::new(config.blockchain.clone()).await?);
    let wallet = Wallet::from_env(config.blockchain.chain_id)?;
    let issuer = Arc::new(TokenIssuer::new(
        chain,
        wallet,
        config.blockchain.clone(),
        shutdown.subscribe(),
    )?);

    let service = Arc::new(CheckInService::new(
        ledger.clone(),
        accounts.clone(),
        gateway,
        config.checkin.clone(),
    ));

    let worker = SettlementWorker::new(
        ledger.clone(),
        accounts.clone(),
        issuer,
        config.checkin.clone(),
        shutdown.subscribe(),
    )
    .with_ambiguous_recheck(
        config.blockchain.ambiguous_recheck_attempts,
        Duration::from_millis(config.blockchain.ambiguous_recheck_delay_ms),
    );
    let worker_handle = tokio::spawn(async move { worker.run().await });

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let server = HttpServer::new(service, &config.server);
    let mut server_handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        _ = wait_for_signal(&shutdown) => {
            tracing::info!("Shutdown signal received, draining");
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => tracing::warn!("HTTP server exited unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
                Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
            }
            shutdown.trigger();
        }
    }

    if !server_handle.is_finished() {
        match server_handle.await {
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed during shutdown"),
            Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
            Ok(Ok(())) => {}
        }
    }
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Settlement worker task panicked");
    }

    ledger.flush()?;
    accounts.flush()?;

    tracing::info!("Shutdown complete");
    Ok(())
}
