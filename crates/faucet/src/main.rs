//! Faucet service binary

use anyhow::anyhow;
use clap::Parser;
use spigot_common::utils::converter::format_ether;
use spigot_common::utils::logging::init_logging;
use spigot_faucet::api::{self, ApiState};
use spigot_faucet::cli::{Cli, Commands};
use spigot_faucet::{
    FaucetConfig, FaucetDatabase, FaucetMetrics, FaucetService, InMemoryLedger, SystemClock,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => FaucetConfig::load(path)?,
        None => FaucetConfig::from_env(),
    };

    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }

    if cli.debug {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging).map_err(|e| anyhow!("failed to initialize logging: {}", e))?;

    info!("Starting Spigot Faucet v{}", env!("CARGO_PKG_VERSION"));

    match config.network() {
        Ok(network) => info!(
            "Network: {} (rpc: {}, eth: {})",
            network.profile, network.rpc_url, network.eth_network_url
        ),
        Err(e) => warn!("Network preset unavailable: {}", e),
    }

    match cli.command {
        Commands::Deploy {
            owner,
            max_tx_per_hour,
            time_limit,
            disburse_amount,
            fund,
            force,
        } => {
            if let Some(owner) = owner {
                config.owner = Some(owner);
            }
            if let Some(max_tx) = max_tx_per_hour {
                config.max_tx_per_hour = max_tx;
            }
            if let Some(limit) = time_limit {
                config.time_limit_secs = limit;
            }
            if let Some(amount) = disburse_amount {
                config.disburse_amount = amount;
            }
            if let Some(amount) = fund {
                config.initial_funding = Some(amount);
            }
            deploy(&config, force).await
        }
        Commands::Serve { server_addr } => {
            if let Some(addr) = server_addr {
                config.server_addr = addr;
            }
            serve(&config).await
        }
        Commands::Status => status(&config).await,
    }
}

async fn deploy(config: &FaucetConfig, force: bool) -> anyhow::Result<()> {
    let owner = config.owner_address()?;
    let params = config.deploy_params()?;
    let funding = config.initial_funding_wei()?;
    let ledger = InMemoryLedger::with_balances(config.ledger_seed()?);

    let database = FaucetDatabase::new(&config.db_path)?;
    let service = FaucetService::deploy_persistent(
        database,
        owner,
        params,
        Arc::new(SystemClock),
        Arc::new(ledger),
        force,
    )?;

    if let Some(amount) = funding {
        service.fund(owner, amount).await?;
    }

    service.flush()?;
    info!(
        "Faucet deployed at {} with balance {} ETH",
        config.db_path,
        format_ether(service.balance().await)
    );
    Ok(())
}

async fn serve(config: &FaucetConfig) -> anyhow::Result<()> {
    info!("Configuration:");
    info!("  Server address: {}", config.server_addr);
    info!("  Database: {}", config.db_path);
    info!("  API quota: {} requests/s", config.api_requests_per_second);
    info!("  Signature window: {} s", config.signature_max_age_secs);
    info!("  History retention: {} days", config.history_retention_days);

    let database = FaucetDatabase::new(&config.db_path)?;
    let stats = database.statistics()?;
    info!("Previous statistics:");
    info!("  Total distributions: {}", stats.total_distributions);
    info!("  Unique addresses: {}", stats.unique_addresses);

    let mut service = FaucetService::open(
        database,
        Arc::new(SystemClock),
        Arc::new(InMemoryLedger::with_balances(config.ledger_seed()?)),
    )?;

    if config.metrics_enabled {
        service = service.with_metrics(FaucetMetrics::new()?);
        info!("Metrics enabled at /metrics");
    }

    let service = Arc::new(service);
    let app = api::router(
        ApiState::new(
            service.clone(),
            config.api_requests_per_second,
            config.signature_max_age_secs,
        ),
        config.cors_enabled,
    )
    .layer(TraceLayer::new_for_http());

    // Start cleanup task
    let cleanup_service = service.clone();
    let retention_days = config.history_retention_days;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(86_400)); // Daily cleanup
        loop {
            interval.tick().await;
            match cleanup_service.cleanup_old_records(retention_days) {
                Ok(count) => info!("Cleaned up {} old records", count),
                Err(e) => warn!("Cleanup failed: {:?}", e),
            }
        }
    });

    let addr: SocketAddr = config.server_addr.parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.flush()?;
    info!("Shutting down gracefully");
    Ok(())
}

async fn status(config: &FaucetConfig) -> anyhow::Result<()> {
    let database = FaucetDatabase::new(&config.db_path)?;
    let service = FaucetService::open(
        database,
        Arc::new(SystemClock),
        Arc::new(InMemoryLedger::new()),
    )?;

    let status = service.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
