//! USDCx Bridge - USDC on Ethereum to USDCx on Stacks
//!
//! Deposits USDC into Circle's xReserve with a correlation id as hook data,
//! then watches the Stacks protocol contract for the matching mint.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod bridge;
mod chain;
mod config;
mod contracts;
mod coordination;
mod error;
mod events;
mod metrics;
mod state;
mod tx;

#[cfg(test)]
mod testing;

use bridge::{AmountValidator, CompletionPoller};
use chain::{finality::recommended_confirmations, ChainProvider, EvmSourceChain, SourceChain};
use config::Settings;
use contracts::DepositRoute;
use coordination::{ExplorerLinks, OrchestratorConfig, Recovery, RetryPolicy, TransferOrchestrator};
use ethers::types::U256;
use events::HiroEventsClient;
use metrics::MetricsServer;
use state::AttemptJournal;
use tx::TransactionSender;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting USDCx Bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    let network = settings.network()?;
    info!(
        "Loaded configuration for {:?} (source chain {}, Stacks domain {})",
        settings.bridge.network, network.chain_id, network.remote_domain
    );

    // Attempt journal is optional
    let journal = if settings.journal.enabled {
        let journal = AttemptJournal::new(&settings.journal)
            .await
            .context("Failed to open attempt journal")?;
        journal.run_migrations().await?;
        info!("Attempt journal at {}", settings.journal.url);
        Some(Arc::new(journal))
    } else {
        warn!("Attempt journal disabled; an interrupted transfer cannot be resumed");
        None
    };

    // Source chain
    let provider = Arc::new(ChainProvider::new(network.chain_id, settings.source.clone())?);
    let wallet = TransactionSender::load_wallet(&settings.wallet.private_key_env)?;
    let confirmations = settings
        .source
        .confirmation_blocks
        .unwrap_or_else(|| recommended_confirmations(network.chain_id));
    let source_chain: Arc<dyn SourceChain> = Arc::new(EvmSourceChain::new(
        provider,
        wallet,
        &settings.source,
        confirmations,
    ));
    info!(
        "Source wallet {:?}, waiting for {} confirmations",
        source_chain.account(),
        confirmations
    );

    // Destination chain
    let events = Arc::new(HiroEventsClient::new(
        &network.api_url,
        std::time::Duration::from_secs(settings.destination.request_timeout_secs),
        settings.destination.api_key.clone(),
    )?);
    let poller = CompletionPoller::new(
        events,
        network.protocol_contract.clone(),
        settings.destination.page_size,
    );

    let poll_policy = RetryPolicy::fixed(settings.bridge.max_poll_attempts, settings.poll_interval());
    info!(
        "Watching {} for mints: {} checks over {:?}",
        network.protocol_contract,
        poll_policy.max_attempts,
        poll_policy.window()
    );

    let orchestrator = Arc::new(TransferOrchestrator::new(
        source_chain.clone(),
        poller,
        OrchestratorConfig {
            route: DepositRoute {
                reserve: network.reserve,
                token: network.usdc,
                remote_domain: network.remote_domain,
                max_fee: U256::from(settings.bridge.max_fee),
            },
            validator: AmountValidator::new(
                settings.bridge.token_decimals,
                settings.minimum_amount()?,
            ),
            poll_policy,
            links: ExplorerLinks {
                source: network.source_explorer.clone(),
                destination: network.destination_explorer.clone(),
            },
        },
        journal.clone(),
    ));
    info!("Transfer orchestrator initialized");

    // Pick up where a previous run stopped
    match orchestrator.recover().await? {
        Recovery::Clean => {}
        recovery @ Recovery::Resumable { .. } => {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.resume(recovery).await });
        }
        other => info!("Recovered journal state: {:?}", other),
    }

    // Start API server
    let api_handle = tokio::spawn({
        let api_config = settings.api.clone();
        let state = api::AppState {
            orchestrator: orchestrator.clone(),
            journal: journal.clone(),
        };
        async move {
            if let Err(e) = api::run_server(api_config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let source_chain = source_chain.clone();
        let journal = journal.clone();
        let interval = settings.bridge.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let mut healthy = source_chain.health_check().await;
                metrics::record_source_health(healthy);
                if !healthy {
                    warn!("Source chain health check failed");
                }

                if let Some(journal) = &journal {
                    if let Err(e) = journal.health_check().await {
                        warn!("Journal health check failed: {}", e);
                        healthy = false;
                    }
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("USDCx Bridge is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // A submitted deposit stands; only the watching stops
    if orchestrator.state().await.is_active() {
        if let Err(e) = orchestrator.cancel().await {
            warn!("Could not cancel active transfer: {}", e);
        }
    }

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("USDCx Bridge stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,usdcx_bridge=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
