//! Stablecoin Route Bridge node
//!
//! Main entry point: loads the chain registry and liquidity snapshot,
//! wires the protocol adapters into the optimizer and execution engine,
//! and serves the HTTP API and WebSocket status feed.
//! Transfer records are persisted to disk and survive restarts.

use anyhow::Result;
use api_server::{
    spawn_update_forwarder, ApiContext, HttpApiServer, SubscriptionManager, WebSocketServer,
};
use bridge_types::{ChainRegistry, EvmAddress, LiquiditySnapshot, ProtocolAdapter};
use clap::Parser;
use protocol_adapters::{
    AttestationPoller, BurnMintAdapter, ChainContext, CustodialAdapter, CustodialBridgeClient,
    EvmRpcClient, IrisAttestationClient, ReceiptPolicy,
};
use router_core::{ExecutionEngine, PersistentStore, RouteOptimizer};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::{NodeConfig, CUSTODIAL_API_KEY_ENV, OPERATOR_ACCOUNT_ENV};

/// Cross-chain stablecoin route bridge
#[derive(Parser, Debug)]
#[command(name = "bridge-node")]
#[command(about = "Routes USDC/EURC transfers between chains over burn/mint or custodial bridges", long_about = None)]
struct Args {
    /// JSON config file (defaults to the Sepolia <-> Arc testnet deployment)
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP API bind address
    #[arg(long)]
    http_addr: Option<String>,

    /// WebSocket bind address
    #[arg(long)]
    ws_addr: Option<String>,

    /// Data directory for persistent state
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = NodeConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.http_addr = addr;
    }
    if let Some(addr) = args.ws_addr {
        config.ws_addr = addr;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Ok(account) = std::env::var(OPERATOR_ACCOUNT_ENV) {
        config.operator_account = Some(EvmAddress::parse(&account)?);
    }

    run(config).await
}

async fn run(config: NodeConfig) -> Result<()> {
    tracing::info!("Starting stablecoin route bridge");
    tracing::info!("  HTTP API: {}", config.http_addr);
    tracing::info!("  WebSocket: {}", config.ws_addr);
    tracing::info!("  Data directory: {:?}", config.data_dir);
    for chain in &config.chains {
        tracing::info!(
            "  Chain {} ({}, id {}): burn/mint {}",
            chain.key,
            chain.display_name,
            chain.chain_id_hex(),
            if chain.supports_burn_mint { "enabled" } else { "disabled" }
        );
    }

    // Create data directory if it doesn't exist
    std::fs::create_dir_all(&config.data_dir)?;
    let persistent_store = Arc::new(PersistentStore::open(&config.data_dir)?);

    let registry = Arc::new(ChainRegistry::new(config.chains.clone()));
    let liquidity = Arc::new(LiquiditySnapshot::new(config.liquidity.clone()));
    let adapters = build_adapters(&config)?;
    if adapters.is_empty() {
        anyhow::bail!(
            "no bridging method available: set {} and/or {}",
            OPERATOR_ACCOUNT_ENV,
            CUSTODIAL_API_KEY_ENV
        );
    }

    let optimizer = Arc::new(RouteOptimizer::new(registry, liquidity, adapters.clone()));
    let engine = ExecutionEngine::with_persistence(adapters, persistent_store.clone())?;

    let in_flight = engine.store().in_flight().len();
    tracing::info!(
        "Loaded {} transfers ({} in flight at last shutdown)",
        engine.store().len(),
        in_flight
    );

    // Fan engine transitions out to WebSocket subscribers
    let subscription_manager = Arc::new(SubscriptionManager::new());
    let forwarder = spawn_update_forwarder(&engine, subscription_manager.clone());

    let context = Arc::new(ApiContext::new(
        optimizer,
        engine,
        config.default_source_chain.clone(),
    ));

    // Start HTTP API server
    let http_context = context.clone();
    let http_addr = config.http_addr.clone();
    let http_server = tokio::spawn(async move {
        let server = HttpApiServer::new(http_context);
        if let Err(e) = server.run(&http_addr).await {
            tracing::error!("HTTP API server error: {}", e);
        }
    });

    // Start WebSocket server
    let ws_context = context.clone();
    let ws_sub_mgr = subscription_manager.clone();
    let ws_addr = config.ws_addr.clone();
    let ws_server = tokio::spawn(async move {
        let server = WebSocketServer::new(ws_context, ws_sub_mgr);
        if let Err(e) = server.run(&ws_addr).await {
            tracing::error!("WebSocket server error: {}", e);
        }
    });

    tracing::info!("Bridge running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");

    let still_running = context.engine.store().in_flight();
    for record in &still_running {
        tracing::warn!(
            transfer_id = %record.id,
            state = %record.state,
            source_tx = ?record.source_tx_ref,
            "Transfer interrupted by shutdown"
        );
    }

    if let Err(e) = persistent_store.flush() {
        tracing::error!("Failed to flush transfer store: {}", e);
    } else {
        tracing::info!("Transfer store flushed: {} records", persistent_store.transfer_count());
    }

    // Abort tasks
    forwarder.abort();
    http_server.abort();
    ws_server.abort();

    tracing::info!("Bridge stopped");

    Ok(())
}

/// Build the adapters the configuration and environment allow
fn build_adapters(config: &NodeConfig) -> Result<Vec<Arc<dyn ProtocolAdapter>>> {
    let mut adapters: Vec<Arc<dyn ProtocolAdapter>> = Vec::new();

    match config.operator_account {
        Some(operator) => {
            let policy = ReceiptPolicy {
                poll_interval: Duration::from_millis(config.receipts.poll_interval_ms),
                max_polls: config.receipts.max_polls,
            };
            let mut contexts = Vec::new();
            for chain in config.chains.iter().filter(|c| c.supports_burn_mint) {
                let rpc = EvmRpcClient::new(&chain.rpc_endpoint, policy)?;
                contexts.push(ChainContext {
                    chain: chain.clone(),
                    rpc: Arc::new(rpc),
                    relayer: operator,
                });
            }

            let attestation = Arc::new(IrisAttestationClient::new(&config.attestation.url)?);
            let poller = AttestationPoller::new(
                attestation,
                config.attestation.poll_interval(),
                config.attestation.max_attempts,
            );
            adapters.push(Arc::new(BurnMintAdapter::new(
                config.profiles.native_messaging.clone(),
                contexts,
                poller,
            )));
            tracing::info!("Burn/mint adapter enabled, operator {}", operator);
        }
        None => tracing::warn!(
            "{} not set, burn/mint transfers are disabled",
            OPERATOR_ACCOUNT_ENV
        ),
    }

    match std::env::var(CUSTODIAL_API_KEY_ENV) {
        Ok(api_key) if !api_key.trim().is_empty() => {
            let client = CustodialBridgeClient::new(&config.custodial.base_url, api_key)?;
            adapters.push(Arc::new(CustodialAdapter::new(
                config.profiles.custodial.clone(),
                Arc::new(client),
                config.custodial.polling.clone(),
            )));
            tracing::info!("Custodial adapter enabled at {}", config.custodial.base_url);
        }
        _ => tracing::warn!(
            "{} not set, custodial transfers are disabled",
            CUSTODIAL_API_KEY_ENV
        ),
    }

    Ok(adapters)
}
