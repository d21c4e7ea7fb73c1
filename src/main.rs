//! DLMM indexer daemon
//!
//! Subscribes to the program's log stream, indexes trades and events into
//! Postgres, and serves live updates over the authenticated broadcast hub.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dlmm_indexer::config::IndexerConfig;
use dlmm_indexer::database::Database;
use dlmm_indexer::hub::{self, BroadcastHub};
use dlmm_indexer::ordering::{PoolGate, SeenSignatures, SlotIndexCache};
use dlmm_indexer::rpc::RpcClient;
use dlmm_indexer::state::StateReader;
use dlmm_indexer::subscriber::{IngestionSubscriber, Pipeline};
use dlmm_indexer::ticket::TicketVerifier;

#[derive(Parser)]
#[command(name = "dlmm-indexer")]
#[command(about = "Real-time indexer for a DLMM exchange program")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "indexer.toml")]
    config: String,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,

    /// Dry run mode (validate config and exit)
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_found = std::path::Path::new(&cli.config).exists();
    let mut config = if config_found {
        IndexerConfig::from_file(&cli.config)?
    } else {
        IndexerConfig::default()
    };

    if let Some(log_level) = cli.log_level {
        config.monitoring.log_level = log_level;
    }

    init_logging(&config);

    if !config_found {
        warn!("Config file not found, using defaults: {}", cli.config);
    }

    info!("Starting DLMM indexer");
    info!("Program ID: {}", config.rpc.program_id);
    info!("RPC endpoint: {}", config.rpc.http_url);
    info!("Pubsub endpoint: {}", config.rpc.ws_url);

    config.validate()?;
    let program_id = solana_sdk::pubkey::Pubkey::from_str(&config.rpc.program_id)?;

    if cli.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        return Ok(());
    }

    info!("Connecting to database...");
    let store = Arc::new(
        Database::connect(&config.database.url, config.database.max_connections).await?,
    );

    let rpc = Arc::new(RpcClient::new(
        config.rpc.http_url.clone(),
        config.rpc.commitment.clone(),
    ));
    let reader = Arc::new(StateReader::new(rpc.clone(), program_id));

    let verifier = TicketVerifier::new(
        config.hub.ticket_secret.as_bytes(),
        Duration::from_secs(config.hub.ticket_ttl_secs),
        Duration::from_secs(config.hub.ticket_skew_secs),
    );
    let broadcast_hub = Arc::new(BroadcastHub::new(
        verifier,
        config.rpc.program_id.clone(),
        config.hub.channel_capacity,
    ));

    let pipeline = Arc::new(Pipeline {
        rpc: rpc.clone(),
        reader: reader.clone(),
        seen: Arc::new(SeenSignatures::new(config.indexer.seen_warn_threshold)),
        gate: Arc::new(PoolGate::new()),
        slot_index: Arc::new(SlotIndexCache::new(
            rpc.clone(),
            Duration::from_secs(config.indexer.slot_index_ttl_secs),
        )),
        hub: broadcast_hub.clone(),
        store,
    });

    // Seed pool identities so the hub has context before the first trade.
    match reader.discover_pools(config.indexer.discovery_limit).await {
        Ok(pools) => info!("discovered {} existing pools", pools.len()),
        Err(e) => warn!("pool discovery failed (continuing without): {}", e),
    }

    let subscriber = Arc::new(IngestionSubscriber::new(
        pipeline,
        program_id,
        config.rpc.clone(),
    ));

    let hub_handle = tokio::spawn({
        let broadcast_hub = broadcast_hub.clone();
        let bind_address = config.hub.bind_address.clone();
        async move {
            if let Err(e) = hub::serve(broadcast_hub, &bind_address).await {
                error!("broadcast hub error: {}", e);
            }
        }
    });

    let subscriber_handle = tokio::spawn({
        let subscriber = subscriber.clone();
        async move {
            if let Err(e) = subscriber.run().await {
                error!("ingestion error: {}", e);
            }
        }
    });

    info!("Indexer started successfully. Press Ctrl+C to shutdown.");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            subscriber.stop();
        }
        result = subscriber_handle => {
            match result {
                Ok(_) => info!("Ingestion finished"),
                Err(e) => error!("Ingestion task error: {}", e),
            }
        }
        _ = hub_handle => {
            info!("Broadcast hub finished");
        }
    }

    info!("Shutting down DLMM indexer");
    Ok(())
}

fn init_logging(config: &IndexerConfig) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("dlmm_indexer={}", config.monitoring.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
