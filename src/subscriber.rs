//! Ingestion subscriber
//!
//! Drives the pipeline: owns the live log subscription, and for every
//! notification runs fetch → decode → derive → gate → persist → publish
//! as an independent task. One bad transaction never stops the stream,
//! and one slow fetch never delays unrelated notifications.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::RpcConfig;
use crate::database::Database;
use crate::decoder::{decode_events_from_logs, DecodedEvent};
use crate::error::IndexerResult;
use crate::hub::BroadcastHub;
use crate::models::{EventBody, EventRecord, PoolIdentity, Trade};
use crate::ordering::{PoolGate, SeenSignatures, SlotIndexCache};
use crate::pubsub::{LogNotification, LogSubscription};
use crate::rpc::{RpcClient, TransactionDetail};
use crate::state::{PoolState, StateReader};
use crate::trade::{derive_trade, PoolAccounts};

/// Shared pipeline components handed to each notification task.
pub struct Pipeline {
    pub rpc: Arc<RpcClient>,
    pub reader: Arc<StateReader>,
    pub seen: Arc<SeenSignatures>,
    pub gate: Arc<PoolGate>,
    pub slot_index: Arc<SlotIndexCache>,
    pub hub: Arc<BroadcastHub>,
    pub store: Arc<Database>,
}

/// Owns the subscription lifecycle: `Idle → Subscribed → … → Stopped`.
pub struct IngestionSubscriber {
    pipeline: Arc<Pipeline>,
    program_id: Pubkey,
    config: RpcConfig,
    stopped: AtomicBool,
    stop_signal: Notify,
}

impl IngestionSubscriber {
    pub fn new(pipeline: Arc<Pipeline>, program_id: Pubkey, config: RpcConfig) -> Self {
        Self {
            pipeline,
            program_id,
            config,
            stopped: AtomicBool::new(false),
            stop_signal: Notify::new(),
        }
    }

    /// Consume the log stream until stopped, reconnecting with a delay on
    /// stream failure. In-flight notification tasks are left to finish on
    /// their own.
    pub async fn run(&self) -> IndexerResult<()> {
        let mut attempts = 0u32;

        while !self.stopped.load(Ordering::SeqCst) {
            match self.run_session().await {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    warn!("log stream ended unexpectedly, reconnecting...");
                    attempts = 0;
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.config.max_reconnect_attempts {
                        error!("giving up after {} reconnect attempts: {}", attempts, e);
                        return Err(e.into());
                    }
                    warn!(
                        "log subscription error ({}), retrying in {}s...",
                        e, self.config.reconnect_delay_secs
                    );
                    sleep(Duration::from_secs(self.config.reconnect_delay_secs)).await;
                }
            }
        }

        Ok(())
    }

    /// Stop the stream: the current session unsubscribes and `run`
    /// returns. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
    }

    /// One subscription session. Returns `Ok(true)` on an explicit stop,
    /// `Ok(false)` when the upstream closed the stream.
    async fn run_session(&self) -> Result<bool, crate::error::RpcError> {
        let mut subscription = LogSubscription::connect(
            &self.config.ws_url,
            &self.program_id,
            &self.config.commitment,
        )
        .await?;

        info!(
            "subscribed to logs for program {} via {}",
            self.program_id, self.config.ws_url
        );

        loop {
            tokio::select! {
                _ = self.stop_signal.notified() => {
                    subscription.unsubscribe().await;
                    info!("ingestion stopped");
                    return Ok(true);
                }
                item = subscription.next() => {
                    match item {
                        Some(Ok(notification)) => {
                            let pipeline = self.pipeline.clone();
                            tokio::spawn(async move {
                                process_notification(pipeline, notification).await;
                            });
                        }
                        Some(Err(e)) => {
                            warn!("dropping malformed notification: {}", e);
                        }
                        None => return Ok(false),
                    }
                }
            }
        }
    }
}

/// Handle one log notification end to end. All failures are local: they
/// skip this unit of work and log, never propagate.
pub async fn process_notification(pipeline: Arc<Pipeline>, notification: LogNotification) {
    let signature = notification.signature.clone();

    if notification.err.is_some() {
        debug!("skipping failed transaction {}", signature);
        return;
    }

    // Shared atomic check-and-insert: at-least-once delivery means the
    // same signature can arrive twice, concurrently.
    if !pipeline.seen.mark_seen(&signature) {
        debug!("already processed {}", signature);
        return;
    }

    let tx = match pipeline.rpc.get_transaction(&signature).await {
        Ok(Some(tx)) => tx,
        Ok(None) => {
            debug!("transaction {} not available yet, skipping", signature);
            return;
        }
        Err(e) => {
            warn!("transaction fetch failed for {}: {}", signature, e);
            return;
        }
    };

    if tx.is_failed() {
        debug!("skipping transaction {} with execution error", signature);
        return;
    }

    let events = decode_events_from_logs(tx.log_messages());
    let event_pool = events
        .iter()
        .find_map(|e| e.pool())
        .and_then(|p| Pubkey::from_str(p).ok());

    publish_events(&pipeline, &signature, &tx, &events).await;
    derive_and_publish_trade(&pipeline, &signature, &tx, &events, event_pool).await;
}

/// Persist and broadcast every decoded non-swap event. Swap events are
/// synthesized from the derived trade instead, so both event-only and
/// balance-derived pools produce a uniform record stream.
async fn publish_events(
    pipeline: &Pipeline,
    signature: &str,
    tx: &TransactionDetail,
    events: &[DecodedEvent],
) {
    for event in events.iter().filter(|e| e.name != "Swap") {
        let pool = event.pool().map(String::from);

        // Best-effort pool context; an unreadable pool does not block the
        // event itself.
        if let Some(pool) = pool.as_deref().and_then(|p| Pubkey::from_str(p).ok()) {
            match pipeline.reader.read_pool_state(&pool).await {
                Ok(state) => upsert_identity(pipeline, &state).await,
                Err(e) => debug!("pool context unavailable for {}: {}", pool, e),
            }
        }

        let record = EventRecord {
            signature: signature.to_string(),
            slot: tx.slot,
            block_time: tx.block_time,
            event: EventBody {
                name: event.name.to_string(),
                data: Some(event.fields_json()),
            },
        };

        if let Err(e) = pipeline.store.upsert_event(&record, pool.as_deref()).await {
            warn!("event persist failed for {}: {}", signature, e);
        }
        pipeline.hub.publish_event(pool, record);
    }
}

/// Attempt trade derivation against exactly one candidate pool: the pool
/// inferred from decoded events when present, otherwise each transaction
/// account key in order, stopping at the first that yields a trade.
async fn derive_and_publish_trade(
    pipeline: &Pipeline,
    signature: &str,
    tx: &TransactionDetail,
    events: &[DecodedEvent],
    event_pool: Option<Pubkey>,
) {
    let candidates: Vec<Pubkey> = match event_pool {
        Some(pool) => vec![pool],
        None => tx
            .ordered_account_keys()
            .iter()
            .filter_map(|k| Pubkey::from_str(k).ok())
            .collect(),
    };

    for candidate in candidates {
        let state = match pipeline.reader.read_pool_state(&candidate).await {
            Ok(state) => state,
            // Not a pool account (or unreadable right now): next candidate.
            Err(e) => {
                debug!("candidate {} is not a readable pool: {}", candidate, e);
                continue;
            }
        };

        let Some(mut trade) = derive_trade(tx, signature, &PoolAccounts::from(&state)) else {
            continue;
        };

        // One application per (signature, pool), ever.
        if !pipeline.seen.mark_seen_for_pool(signature, &trade.pool) {
            debug!("trade for {} on {} already applied", signature, trade.pool);
            return;
        }

        trade.txn_order = pipeline.slot_index.txn_index(tx.slot, signature).await;
        trade.user = events
            .iter()
            .find(|e| e.name == "Swap")
            .and_then(|e| e.get("user"))
            .and_then(|v| v.as_pubkey())
            .map(String::from)
            .or_else(|| tx.fee_payer().map(String::from));

        upsert_identity(pipeline, &state).await;

        if let Err(e) = pipeline.store.upsert_trade(&trade).await {
            warn!("trade persist failed for {}: {}", signature, e);
        }

        // Live state moves forward only; stale and replayed slots are
        // dropped here and in the store.
        if pipeline
            .gate
            .apply(&trade.pool, tx.slot, state.ui_price(), Some(state.active_bin_id))
        {
            if let Err(e) = pipeline
                .store
                .update_pool_live_state(
                    &trade.pool,
                    tx.slot,
                    state.ui_price(),
                    Some(state.active_bin_id),
                )
                .await
            {
                warn!("live-state persist failed for {}: {}", trade.pool, e);
            }
        }

        pipeline.hub.publish_trade(trade.clone());

        let record = swap_event_record(&trade);
        if let Err(e) = pipeline.store.upsert_event(&record, Some(&trade.pool)).await {
            warn!("swap event persist failed for {}: {}", signature, e);
        }
        pipeline.hub.publish_event(Some(trade.pool.clone()), record);
        return;
    }
}

async fn upsert_identity(pipeline: &Pipeline, state: &PoolState) {
    let identity = PoolIdentity {
        address: state.address.to_string(),
        base_mint: state.base_mint.to_string(),
        quote_mint: state.quote_mint.to_string(),
        base_vault: state.base_vault.to_string(),
        quote_vault: state.quote_vault.to_string(),
        bin_step: state.bin_step,
        base_fee_bps: state.base_fee_bps,
    };
    if let Err(e) = pipeline.store.upsert_pool(&identity).await {
        warn!("pool identity persist failed for {}: {}", state.address, e);
    }
}

/// Synthesized swap-classified event record mirroring a derived trade.
fn swap_event_record(trade: &Trade) -> EventRecord {
    EventRecord {
        signature: trade.signature.clone(),
        slot: trade.slot,
        block_time: trade.block_time,
        event: EventBody {
            name: "Swap".to_string(),
            data: Some(json!({
                "pool": trade.pool,
                "user": trade.user,
                "inputMint": trade.input_mint,
                "outputMint": trade.output_mint,
                "amountIn": trade.amount_in,
                "amountOut": trade.amount_out,
            })),
        },
    }
}
