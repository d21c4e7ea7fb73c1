//! PostgreSQL operations

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use super::upsert_with_fallback;
use crate::error::{IndexerResult, StoreError};
use crate::models::{EventRecord, PoolIdentity, Trade};

/// Conflict targets tried, in priority order, for trade upserts.
/// Deployments differ on whether trades are unique per (signature, pool)
/// or per signature alone.
const TRADE_CONFLICT_TARGETS: &[&str] = &["(signature, pool)", "(signature)"];

/// Conflict targets for event records.
const EVENT_CONFLICT_TARGETS: &[&str] = &["(signature, event_name, pool)", "(signature, event_name)"];

pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(url: &str, max_connections: u32) -> IndexerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(StoreError::from)?;
        Ok(Self { pool })
    }

    /// Idempotent pool-identity upsert.
    pub async fn upsert_pool(&self, identity: &PoolIdentity) -> IndexerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pools (address, base_mint, quote_mint, base_vault, quote_vault, bin_step, base_fee_bps)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (address) DO UPDATE SET
                base_mint = EXCLUDED.base_mint,
                quote_mint = EXCLUDED.quote_mint,
                base_vault = EXCLUDED.base_vault,
                quote_vault = EXCLUDED.quote_vault,
                bin_step = EXCLUDED.bin_step,
                base_fee_bps = EXCLUDED.base_fee_bps
            "#,
        )
        .bind(&identity.address)
        .bind(&identity.base_mint)
        .bind(&identity.quote_mint)
        .bind(&identity.base_vault)
        .bind(&identity.quote_vault)
        .bind(identity.bin_step as i32)
        .bind(identity.base_fee_bps as i32)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(())
    }

    /// Trade upsert through the conflict-target fallback chain.
    pub async fn upsert_trade(&self, trade: &Trade) -> IndexerResult<()> {
        upsert_with_fallback(TRADE_CONFLICT_TARGETS, |target| {
            let sql = format!(
                r#"
                INSERT INTO trades (signature, slot, block_time, pool, trader, input_mint, output_mint, amount_in, amount_out, txn_order)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT {} DO NOTHING
                "#,
                target
            );
            async move {
                sqlx::query(&sql)
                    .bind(&trade.signature)
                    .bind(trade.slot as i64)
                    .bind(trade.block_time)
                    .bind(&trade.pool)
                    .bind(&trade.user)
                    .bind(&trade.input_mint)
                    .bind(&trade.output_mint)
                    .bind(&trade.amount_in)
                    .bind(&trade.amount_out)
                    .bind(trade.txn_order as i32)
                    .execute(&self.pool)
                    .await
                    .map_err(classify)?;
                Ok(())
            }
        })
        .await?;

        Ok(())
    }

    /// Event-record upsert through the conflict-target fallback chain.
    pub async fn upsert_event(
        &self,
        record: &EventRecord,
        pool_address: Option<&str>,
    ) -> IndexerResult<()> {
        let data = record
            .event
            .data
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "null".to_string());

        upsert_with_fallback(EVENT_CONFLICT_TARGETS, |target| {
            let sql = format!(
                r#"
                INSERT INTO events (signature, slot, block_time, pool, event_name, event_data)
                VALUES ($1, $2, $3, $4, $5, $6::jsonb)
                ON CONFLICT {} DO NOTHING
                "#,
                target
            );
            let data = data.clone();
            async move {
                sqlx::query(&sql)
                    .bind(&record.signature)
                    .bind(record.slot as i64)
                    .bind(record.block_time)
                    .bind(pool_address)
                    .bind(&record.event.name)
                    .bind(data)
                    .execute(&self.pool)
                    .await
                    .map_err(classify)?;
                Ok(())
            }
        })
        .await?;

        Ok(())
    }

    /// Monotonic live-state write: applies only when `slot` is strictly
    /// greater than the stored slot, and never replaces a present value
    /// with NULL.
    pub async fn update_pool_live_state(
        &self,
        pool_address: &str,
        slot: u64,
        price: Option<f64>,
        active_bin_id: Option<i32>,
    ) -> IndexerResult<()> {
        // Non-finite prices are treated as absent.
        let price = price.filter(|p| p.is_finite());

        let result = sqlx::query(
            r#"
            INSERT INTO pool_live_state (pool, last_slot, last_price, active_bin_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (pool) DO UPDATE SET
                last_slot = EXCLUDED.last_slot,
                last_price = COALESCE(EXCLUDED.last_price, pool_live_state.last_price),
                active_bin_id = COALESCE(EXCLUDED.active_bin_id, pool_live_state.active_bin_id)
            WHERE pool_live_state.last_slot < EXCLUDED.last_slot
            "#,
        )
        .bind(pool_address)
        .bind(slot as i64)
        .bind(price)
        .bind(active_bin_id)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        if result.rows_affected() == 0 {
            debug!(
                "live-state write for {} at slot {} skipped (older or equal slot)",
                pool_address, slot
            );
        }

        Ok(())
    }
}

/// Sort a sqlx error into "the conflict target was rejected" versus
/// everything else. Postgres reports an unmatchable ON CONFLICT target as
/// 42P10, and a target naming a missing column as 42703.
fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(code) = db.code() {
            if code == "42P10" || code == "42703" {
                return StoreError::ConflictShape(db.message().to_string());
            }
        }
    }
    StoreError::Database(err.to_string())
}
