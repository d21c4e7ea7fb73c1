//! Domain records shared by the pipeline, the store, and the hub

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A canonical derived trade.
///
/// Amounts are atomic units rendered as base-10 integer strings; no
/// floating point is involved anywhere in their derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub pool: String,
    pub user: Option<String>,
    pub input_mint: String,
    pub output_mint: String,
    pub amount_in: String,
    pub amount_out: String,
    /// Position of the transaction within its block, 0 when unknown.
    pub txn_order: usize,
}

/// A formatted program event, persisted and broadcast alongside trades.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub event: EventBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBody {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Pool identity as persisted on first sight of a trade or event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolIdentity {
    pub address: String,
    pub base_mint: String,
    pub quote_mint: String,
    pub base_vault: String,
    pub quote_vault: String,
    pub bin_step: u16,
    pub base_fee_bps: u16,
}

/// Messages multicast to hub subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HubMessage {
    Hello {
        server: String,
        program: String,
    },
    Trade {
        pool: String,
        data: Trade,
    },
    Event {
        #[serde(skip_serializing_if = "Option::is_none")]
        pool: Option<String>,
        data: EventRecord,
    },
}
