//! Real-time indexer for a DLMM exchange program
//!
//! Watches the chain for transactions touching the program, decodes its
//! event logs and account records, derives trades from vault balance
//! deltas, keeps visible state monotonic under an unordered at-least-once
//! stream, persists to Postgres, and fans out to live WebSocket
//! subscribers behind HMAC ticket auth.

pub mod config;
pub mod database;
pub mod decoder;
pub mod error;
pub mod hub;
pub mod models;
pub mod ordering;
pub mod pubsub;
pub mod rpc;
pub mod state;
pub mod subscriber;
pub mod ticket;
pub mod trade;

// Re-export commonly used types
pub use config::IndexerConfig;
pub use error::{IndexerError, IndexerResult};
pub use models::{EventRecord, HubMessage, Trade};
