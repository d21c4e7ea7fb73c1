//! Centralized error types for the indexer

use thiserror::Error;

/// Main indexer error type
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ticket rejected: {0}")]
    Auth(#[from] TicketError),

    #[error("Account not found: {address}")]
    AccountNotFound { address: String },

    #[error("Invalid account data for {account_type}: {reason}")]
    Decode {
        account_type: String,
        reason: String,
    },

    #[error("Invalid mint account: {mint}")]
    InvalidMint { mint: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Errors from the upstream RPC node. All of these are treated as
/// transient: callers skip the current unit of work and keep going.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("node returned error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("subscription closed: {0}")]
    SubscriptionClosed(String),
}

/// Errors from the backing store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store rejected the statement's conflict target. The caller may
    /// retry with the next candidate target.
    #[error("conflict target rejected: {0}")]
    ConflictShape(String),

    /// All candidate conflict targets were exhausted.
    #[error("upsert failed across all conflict targets: {0}")]
    ConflictExhausted(String),

    #[error("database error: {0}")]
    Database(String),
}

/// Ticket verification failures, one variant per close reason sent to the
/// rejected subscriber.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketError {
    #[error("malformed ticket")]
    Malformed,

    #[error("ticket expired")]
    Expired,

    #[error("bad ticket signature")]
    InvalidSignature,

    #[error("ticket replayed")]
    Replayed,
}

impl TicketError {
    /// Reason code sent in the close frame.
    pub fn reason_code(&self) -> &'static str {
        match self {
            TicketError::Malformed => "malformed",
            TicketError::Expired => "expired",
            TicketError::InvalidSignature => "invalid_sig",
            TicketError::Replayed => "replay",
        }
    }
}

/// Result type alias for indexer operations
pub type IndexerResult<T> = Result<T, IndexerError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::MalformedResponse(err.to_string())
    }
}
