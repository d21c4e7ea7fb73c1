//! Backing store client
//!
//! The relational store's schema is deployment-specific; this module only
//! owns the write semantics the pipeline needs: idempotent upserts with a
//! conflict-target fallback chain, and a monotonic live-state update.

pub mod postgres;

pub use postgres::Database;

use std::future::Future;

use crate::error::StoreError;

/// Attempt an upsert against each conflict target in priority order.
///
/// Only a conflict-shape rejection (the store not recognizing the target)
/// falls through to the next candidate; any other error aborts
/// immediately. Exhausting every target is a `ConflictExhausted`.
pub async fn upsert_with_fallback<'a, F, Fut>(
    targets: &'a [&'a str],
    mut attempt: F,
) -> Result<(), StoreError>
where
    F: FnMut(&'a str) -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    let mut last_shape_error = None;

    for target in targets.iter().copied() {
        match attempt(target).await {
            Ok(()) => return Ok(()),
            Err(StoreError::ConflictShape(reason)) => {
                last_shape_error = Some(reason);
            }
            Err(other) => return Err(other),
        }
    }

    Err(StoreError::ConflictExhausted(
        last_shape_error.unwrap_or_else(|| "no conflict targets configured".to_string()),
    ))
}
