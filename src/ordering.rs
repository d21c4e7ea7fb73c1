//! Ordering, dedup, and consistency gates
//!
//! The notification stream is unordered and at-least-once. This layer
//! keeps the visible state monotonic: signatures apply once, per-pool
//! updates apply once, and live state never regresses to an older slot.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::rpc::RpcClient;

/// Append-only seen-sets with atomic check-and-insert.
///
/// Kept for the process lifetime with no eviction: dedup correctness
/// depends on never forgetting a signature while the process runs. Growth
/// past the configured threshold is logged, not acted on.
pub struct SeenSignatures {
    signatures: Mutex<HashSet<String>>,
    pool_pairs: Mutex<HashSet<(String, String)>>,
    warn_threshold: usize,
}

impl SeenSignatures {
    pub fn new(warn_threshold: usize) -> Self {
        Self {
            signatures: Mutex::new(HashSet::new()),
            pool_pairs: Mutex::new(HashSet::new()),
            warn_threshold,
        }
    }

    /// Record a signature; `true` exactly once per signature.
    pub fn mark_seen(&self, signature: &str) -> bool {
        let mut set = self.signatures.lock().unwrap();
        let inserted = set.insert(signature.to_string());
        if inserted && set.len() == self.warn_threshold {
            warn!(
                "seen-signature set reached {} entries; it grows unbounded for the process lifetime",
                set.len()
            );
        }
        inserted
    }

    /// Record a (signature, pool) application; `true` exactly once per pair.
    pub fn mark_seen_for_pool(&self, signature: &str, pool: &str) -> bool {
        self.pool_pairs
            .lock()
            .unwrap()
            .insert((signature.to_string(), pool.to_string()))
    }

    pub fn len(&self) -> usize {
        self.signatures.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default, Clone)]
struct PoolLive {
    last_slot: u64,
    last_price: Option<f64>,
    active_bin_id: Option<i32>,
}

/// Per-pool monotonic apply gate over live state.
#[derive(Default)]
pub struct PoolGate {
    pools: Mutex<HashMap<String, PoolLive>>,
}

impl PoolGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a live-state update if `slot` is strictly newer than the
    /// pool's last applied slot. Returns whether it applied. Replays and
    /// out-of-order slots are dropped silently; an absent price or bin id
    /// never overwrites a previously known value.
    pub fn apply(
        &self,
        pool: &str,
        slot: u64,
        price: Option<f64>,
        active_bin_id: Option<i32>,
    ) -> bool {
        let mut pools = self.pools.lock().unwrap();
        let live = pools.entry(pool.to_string()).or_default();

        if slot <= live.last_slot {
            debug!(
                "dropping stale update for {}: slot {} <= {}",
                pool, slot, live.last_slot
            );
            return false;
        }

        live.last_slot = slot;
        if let Some(price) = price.filter(|p| p.is_finite()) {
            live.last_price = Some(price);
        }
        if let Some(bin) = active_bin_id {
            live.active_bin_id = Some(bin);
        }
        true
    }

    pub fn last_applied_slot(&self, pool: &str) -> u64 {
        self.pools
            .lock()
            .unwrap()
            .get(pool)
            .map(|p| p.last_slot)
            .unwrap_or(0)
    }

    pub fn last_price(&self, pool: &str) -> Option<f64> {
        self.pools.lock().unwrap().get(pool).and_then(|p| p.last_price)
    }

    pub fn active_bin_id(&self, pool: &str) -> Option<i32> {
        self.pools
            .lock()
            .unwrap()
            .get(pool)
            .and_then(|p| p.active_bin_id)
    }
}

/// Per-slot signature→index map, built lazily and cached briefly.
///
/// A finalized block's content is immutable, so entries could be reused
/// forever; the TTL only bounds memory.
pub struct SlotIndexCache {
    rpc: Arc<RpcClient>,
    ttl: Duration,
    slots: Mutex<HashMap<u64, (Instant, Arc<HashMap<String, usize>>)>>,
}

impl SlotIndexCache {
    pub fn new(rpc: Arc<RpcClient>, ttl: Duration) -> Self {
        Self {
            rpc,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The position of `signature` within its block, 0 when the block's
    /// signature list cannot be fetched. Best-effort, not authoritative.
    pub async fn txn_index(&self, slot: u64, signature: &str) -> usize {
        if let Some(index) = self.cached(slot) {
            return index.get(signature).copied().unwrap_or(0);
        }

        let index: HashMap<String, usize> = match self.rpc.get_block_signatures(slot).await {
            Ok(signatures) => signatures
                .into_iter()
                .enumerate()
                .map(|(i, sig)| (sig, i))
                .collect(),
            Err(e) => {
                debug!("block signature fetch failed for slot {}: {}", slot, e);
                HashMap::new()
            }
        };

        let index = Arc::new(index);
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|_, (at, _)| at.elapsed() < self.ttl);
        slots.insert(slot, (Instant::now(), index.clone()));

        index.get(signature).copied().unwrap_or(0)
    }

    fn cached(&self, slot: u64) -> Option<Arc<HashMap<String, usize>>> {
        let slots = self.slots.lock().unwrap();
        slots
            .get(&slot)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, index)| index.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_are_seen_once() {
        let seen = SeenSignatures::new(1000);
        assert!(seen.mark_seen("sig-a"));
        assert!(!seen.mark_seen("sig-a"));
        assert!(seen.mark_seen("sig-b"));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn pool_pairs_are_seen_once_per_pool() {
        let seen = SeenSignatures::new(1000);
        assert!(seen.mark_seen_for_pool("sig-a", "pool-1"));
        assert!(seen.mark_seen_for_pool("sig-a", "pool-2"));
        assert!(!seen.mark_seen_for_pool("sig-a", "pool-1"));
    }

    #[test]
    fn gate_drops_equal_and_older_slots() {
        let gate = PoolGate::new();
        assert!(gate.apply("pool", 100, Some(1.5), Some(10)));
        assert!(!gate.apply("pool", 99, Some(9.9), Some(99)));
        assert!(!gate.apply("pool", 100, Some(9.9), Some(99)));

        assert_eq!(gate.last_applied_slot("pool"), 100);
        assert_eq!(gate.last_price("pool"), Some(1.5));
        assert_eq!(gate.active_bin_id("pool"), Some(10));
    }

    #[test]
    fn gate_retains_price_when_update_lacks_one() {
        let gate = PoolGate::new();
        assert!(gate.apply("pool", 100, Some(2.0), Some(3)));
        assert!(gate.apply("pool", 101, None, None));
        assert_eq!(gate.last_applied_slot("pool"), 101);
        assert_eq!(gate.last_price("pool"), Some(2.0));
        assert_eq!(gate.active_bin_id("pool"), Some(3));
    }

    #[test]
    fn gate_ignores_non_finite_price() {
        let gate = PoolGate::new();
        assert!(gate.apply("pool", 100, Some(2.0), None));
        assert!(gate.apply("pool", 101, Some(f64::NAN), None));
        assert_eq!(gate.last_price("pool"), Some(2.0));
    }
}
