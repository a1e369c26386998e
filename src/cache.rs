//! Bounded LRU block cache, indexed by both height and hash.
//!
//! Grounded on the retry-cache's actor/lock-per-store shape rather than a
//! single combined key: height lookups are the common case (block-info reads
//! address by number) while hash lookups back the tracker's reconcile walk.
//! Both indices point at the same [`Arc<BlockInfo>`] so a hit never clones
//! the payload.

use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::metrics::CACHE_LOOKUP_COUNTER;
use crate::rpc::types::{BlockInfo, TransactionReceipt};

pub struct BlockCache {
    by_height: Mutex<LruCache<i64, Arc<BlockInfo>>>,
    by_hash: Mutex<LruCache<String, Arc<BlockInfo>>>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity).unwrap_or(std::num::NonZeroUsize::new(1).unwrap());
        Self {
            by_height: Mutex::new(LruCache::new(capacity)),
            by_hash: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Looks up by height. If `expected_parent_hash` is given and the cached
    /// entry's parent doesn't match, the entry is evicted (it's stale - the
    /// chain has re-orged under it) and `None` is returned so the caller
    /// re-fetches.
    pub fn get_by_height(&self, height: i64, expected_parent_hash: Option<&str>) -> Option<Arc<BlockInfo>> {
        let mut cache = self.by_height.lock().unwrap();
        match cache.get(&height) {
            Some(block) if expected_parent_hash.is_none_or_eq(&block.parent) => {
                CACHE_LOOKUP_COUNTER.with_label_values(&["height", "hit"]).inc();
                Some(block.clone())
            },
            Some(_) => {
                cache.pop(&height);
                CACHE_LOOKUP_COUNTER.with_label_values(&["height", "stale"]).inc();
                None
            },
            None => {
                CACHE_LOOKUP_COUNTER.with_label_values(&["height", "miss"]).inc();
                None
            },
        }
    }

    pub fn get_by_hash(&self, hash: &str) -> Option<Arc<BlockInfo>> {
        let mut cache = self.by_hash.lock().unwrap();
        let outcome = cache.get(hash).cloned();
        CACHE_LOOKUP_COUNTER
            .with_label_values(&["hash", if outcome.is_some() { "hit" } else { "miss" }])
            .inc();
        outcome
    }

    pub fn insert(&self, block: Arc<BlockInfo>) {
        self.by_height.lock().unwrap().put(block.height, block.clone());
        self.by_hash.lock().unwrap().put(block.hash.clone(), block);
    }
}

/// Bounded LRU cache of observed transaction receipts, keyed by operation
/// hash - avoids re-running `observe_receipt`'s retrying RPC round-trip for a
/// hash already confirmed once.
pub struct TxCache {
    by_hash: Mutex<LruCache<String, Arc<TransactionReceipt>>>,
}

impl TxCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity).unwrap_or(std::num::NonZeroUsize::new(1).unwrap());
        Self { by_hash: Mutex::new(LruCache::new(capacity)) }
    }

    pub fn get(&self, operation_hash: &str) -> Option<Arc<TransactionReceipt>> {
        let mut cache = self.by_hash.lock().unwrap();
        let outcome = cache.get(operation_hash).cloned();
        CACHE_LOOKUP_COUNTER
            .with_label_values(&["tx", if outcome.is_some() { "hit" } else { "miss" }])
            .inc();
        outcome
    }

    pub fn insert(&self, operation_hash: String, receipt: Arc<TransactionReceipt>) {
        self.by_hash.lock().unwrap().put(operation_hash, receipt);
    }
}

trait OptionMatchesExt {
    fn is_none_or_eq(&self, other: &str) -> bool;
}

impl OptionMatchesExt for Option<&str> {
    fn is_none_or_eq(&self, other: &str) -> bool {
        match self {
            None => true,
            Some(expected) => *expected == other,
        }
    }
}
