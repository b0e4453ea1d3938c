//! Swappable holder for the current [`EmbeddingStore`] snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::store::EmbeddingStore;

/// Owns the current snapshot. Readers get an `Arc` without locking; a refresh
/// replaces the pointer in one atomic store. Snapshots are never mutated
/// after installation, so a reader holding an old `Arc` keeps a consistent
/// view until it drops it.
#[derive(Debug)]
pub struct CacheManager {
    current: ArcSwap<EmbeddingStore>,
    generation: AtomicU64,
}

impl CacheManager {
    pub fn new(initial: EmbeddingStore) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            generation: AtomicU64::new(0),
        }
    }

    /// Current snapshot. O(1), never waits on a refresh.
    pub fn get_snapshot(&self) -> Arc<EmbeddingStore> {
        self.current.load_full()
    }

    /// Replace the current snapshot, returning the one it superseded.
    pub fn install_snapshot(&self, store: EmbeddingStore) -> Arc<EmbeddingStore> {
        let previous = self.current.swap(Arc::new(store));
        self.generation.fetch_add(1, Ordering::AcqRel);
        previous
    }

    /// Number of snapshots installed since construction.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(EmbeddingStore::empty())
    }
}
