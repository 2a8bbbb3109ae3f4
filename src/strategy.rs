//! Connection strategy: partition selection and free-queue service order
//!
//! Two independent knobs live here. `PartitionSelector` spreads acquisition
//! load round-robin across partitions (a single-partition pool degenerates
//! to always picking partition 0). `ServiceOrder` decides which end of a
//! partition's free queue services the next checkout.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Free-queue removal discipline
///
/// LIFO hands out the most recently released connection, keeping a warm
/// working set (better for connection-affinity caches downstream). FIFO
/// hands out the oldest release so connections age evenly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceOrder {
    /// Most recently released connection is reused first (default)
    #[default]
    Lifo,
    /// Oldest released connection is reused first
    Fifo,
}

/// Round-robin partition selector
///
/// A relaxed `fetch_add` is enough: selection only needs to be roughly even
/// under concurrency, not strictly sequenced.
#[derive(Debug)]
pub(crate) struct PartitionSelector {
    next: AtomicUsize,
    partition_count: usize,
}

impl PartitionSelector {
    pub(crate) fn new(partition_count: usize) -> Self {
        debug_assert!(partition_count > 0);
        Self {
            next: AtomicUsize::new(0),
            partition_count,
        }
    }

    /// Pick the partition index that services the next acquisition
    pub(crate) fn select(&self) -> usize {
        if self.partition_count == 1 {
            return 0;
        }
        self.next.fetch_add(1, Ordering::Relaxed) % self.partition_count
    }

    #[cfg(test)]
    pub(crate) fn reset(&self) {
        self.next.store(0, Ordering::Relaxed);
    }
}
