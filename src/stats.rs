//! Read-only pool statistics snapshots
//!
//! Snapshots are plain data: they serialize, so an external monitoring
//! transport can export them, but they expose no mutation entry points back
//! into the pool.

use serde::Serialize;

/// Counters for one partition at snapshot time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    /// Partition index
    pub index: usize,
    /// Raw connections currently allocated (leased + free)
    pub created: usize,
    /// Connections sitting in the free queue
    pub free: usize,
    /// Connections currently leased to callers
    pub leased: usize,
    /// Configured lower bound
    pub min_connections: usize,
    /// Configured upper bound
    pub max_connections: usize,
}

/// Aggregate pool counters with per-partition breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Sum of created connections across partitions
    pub total_created: usize,
    /// Sum of free connections across partitions
    pub total_free: usize,
    /// Sum of leased connections across partitions
    pub total_leased: usize,
    /// Per-partition counters
    pub partitions: Vec<PartitionStats>,
}

impl PoolStats {
    /// Build the aggregate from per-partition counters
    pub(crate) fn from_partitions(partitions: Vec<PartitionStats>) -> Self {
        let total_created = partitions.iter().map(|p| p.created).sum();
        let total_free = partitions.iter().map(|p| p.free).sum();
        let total_leased = partitions.iter().map(|p| p.leased).sum();
        Self {
            total_created,
            total_free,
            total_leased,
            partitions,
        }
    }
}
