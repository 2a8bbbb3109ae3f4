//! Per-partition background replenisher
//!
//! Each partition gets one long-lived watcher task. It blocks on the
//! partition's single-slot signal channel, so a burst of low-watermark
//! signals coalesces into one catch-up pass. On wake it creates connections
//! through the pool's retrying creation path until the partition is back
//! above its availability watermark (and at least at its minimum) or has
//! reached its maximum.
//!
//! Watchers hold only a `Weak` pool reference: dropping the last `Pool`
//! handle closes the signal channel and the task exits on its own.

use std::sync::Weak;
use tokio::sync::mpsc;
use tracing::debug;

use crate::pool::PoolInner;

pub(crate) async fn run_watcher<C: Send + 'static>(
    pool: Weak<PoolInner<C>>,
    partition_index: usize,
    mut signal: mpsc::Receiver<()>,
) {
    while signal.recv().await.is_some() {
        let Some(inner) = pool.upgrade() else { break };
        if inner.is_shutdown() {
            break;
        }
        inner.replenish_partition(partition_index).await;
    }
    debug!(partition = partition_index, "pool watcher exiting");
}

impl<C: Send + 'static> PoolInner<C> {
    /// Create connections for one partition until it is back above its
    /// watermark, at its minimum, or full
    pub(crate) async fn replenish_partition(&self, partition_index: usize) {
        let partition = self.partition(partition_index);
        let threshold = self.config().pool_availability_threshold;

        while !self.is_shutdown()
            && (partition.free_len() < partition.min_connections()
                || partition.below_watermark(threshold))
        {
            // Reserve the created-count slot before the (slow) factory call
            // so concurrent creators never overshoot the partition max.
            if !partition.reserve_slot() {
                break;
            }
            match self.obtain_raw_connection().await {
                Ok(raw) => {
                    let handle = self.new_handle(partition_index, raw);
                    debug!(
                        partition = partition_index,
                        handle_id = handle.id(),
                        created = partition.created(),
                        "watcher created connection"
                    );
                    partition.push(handle);
                }
                Err(e) => {
                    partition.release_slot();
                    debug!(
                        partition = partition_index,
                        error = %e,
                        "watcher could not create connection"
                    );
                    break;
                }
            }
        }
    }
}
