//! Keep-alive scheduler: periodic idle testing and aging eviction
//!
//! One task serves every partition. Each cycle pops idle connections one at
//! a time (oldest first), destroys those that aged out or fail validation,
//! and pushes healthy ones straight back — a connection is only ever out of
//! rotation for the duration of its own validation call. Every eviction
//! signals the partition so its watcher can create a replacement.

use std::sync::Weak;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::pool::PoolInner;

pub(crate) async fn run_keepalive<C: Send + 'static>(
    pool: Weak<PoolInner<C>>,
    period: Duration,
    first_tick: Instant,
) {
    debug_assert!(!period.is_zero(), "zero period disables keep-alive");
    // The tick schedule is anchored by the caller at pool startup; computing
    // it here would shift every cycle by however long the first poll takes.
    let mut interval = tokio::time::interval_at(first_tick, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let Some(inner) = pool.upgrade() else { break };
        if inner.is_shutdown() {
            break;
        }
        inner.run_keepalive_cycle().await;
    }
    debug!("keep-alive scheduler exiting");
}

impl<C: Send + 'static> PoolInner<C> {
    /// One pass over every partition's idle connections
    pub(crate) async fn run_keepalive_cycle(&self) {
        let config = self.config();
        let test_period = config.idle_connection_test_period;
        let idle_max_age = config.idle_max_age;
        let max_age = config.max_connection_age;

        for partition_index in 0..self.partition_count() {
            let partition = self.partition(partition_index);
            let mut evicted = 0usize;
            let mut tested = 0usize;

            // Bound the pass by the queue length at cycle start; returned
            // connections land at the back and are not re-examined.
            let snapshot = partition.free_len();
            for _ in 0..snapshot {
                let Some(mut handle) = partition.pop_longest_idle() else {
                    break;
                };
                let now = Instant::now();

                let aged_out = handle.is_expired(max_age, now)
                    || (!idle_max_age.is_zero() && handle.idle_time(now) > idle_max_age);
                if aged_out {
                    debug!(
                        partition = partition_index,
                        handle_id = handle.id(),
                        age = ?handle.age(now),
                        idle = ?handle.idle_time(now),
                        "evicting aged-out connection"
                    );
                    self.destroy_handle(handle).await;
                    evicted += 1;
                    continue;
                }

                if handle.idle_time(now) > test_period {
                    tested += 1;
                    if self.is_connection_alive(&mut handle).await {
                        partition.push(handle);
                    } else {
                        debug!(
                            partition = partition_index,
                            handle_id = handle.id(),
                            "evicting connection that failed keep-alive test"
                        );
                        self.destroy_handle(handle).await;
                        evicted += 1;
                    }
                } else {
                    partition.push(handle);
                }
            }

            if evicted > 0 {
                // Let the watcher replace what this cycle destroyed
                partition.signal_replenish();
            }
            if tested > 0 || evicted > 0 {
                debug!(
                    partition = partition_index,
                    tested, evicted, "keep-alive cycle finished"
                );
            }
        }
    }
}
