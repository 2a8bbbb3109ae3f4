//! Connection partition: one independent shard of the pool
//!
//! Each partition owns a free-connection queue, the created-connection
//! counter, and a single-slot signal channel that wakes its watcher. No
//! pool-wide lock exists; partitions synchronize independently, so
//! acquisition on one partition never contends with another.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Notify, mpsc};
use tracing::debug;

use crate::handle::ConnectionHandle;
use crate::strategy::ServiceOrder;

/// One shard of the pool
///
/// Invariants: `0 <= created <= max_connections` at all times, and
/// `leased = created - free >= 0` (counters are sampled individually, so
/// snapshots use saturating arithmetic).
#[derive(Debug)]
pub(crate) struct Partition<C> {
    index: usize,
    min_connections: usize,
    max_connections: usize,
    order: ServiceOrder,
    /// Free queue; push always appends, service order decides the pop end
    free: Mutex<VecDeque<ConnectionHandle<C>>>,
    /// Raw connections currently allocated to this partition (leased + free)
    created: AtomicUsize,
    /// Set when `created` reached `max_connections`; cleared on destroy
    cannot_create_more: AtomicBool,
    /// Wakes acquirers blocked on an empty free queue
    available: Notify,
    /// Single-slot watcher signal; posting while one is pending is a no-op
    replenish_tx: mpsc::Sender<()>,
}

impl<C> Partition<C> {
    pub(crate) fn new(
        index: usize,
        min_connections: usize,
        max_connections: usize,
        order: ServiceOrder,
    ) -> (Self, mpsc::Receiver<()>) {
        let (replenish_tx, replenish_rx) = mpsc::channel(1);
        let partition = Self {
            index,
            min_connections,
            max_connections,
            order,
            free: Mutex::new(VecDeque::with_capacity(max_connections)),
            created: AtomicUsize::new(0),
            cannot_create_more: AtomicBool::new(false),
            available: Notify::new(),
            replenish_tx,
        };
        (partition, replenish_rx)
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn min_connections(&self) -> usize {
        self.min_connections
    }

    pub(crate) fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Non-blocking pop from the free queue, honoring the service order
    pub(crate) fn try_acquire(&self) -> Option<ConnectionHandle<C>> {
        let mut free = self.free.lock().expect("free queue lock poisoned");
        match self.order {
            ServiceOrder::Lifo => free.pop_back(),
            ServiceOrder::Fifo => free.pop_front(),
        }
    }

    /// Pop the longest-idle connection, regardless of service order
    ///
    /// Used by the keep-alive task so it scans oldest-first.
    pub(crate) fn pop_longest_idle(&self) -> Option<ConnectionHandle<C>> {
        self.free
            .lock()
            .expect("free queue lock poisoned")
            .pop_front()
    }

    /// Return a handle to the free queue and wake one blocked acquirer
    pub(crate) fn push(&self, handle: ConnectionHandle<C>) {
        {
            let mut free = self.free.lock().expect("free queue lock poisoned");
            free.push_back(handle);
        }
        self.available.notify_one();
    }

    /// Futures resolved the next time a connection is pushed
    pub(crate) fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.available.notified()
    }

    /// Wake another blocked acquirer if connections remain
    ///
    /// `Notify` stores at most one permit, so pushes landing before any
    /// waiter has registered coalesce into a single wake-up. A woken waiter
    /// passes the baton on after its pop so no free connection is left
    /// paired with a parked waiter.
    pub(crate) fn wake_next_waiter(&self) {
        if self.free_len() > 0 {
            self.available.notify_one();
        }
    }

    pub(crate) fn free_len(&self) -> usize {
        self.free.lock().expect("free queue lock poisoned").len()
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    pub(crate) fn leased(&self) -> usize {
        self.created().saturating_sub(self.free_len())
    }

    /// Reserve a creation slot: CAS `created` up by one, bounded by max
    ///
    /// Returns false when the partition is already at capacity. Reaching the
    /// bound sets `cannot_create_more`.
    pub(crate) fn reserve_slot(&self) -> bool {
        let reserved = self
            .created
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |created| {
                (created < self.max_connections).then_some(created + 1)
            });
        match reserved {
            Ok(previous) => {
                if previous + 1 == self.max_connections {
                    self.cannot_create_more.store(true, Ordering::Release);
                }
                true
            }
            Err(_) => {
                self.cannot_create_more.store(true, Ordering::Release);
                false
            }
        }
    }

    /// Give a slot back after a destroy or a failed creation attempt
    pub(crate) fn release_slot(&self) {
        let previous = self.created.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "created-connection counter underflow");
        self.cannot_create_more.store(false, Ordering::Release);
    }

    pub(crate) fn at_capacity(&self) -> bool {
        self.cannot_create_more.load(Ordering::Acquire)
            || self.created() >= self.max_connections
    }

    /// Whether the free count fell to or below `threshold` percent of max
    pub(crate) fn below_watermark(&self, threshold: u8) -> bool {
        self.free_len() * 100 / self.max_connections <= usize::from(threshold)
    }

    /// Post a coalesced wake-up to this partition's watcher
    ///
    /// A full channel means a signal is already pending and the post is
    /// dropped; a closed channel means the watcher exited at shutdown.
    pub(crate) fn signal_replenish(&self) {
        if let Err(mpsc::error::TrySendError::Full(())) = self.replenish_tx.try_send(()) {
            debug!(partition = self.index, "replenish signal already pending");
        }
    }

    /// Remove and return every free connection, e.g. for the shutdown drain
    pub(crate) fn drain_free(&self) -> Vec<ConnectionHandle<C>> {
        let mut free = self.free.lock().expect("free queue lock poisoned");
        free.drain(..).collect()
    }
}
