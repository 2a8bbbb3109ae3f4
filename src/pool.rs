//! Pool manager: the public façade over partitions and schedulers
//!
//! `Pool` is a cheap-to-clone handle over shared state. Acquisition picks a
//! partition round-robin, tries a non-blocking pop, and only then blocks on
//! that partition's queue under the configured timeout while a low-watermark
//! signal asks the partition's watcher to create more connections in the
//! background. Release recycles healthy connections and destroys broken,
//! expired, or leak-flagged ones, signalling the watcher for a replacement.
//!
//! Shutdown is idempotent: the first call stops the schedulers, fails every
//! blocked acquirer fast, and drains/destroys all free connections; later
//! calls are no-ops.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::factory::{ConnectionFactory, ConnectionHook};
use crate::handle::{ConnectionHandle, Pooled};
use crate::keepalive::run_keepalive;
use crate::leak::{LeakListener, LeakMonitor};
use crate::partition::Partition;
use crate::stats::{PartitionStats, PoolStats};
use crate::strategy::PartitionSelector;
use crate::watcher::run_watcher;

/// Shared pool state behind the `Pool` handle
pub(crate) struct PoolInner<C: Send + 'static> {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory<Connection = C>>,
    partitions: Vec<Partition<C>>,
    selector: PartitionSelector,
    hook: Option<Arc<dyn ConnectionHook>>,
    leak_monitor: Option<LeakMonitor>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    next_handle_id: AtomicU64,
    /// Watcher and keep-alive task handles, aborted at shutdown
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: Send + 'static> PoolInner<C> {
    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub(crate) fn partition(&self, index: usize) -> &Partition<C> {
        &self.partitions[index]
    }

    pub(crate) fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    pub(crate) fn new_handle(&self, partition_index: usize, raw: C) -> ConnectionHandle<C> {
        let id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
        ConnectionHandle::new(id, partition_index, raw)
    }

    /// Acquire one new raw connection from the factory, retrying up to the
    /// configured attempt count with the configured delay in between
    ///
    /// Shutdown interrupts the inter-attempt delay and aborts the retry
    /// loop, surfacing failure immediately instead of retrying forever.
    pub(crate) async fn obtain_raw_connection(&self) -> Result<C, PoolError> {
        let attempts = self.config.acquire_retry_attempts;
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut last_err = None;
        let mut made = 0u32;

        for attempt in 1..=attempts {
            if self.is_shutdown() {
                break;
            }
            match self.factory.create().await {
                Ok(raw) => {
                    if let Some(hook) = &self.hook {
                        hook.on_acquire();
                    }
                    return Ok(raw);
                }
                Err(e) => {
                    made = attempt;
                    warn!(attempt, attempts, error = %e, "connection creation attempt failed");
                    if let Some(hook) = &self.hook {
                        hook.on_checkout_failure(attempt, &e);
                    }
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.acquire_retry_delay) => {}
                            _ = shutdown_rx.wait_for(|stopped| *stopped) => break,
                        }
                    }
                }
            }
        }

        match last_err {
            Some(source) => Err(PoolError::ConnectionCreation {
                attempts: made,
                source,
            }),
            None => Err(PoolError::PoolShutDown),
        }
    }

    /// Liveness test through the factory; any error means "not alive"
    pub(crate) async fn is_connection_alive(&self, handle: &mut ConnectionHandle<C>) -> bool {
        match self.factory.validate(handle.raw_mut()).await {
            Ok(()) => true,
            Err(e) => {
                debug!(handle_id = handle.id(), error = %e, "connection failed liveness test");
                false
            }
        }
    }

    /// Wake a partition's watcher when its free count dropped under the
    /// availability watermark and it can still grow
    pub(crate) fn maybe_signal_for_more_connections(&self, partition_index: usize) {
        let partition = self.partition(partition_index);
        if !partition.at_capacity()
            && partition.below_watermark(self.config.pool_availability_threshold)
        {
            partition.signal_replenish();
        }
    }

    /// Destroy a handle's raw connection and free its partition slot
    ///
    /// Returns the destroy error, if any; counters are adjusted regardless.
    pub(crate) async fn destroy_handle(&self, handle: ConnectionHandle<C>) -> Option<anyhow::Error> {
        let partition_index = handle.partition();
        let handle_id = handle.id();
        let result = self.factory.destroy(handle.into_raw()).await;
        self.post_destroy(partition_index);
        match result {
            Ok(()) => {
                debug!(handle_id, partition = partition_index, "connection destroyed");
                None
            }
            Err(e) => {
                warn!(handle_id, partition = partition_index, error = %e, "connection destroy failed");
                Some(e)
            }
        }
    }

    /// Counter and hook bookkeeping after a raw connection is gone
    pub(crate) fn post_destroy(&self, partition_index: usize) {
        self.partition(partition_index).release_slot();
        if let Some(hook) = &self.hook {
            hook.on_destroy();
        }
    }

    /// Full release path: destroy broken/expired/leak-flagged connections,
    /// recycle the rest
    pub(crate) async fn internal_release(
        &self,
        mut handle: ConnectionHandle<C>,
        leak_flagged: bool,
    ) {
        if let Some(hook) = &self.hook {
            hook.on_release();
        }
        let partition_index = handle.partition();
        let now = Instant::now();

        let expired = handle.is_expired(self.config.max_connection_age, now);
        let broken =
            handle.is_possibly_broken() && !self.is_connection_alive(&mut handle).await;

        if broken || expired || leak_flagged || self.is_shutdown() {
            self.destroy_handle(handle).await;
            self.partition(partition_index).signal_replenish();
            return;
        }

        if self.config.reset_connection_on_release
            && let Err(e) = self.factory.reset(handle.raw_mut()).await
        {
            warn!(handle_id = handle.id(), error = %e, "connection reset failed; destroying");
            self.destroy_handle(handle).await;
            self.partition(partition_index).signal_replenish();
            return;
        }

        handle.mark_released();
        self.partition(partition_index).push(handle);
    }

    /// Drain every partition's free queue, destroying every connection
    ///
    /// Individual destroy failures never stop the drain; the last failure is
    /// surfaced once the drain completes.
    pub(crate) async fn terminate_all_connections(&self) -> Result<(), PoolError> {
        let mut failed = 0usize;
        let mut last = None;
        for partition in &self.partitions {
            let drained = partition.drain_free();
            if !drained.is_empty() {
                debug!(
                    partition = partition.index(),
                    count = drained.len(),
                    "draining free connections"
                );
            }
            for handle in drained {
                if let Some(e) = self.destroy_handle(handle).await {
                    failed += 1;
                    last = Some(e);
                }
            }
        }
        match last {
            None => Ok(()),
            Some(last) => Err(PoolError::DestroyFailure { failed, last }),
        }
    }
}

impl<C: Send + 'static> Drop for PoolInner<C> {
    fn drop(&mut self) {
        // Background tasks hold only weak references, but abort them anyway
        // so they stop promptly rather than at their next wake-up.
        for task in self.tasks.lock().expect("task list lock poisoned").drain(..) {
            task.abort();
        }
    }
}

/// Partitioned connection pool
///
/// Cloning is cheap and every clone drives the same pool. See the crate
/// docs for a usage example.
pub struct Pool<C: Send + 'static> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Send + 'static> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Send + 'static> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("partitions", &self.inner.partition_count())
            .field("created", &self.total_created_connections())
            .field("free", &self.total_free())
            .field("shutdown", &self.inner.is_shutdown())
            .finish()
    }
}

impl<C: Send + 'static> Pool<C> {
    /// Start building a pool around a connection factory
    pub fn builder(factory: impl ConnectionFactory<Connection = C>) -> PoolBuilder<C> {
        PoolBuilder {
            config: PoolConfig::default(),
            factory: Arc::new(factory),
            hook: None,
            leak_listener: None,
        }
    }

    /// Lease a connection from the pool
    ///
    /// Picks a partition round-robin, pops its free queue, and on starvation
    /// signals the watcher and blocks until a connection is released or
    /// created, bounded by `acquire_timeout`.
    ///
    /// # Errors
    ///
    /// [`PoolError::PoolShutDown`] once shutdown was initiated, or
    /// [`PoolError::AcquisitionTimeout`] when the wait bound elapses.
    pub async fn get_connection(&self) -> Result<Pooled<C>, PoolError> {
        let inner = &self.inner;
        if inner.is_shutdown() {
            return Err(PoolError::PoolShutDown);
        }

        let partition_index = inner.selector.select();
        let partition = inner.partition(partition_index);

        if let Some(handle) = partition.try_acquire() {
            return Ok(self.checkout(handle));
        }
        inner.maybe_signal_for_more_connections(partition_index);

        let started = Instant::now();
        let deadline = inner.config.acquire_timeout.map(|timeout| started + timeout);
        let mut shutdown_rx = inner.shutdown_rx.clone();

        loop {
            // Register for a wake-up before re-checking the queue so a push
            // landing in between is never missed.
            let available = partition.notified();
            if let Some(handle) = partition.try_acquire() {
                partition.wake_next_waiter();
                return Ok(self.checkout(handle));
            }
            if inner.is_shutdown() {
                return Err(PoolError::PoolShutDown);
            }

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = available => {}
                        _ = shutdown_rx.wait_for(|stopped| *stopped) => {
                            return Err(PoolError::PoolShutDown);
                        }
                        _ = tokio::time::sleep_until(deadline) => {
                            return Err(PoolError::AcquisitionTimeout {
                                waited: started.elapsed(),
                            });
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = available => {}
                        _ = shutdown_rx.wait_for(|stopped| *stopped) => {
                            return Err(PoolError::PoolShutDown);
                        }
                    }
                }
            }
        }
    }

    /// Like [`get_connection`](Self::get_connection), but an acquisition
    /// timeout yields `Ok(None)` instead of an error
    pub async fn try_get_connection(&self) -> Result<Option<Pooled<C>>, PoolError> {
        match self.get_connection().await {
            Ok(conn) => Ok(Some(conn)),
            Err(PoolError::AcquisitionTimeout { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Lease a connection without blocking the calling task
    ///
    /// The whole acquisition runs on a spawned task; the returned handle
    /// resolves to the same result `get_connection` would produce.
    pub fn get_connection_async(&self) -> JoinHandle<Result<Pooled<C>, PoolError>> {
        let pool = self.clone();
        tokio::spawn(async move { pool.get_connection().await })
    }

    /// Return a leased connection to the pool
    ///
    /// Healthy connections go back to their partition's free queue (after an
    /// optional factory reset); broken, expired, or leak-flagged ones are
    /// destroyed and the watcher is signalled to create a replacement.
    ///
    /// # Errors
    ///
    /// [`PoolError::DoubleRelease`] if this guard was already released.
    pub async fn release_connection(&self, conn: &mut Pooled<C>) -> Result<(), PoolError> {
        let handle = conn.take_handle().ok_or(PoolError::DoubleRelease)?;
        let leak_flagged = conn
            .take_leak_ticket()
            .map(|ticket| {
                let flagged = ticket.is_flagged_for_close();
                ticket.cancel();
                flagged
            })
            .unwrap_or(false);
        self.inner.internal_release(handle, leak_flagged).await;
        Ok(())
    }

    /// Best-effort release used by the guard's `Drop`
    ///
    /// Cannot await: a healthy handle that needs no factory reset is pushed
    /// back synchronously. Anything needing async work (destruction, or the
    /// configured reset before recycling) runs the full release on a spawned
    /// task, falling back to dropping the raw connection with counter fix-up
    /// when no runtime is available.
    pub(crate) fn release_on_drop(&self, mut handle: ConnectionHandle<C>, leak_flagged: bool) {
        let inner = &self.inner;
        let now = Instant::now();
        let destroy = handle.is_possibly_broken()
            || leak_flagged
            || handle.is_expired(inner.config.max_connection_age, now)
            || inner.is_shutdown();

        if !destroy && !inner.config.reset_connection_on_release {
            if let Some(hook) = &inner.hook {
                hook.on_release();
            }
            handle.mark_released();
            inner.partition(handle.partition()).push(handle);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(&self.inner);
                runtime.spawn(async move {
                    inner.internal_release(handle, leak_flagged).await;
                });
            }
            Err(_) => {
                // No runtime to reset or destroy on; recycling without the
                // reset would hand out dirty state, so the connection is lost.
                if let Some(hook) = &inner.hook {
                    hook.on_release();
                }
                let partition_index = handle.partition();
                drop(handle.into_raw());
                inner.post_destroy(partition_index);
            }
        }
    }

    /// Stop the pool: reject new acquisitions, fail blocked ones fast, stop
    /// the schedulers, and destroy every free connection
    ///
    /// Idempotent — a second call does nothing and returns `Ok`.
    ///
    /// # Errors
    ///
    /// [`PoolError::DestroyFailure`] if any connection failed to destroy;
    /// the drain still ran to completion.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        if self.inner.shutdown_tx.send_replace(true) {
            debug!("pool shutdown already performed");
            return Ok(());
        }
        info!("shutting down connection pool");

        let tasks: Vec<_> = {
            let mut tasks = self.inner.tasks.lock().expect("task list lock poisoned");
            tasks.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }

        let result = self.inner.terminate_all_connections().await;
        info!("connection pool shut down");
        result
    }

    /// Alias for [`shutdown`](Self::shutdown)
    pub async fn close(&self) -> Result<(), PoolError> {
        self.shutdown().await
    }

    /// Whether shutdown has been initiated
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    /// Connections currently leased to callers, across all partitions
    #[must_use]
    pub fn total_leased(&self) -> usize {
        self.inner.partitions.iter().map(|p| p.leased()).sum()
    }

    /// Connections sitting in free queues, across all partitions
    #[must_use]
    pub fn total_free(&self) -> usize {
        self.inner.partitions.iter().map(|p| p.free_len()).sum()
    }

    /// Raw connections currently allocated, across all partitions
    #[must_use]
    pub fn total_created_connections(&self) -> usize {
        self.inner.partitions.iter().map(|p| p.created()).sum()
    }

    /// The effective configuration
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Read-only snapshot of pool counters with per-partition breakdown
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let partitions = self
            .inner
            .partitions
            .iter()
            .map(|p| PartitionStats {
                index: p.index(),
                created: p.created(),
                free: p.free_len(),
                leased: p.leased(),
                min_connections: p.min_connections(),
                max_connections: p.max_connections(),
            })
            .collect();
        PoolStats::from_partitions(partitions)
    }

    /// Renew a handle and wrap it for the caller
    fn checkout(&self, mut handle: ConnectionHandle<C>) -> Pooled<C> {
        // Checkouts shrink the free queue; top the partition back up in the
        // background once it drops under the watermark.
        self.inner.maybe_signal_for_more_connections(handle.partition());
        handle.renew();
        let leak = self
            .inner
            .leak_monitor
            .as_ref()
            .map(|monitor| monitor.register(handle.id()));
        debug!(
            handle_id = handle.id(),
            partition = handle.partition(),
            "connection checked out"
        );
        Pooled::new(handle, self.clone(), leak)
    }
}

/// Builder for [`Pool`]
pub struct PoolBuilder<C: Send + 'static> {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory<Connection = C>>,
    hook: Option<Arc<dyn ConnectionHook>>,
    leak_listener: Option<Arc<dyn LeakListener>>,
}

impl<C: Send + 'static> PoolBuilder<C> {
    /// Use this configuration instead of the defaults
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a lifecycle hook
    #[must_use]
    pub fn connection_hook(mut self, hook: impl ConnectionHook + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Deliver leak reports to this sink instead of the logging default
    #[must_use]
    pub fn leak_listener(mut self, listener: impl LeakListener + 'static) -> Self {
        self.leak_listener = Some(Arc::new(listener));
        self
    }

    /// Validate the configuration, fill each partition to its minimum, and
    /// start the background schedulers
    ///
    /// # Errors
    ///
    /// [`PoolError::Config`] on invalid configuration, or
    /// [`PoolError::ConnectionCreation`] if the initial fill fails.
    pub async fn build(self) -> Result<Pool<C>, PoolError> {
        self.config.validate()?;

        let mut partitions = Vec::with_capacity(self.config.partition_count);
        let mut receivers = Vec::with_capacity(self.config.partition_count);
        for index in 0..self.config.partition_count {
            let (partition, rx) = Partition::new(
                index,
                self.config.min_connections_per_partition,
                self.config.max_connections_per_partition,
                self.config.service_order,
            );
            partitions.push(partition);
            receivers.push(rx);
        }

        let leak_monitor = self.config.leak_detection_timeout.map(|timeout| {
            LeakMonitor::new(
                timeout,
                self.config.close_leaked_connections,
                self.leak_listener,
            )
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let selector = PartitionSelector::new(self.config.partition_count);
        let keepalive_period = self.config.idle_connection_test_period;

        let inner = Arc::new(PoolInner {
            config: self.config,
            factory: self.factory,
            partitions,
            selector,
            hook: self.hook,
            leak_monitor,
            shutdown_tx,
            shutdown_rx,
            next_handle_id: AtomicU64::new(1),
            tasks: Mutex::new(Vec::new()),
        });

        // Fill each partition to its minimum before handing the pool out
        for index in 0..inner.partition_count() {
            let partition = inner.partition(index);
            while partition.created() < partition.min_connections() {
                if !partition.reserve_slot() {
                    break;
                }
                match inner.obtain_raw_connection().await {
                    Ok(raw) => {
                        let handle = inner.new_handle(index, raw);
                        partition.push(handle);
                    }
                    Err(e) => {
                        partition.release_slot();
                        return Err(e);
                    }
                }
            }
        }

        let weak = Arc::downgrade(&inner);
        let mut tasks: Vec<JoinHandle<()>> = receivers
            .into_iter()
            .enumerate()
            .map(|(index, rx)| tokio::spawn(run_watcher(Weak::clone(&weak), index, rx)))
            .collect();
        if !keepalive_period.is_zero() {
            let first_tick = Instant::now() + keepalive_period;
            tasks.push(tokio::spawn(run_keepalive(weak, keepalive_period, first_tick)));
        }
        *inner.tasks.lock().expect("task list lock poisoned") = tasks;

        info!(
            partitions = inner.partition_count(),
            min = inner.config().min_connections_per_partition,
            max = inner.config().max_connections_per_partition,
            order = ?inner.config().service_order,
            "connection pool started"
        );
        Ok(Pool { inner })
    }
}
