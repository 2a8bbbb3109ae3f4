//! Leak detection for connections that are never released
//!
//! When enabled, every checkout captures a stack trace and arms a watchdog.
//! A release before the deadline cancels the watchdog silently. If the
//! deadline fires first, the leak is reported exactly once through the
//! configured [`LeakListener`] together with the captured trace, and — only
//! when `close_leaked_connections` is set — the checkout is flagged so its
//! eventual release destroys the connection instead of recycling it.
//!
//! The registry removal is the exactly-once arbiter: whichever side removes
//! the record (watchdog or release) wins, so a late release never produces a
//! second report or a double destroy.

use dashmap::DashMap;
use std::backtrace::Backtrace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

/// Details of one potentially leaked checkout
#[derive(Debug)]
pub struct LeakRecord {
    /// Identifier of the leaked connection handle
    pub handle_id: u64,
    /// When the connection was checked out
    pub checked_out_at: Instant,
    /// Stack trace captured at checkout time
    pub trace: String,
}

/// Sink that leak reports are delivered to
///
/// The default sink logs at warn level; tests and monitoring integrations
/// supply their own.
pub trait LeakListener: Send + Sync {
    /// Called exactly once per leaked checkout
    fn on_leak(&self, record: &LeakRecord);
}

impl<T: LeakListener + ?Sized> LeakListener for Arc<T> {
    fn on_leak(&self, record: &LeakRecord) {
        (**self).on_leak(record);
    }
}

/// Default listener: log the leak with its checkout trace
#[derive(Debug, Default)]
struct LogLeakListener;

impl LeakListener for LogLeakListener {
    fn on_leak(&self, record: &LeakRecord) {
        warn!(
            handle_id = record.handle_id,
            held_for = ?record.checked_out_at.elapsed(),
            "connection was checked out but never released; checkout trace:\n{}",
            record.trace
        );
    }
}

/// Per-pool leak monitor
#[derive(Debug)]
pub(crate) struct LeakMonitor {
    timeout: Duration,
    close_leaked: bool,
    records: Arc<DashMap<u64, LeakRecord>>,
    listener: Arc<dyn LeakListener>,
}

impl std::fmt::Debug for dyn LeakListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LeakListener")
    }
}

impl LeakMonitor {
    pub(crate) fn new(
        timeout: Duration,
        close_leaked: bool,
        listener: Option<Arc<dyn LeakListener>>,
    ) -> Self {
        Self {
            timeout,
            close_leaked,
            records: Arc::new(DashMap::new()),
            listener: listener.unwrap_or_else(|| Arc::new(LogLeakListener)),
        }
    }

    /// Arm a watchdog for one checkout
    ///
    /// Captures the current stack trace, files a [`LeakRecord`], and spawns
    /// the watchdog task. The returned ticket cancels everything on release.
    pub(crate) fn register(&self, handle_id: u64) -> LeakTicket {
        let checked_out_at = Instant::now();
        // Anchor the deadline at the checkout itself, not at the watchdog's
        // first poll; scheduler latency must not extend the grace period.
        let deadline = checked_out_at + self.timeout;
        let record = LeakRecord {
            handle_id,
            checked_out_at,
            trace: Backtrace::force_capture().to_string(),
        };
        self.records.insert(handle_id, record);

        let flagged = Arc::new(AtomicBool::new(false));
        let records = Arc::clone(&self.records);
        let listener = Arc::clone(&self.listener);
        let close_leaked = self.close_leaked;
        let flag = Arc::clone(&flagged);

        let watchdog = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // Removing the record decides the race against release
            if let Some((_, record)) = records.remove(&handle_id) {
                listener.on_leak(&record);
                if close_leaked {
                    flag.store(true, Ordering::Release);
                }
            }
        });

        LeakTicket {
            handle_id,
            watchdog,
            flagged,
            records: Arc::clone(&self.records),
        }
    }

    /// Number of checkouts currently under watch
    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        self.records.len()
    }
}

/// Cancellation token for one checkout's watchdog
#[derive(Debug)]
pub(crate) struct LeakTicket {
    handle_id: u64,
    watchdog: JoinHandle<()>,
    flagged: Arc<AtomicBool>,
    records: Arc<DashMap<u64, LeakRecord>>,
}

impl LeakTicket {
    /// Whether the watchdog already reported this checkout and the pool is
    /// configured to close leaked connections
    pub(crate) fn is_flagged_for_close(&self) -> bool {
        self.flagged.load(Ordering::Acquire)
    }

    /// Disarm the watchdog; a no-op if it already fired
    pub(crate) fn cancel(self) {
        self.watchdog.abort();
        self.records.remove(&self.handle_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct CountingListener {
        reports: AtomicUsize,
    }

    impl LeakListener for CountingListener {
        fn on_leak(&self, _record: &LeakRecord) {
            self.reports.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn settle() {
        // Let spawned watchdogs run after a clock advance
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_reports_after_timeout() {
        let listener = Arc::new(CountingListener::default());
        let monitor = LeakMonitor::new(Duration::from_secs(10), false, Some(listener.clone()));

        let ticket = monitor.register(7);
        assert_eq!(monitor.outstanding(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        settle().await;

        assert_eq!(listener.reports.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.outstanding(), 0);
        assert!(!ticket.is_flagged_for_close());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_deadline_suppresses_report() {
        let listener = Arc::new(CountingListener::default());
        let monitor = LeakMonitor::new(Duration::from_secs(10), false, Some(listener.clone()));

        let ticket = monitor.register(7);
        tokio::time::advance(Duration::from_secs(5)).await;
        ticket.cancel();

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;

        assert_eq!(listener.reports.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_fires_exactly_once() {
        let listener = Arc::new(CountingListener::default());
        let monitor = LeakMonitor::new(Duration::from_secs(10), false, Some(listener.clone()));

        let ticket = monitor.register(7);
        tokio::time::advance(Duration::from_secs(11)).await;
        settle().await;

        // Late release must not produce a second report
        ticket.cancel();
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;

        assert_eq!(listener.reports.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_leaked_flags_checkout() {
        let listener = Arc::new(CountingListener::default());
        let monitor = LeakMonitor::new(Duration::from_secs(10), true, Some(listener.clone()));

        let ticket = monitor.register(7);
        tokio::time::advance(Duration::from_secs(11)).await;
        settle().await;

        assert!(ticket.is_flagged_for_close());
    }
}
