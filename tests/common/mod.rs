//! Shared mock factory and hook for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use shardpool::{ConnectionFactory, ConnectionHook, PoolConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Raw "connection" handed out by the mock factory
#[derive(Debug)]
pub struct MockConn {
    pub serial: usize,
}

/// Counters and failure switches shared with the test body
#[derive(Debug, Default)]
pub struct FactoryState {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub validations: AtomicUsize,
    pub resets: AtomicUsize,
    /// Number of upcoming create calls that fail before succeeding again
    pub failing_creates: AtomicUsize,
    pub fail_validation: AtomicBool,
    pub fail_destroy: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    pub state: Arc<FactoryState>,
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConn;

    async fn create(&self) -> anyhow::Result<MockConn> {
        let consumed_failure = self
            .state
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed_failure {
            anyhow::bail!("injected create failure");
        }
        let serial = self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConn { serial })
    }

    async fn validate(&self, _conn: &mut MockConn) -> anyhow::Result<()> {
        self.state.validations.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_validation.load(Ordering::SeqCst) {
            anyhow::bail!("injected validation failure");
        }
        Ok(())
    }

    async fn reset(&self, _conn: &mut MockConn) -> anyhow::Result<()> {
        self.state.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self, conn: MockConn) -> anyhow::Result<()> {
        drop(conn);
        self.state.destroyed.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_destroy.load(Ordering::SeqCst) {
            anyhow::bail!("injected destroy failure");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct HookCounts {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub checkout_failures: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
pub struct CountingHook {
    pub counts: Arc<HookCounts>,
}

impl ConnectionHook for CountingHook {
    fn on_acquire(&self) {
        self.counts.acquired.fetch_add(1, Ordering::SeqCst);
    }
    fn on_release(&self) {
        self.counts.released.fetch_add(1, Ordering::SeqCst);
    }
    fn on_destroy(&self) {
        self.counts.destroyed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_checkout_failure(&self, _attempt: u32, _error: &anyhow::Error) {
        self.counts.checkout_failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// Single small partition with background maintenance disabled, so tests see
/// only the connections they explicitly drive
pub fn test_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        partition_count: 1,
        min_connections_per_partition: min,
        max_connections_per_partition: max,
        acquire_retry_attempts: 1,
        acquire_retry_delay: Duration::from_millis(10),
        idle_connection_test_period: Duration::ZERO,
        idle_max_age: Duration::from_secs(3600),
        ..PoolConfig::default()
    }
}

/// Turn on log output for a test run; the filter comes from `RUST_LOG`
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}

/// Poll until a background task has caught up
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Yield enough times for spawned tasks to run after a paused-clock advance
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
