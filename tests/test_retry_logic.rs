//! Factory retry behavior on connection creation failures

mod common;

use common::{CountingHook, MockFactory, test_config};
use shardpool::{Pool, PoolConfig, PoolError};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_creation_failure_exhausts_configured_attempts() {
    let factory = MockFactory::default();
    factory.state.failing_creates.store(100, Ordering::SeqCst);
    let hook = CountingHook::default();

    let config = PoolConfig {
        acquire_retry_attempts: 3,
        acquire_retry_delay: Duration::from_secs(1),
        ..test_config(1, 2)
    };
    let err = Pool::builder(factory.clone())
        .config(config)
        .connection_hook(hook.clone())
        .build()
        .await
        .unwrap_err();

    match err {
        PoolError::ConnectionCreation { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected creation failure, got {other:?}"),
    }
    assert_eq!(hook.counts.checkout_failures.load(Ordering::SeqCst), 3);
    assert_eq!(factory.state.created.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_creation_succeeds_after_transient_failures() -> anyhow::Result<()> {
    let factory = MockFactory::default();
    factory.state.failing_creates.store(2, Ordering::SeqCst);
    let hook = CountingHook::default();

    let config = PoolConfig {
        acquire_retry_attempts: 5,
        acquire_retry_delay: Duration::from_secs(1),
        ..test_config(1, 2)
    };
    let pool = Pool::builder(factory.clone())
        .config(config)
        .connection_hook(hook.clone())
        .build()
        .await?;

    // Two failed attempts, then the third succeeded
    assert_eq!(hook.counts.checkout_failures.load(Ordering::SeqCst), 2);
    assert_eq!(hook.counts.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(pool.total_free(), 1);
    pool.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_retryable_classification() {
    let timeout = PoolError::AcquisitionTimeout {
        waited: Duration::from_secs(1),
    };
    assert!(timeout.is_retryable());
    assert!(!timeout.is_shutdown());

    let shutdown = PoolError::PoolShutDown;
    assert!(!shutdown.is_retryable());
    assert!(shutdown.is_shutdown());
}
