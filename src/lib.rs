//! Partitioned asynchronous connection pool
//!
//! Connections are split across independent partitions to keep contention
//! local: acquisition picks a partition round-robin and only touches that
//! partition's queue. Each partition has its own watcher task that creates
//! connections in the background when the free count drops under an
//! availability watermark, and a shared keep-alive task periodically tests
//! and evicts idle or aged-out connections. Optional leak detection reports
//! checkouts that are never released, with the stack trace of the checkout
//! site.
//!
//! Connections are produced, validated, and torn down through a
//! [`ConnectionFactory`] you implement; the pool is agnostic to what the
//! connections actually are.
//!
//! ```no_run
//! use shardpool::{Pool, PoolConfig, ConnectionFactory};
//! use tokio::net::TcpStream;
//!
//! #[derive(Debug)]
//! struct TcpFactory {
//!     addr: String,
//! }
//!
//! #[async_trait::async_trait]
//! impl ConnectionFactory for TcpFactory {
//!     type Connection = TcpStream;
//!
//!     async fn create(&self) -> anyhow::Result<TcpStream> {
//!         Ok(TcpStream::connect(&self.addr).await?)
//!     }
//!
//!     async fn validate(&self, conn: &mut TcpStream) -> anyhow::Result<()> {
//!         conn.peer_addr()?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let pool = Pool::builder(TcpFactory { addr: "127.0.0.1:5432".into() })
//!     .config(PoolConfig {
//!         partition_count: 2,
//!         min_connections_per_partition: 2,
//!         max_connections_per_partition: 8,
//!         ..PoolConfig::default()
//!     })
//!     .build()
//!     .await?;
//!
//! let mut conn = pool.get_connection().await?;
//! // ... use *conn ...
//! pool.release_connection(&mut conn).await?;
//!
//! pool.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod factory;
mod handle;
mod keepalive;
mod leak;
mod partition;
mod pool;
mod stats;
mod strategy;
mod watcher;

pub use config::{ConfigError, PoolConfig, load_config};
pub use error::PoolError;
pub use factory::{ConnectionFactory, ConnectionHook};
pub use handle::Pooled;
pub use leak::{LeakListener, LeakRecord};
pub use pool::{Pool, PoolBuilder};
pub use stats::{PartitionStats, PoolStats};
pub use strategy::ServiceOrder;
