//! Connection factory and lifecycle hook traits
//!
//! The pool never opens connections itself; it drives a [`ConnectionFactory`]
//! supplied at construction. This keeps the pool generic over drivers and
//! makes tests trivial: a mock factory is an ordinary trait implementation,
//! no network required.

use async_trait::async_trait;
use std::fmt::Debug;

/// Source of raw connections for a pool
///
/// Implementations wrap a driver: open a connection from a URL and
/// credentials, a datasource object, or pre-authenticated driver properties.
/// The pool treats the produced connection as opaque and only distinguishes
/// "succeeded" from "failed".
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use shardpool::ConnectionFactory;
///
/// #[derive(Debug)]
/// struct TcpFactory {
///     addr: String,
/// }
///
/// #[async_trait]
/// impl ConnectionFactory for TcpFactory {
///     type Connection = tokio::net::TcpStream;
///
///     async fn create(&self) -> anyhow::Result<Self::Connection> {
///         Ok(tokio::net::TcpStream::connect(&self.addr).await?)
///     }
///
///     async fn validate(&self, conn: &mut Self::Connection) -> anyhow::Result<()> {
///         let mut buf = [0u8; 1];
///         match conn.try_read(&mut buf) {
///             Ok(0) => anyhow::bail!("connection closed by remote"),
///             Ok(_) => anyhow::bail!("unexpected data on idle connection"),
///             Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
///             Err(e) => Err(e.into()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait ConnectionFactory: Send + Sync + Debug + 'static {
    /// The raw connection type this factory produces
    type Connection: Send + 'static;

    /// Open one new raw connection
    ///
    /// Called by partition watchers and by the retrying creation path; the
    /// pool retries failures up to `acquire_retry_attempts` with
    /// `acquire_retry_delay` between attempts.
    async fn create(&self) -> anyhow::Result<Self::Connection>;

    /// Test whether a connection is still alive
    ///
    /// Any error means "not alive" and the connection is destroyed. Driver
    /// factories typically execute the configured test statement here, or
    /// fall back to a trivial metadata query.
    async fn validate(&self, conn: &mut Self::Connection) -> anyhow::Result<()>;

    /// Clear session state before a connection returns to the free queue
    ///
    /// Only called when `reset_connection_on_release` is configured. Driver
    /// factories roll back any open transaction and restore auto-commit. A
    /// failed reset destroys the connection instead of recycling it.
    async fn reset(&self, _conn: &mut Self::Connection) -> anyhow::Result<()> {
        Ok(())
    }

    /// Close a raw connection
    ///
    /// The default drops the connection, which is enough for most drivers.
    async fn destroy(&self, conn: Self::Connection) -> anyhow::Result<()> {
        drop(conn);
        Ok(())
    }
}

/// Callbacks fired at connection lifecycle transitions
///
/// All methods default to no-ops; implement only the events you care about.
/// Hooks run inline on the pool's paths, so they must be quick.
pub trait ConnectionHook: Send + Sync {
    /// A new raw connection was created by the factory
    fn on_acquire(&self) {}

    /// A connection was released back to the pool (recycled or destroyed)
    fn on_release(&self) {}

    /// A connection was destroyed and its partition slot freed
    fn on_destroy(&self) {}

    /// A factory creation attempt failed; `attempt` counts from 1
    fn on_checkout_failure(&self, _attempt: u32, _error: &anyhow::Error) {}
}
