//! Error types for pool operations
//!
//! Callers only ever see a small set of failures: timeout, shutdown
//! rejection, creation failure, double release, and destroy failures
//! surfaced after a drain. Broken or aged-out connections detected on
//! release or by the keep-alive task are handled internally (destroy and
//! replace) and never reach the caller that released them.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by pool operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// No connection became available within the configured wait bound
    #[error("timed out after {waited:?} waiting for a connection")]
    AcquisitionTimeout {
        /// How long the caller waited before giving up
        waited: Duration,
    },

    /// Acquisition attempted after shutdown was initiated
    #[error("pool is shut down")]
    PoolShutDown,

    /// The connection factory failed on every attempt
    #[error("connection creation failed after {attempts} attempt(s)")]
    ConnectionCreation {
        /// Total attempts made before giving up
        attempts: u32,
        /// The error from the last attempt
        #[source]
        source: anyhow::Error,
    },

    /// Release called on a handle that was already released
    #[error("connection handle was already released")]
    DoubleRelease,

    /// One or more connections failed to destroy during a drain
    ///
    /// The drain itself always runs to completion; this carries the failure
    /// count and the last underlying error.
    #[error("{failed} connection(s) failed to destroy during drain")]
    DestroyFailure {
        /// Number of connections whose destroy call failed
        failed: usize,
        /// The last destroy error observed
        #[source]
        last: anyhow::Error,
    },

    /// Configuration rejected by validation
    #[error("invalid pool configuration")]
    Config(#[from] ConfigError),
}

impl PoolError {
    /// Check whether the caller may usefully retry the operation
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AcquisitionTimeout { .. } | Self::ConnectionCreation { .. }
        )
    }

    /// Check whether this failure means the pool is gone for good
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::PoolShutDown)
    }
}
