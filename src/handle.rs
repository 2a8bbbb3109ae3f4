//! Connection handle lifecycle and the public checkout guard
//!
//! A [`ConnectionHandle`] wraps one raw connection together with the
//! pool-private state that drives its lifecycle: FREE (sitting in a
//! partition's free queue) → LEASED (owned by exactly one caller through a
//! [`Pooled`] guard) → back to FREE on a healthy release, or DESTROYED when
//! broken, aged out, or drained at shutdown. A handle never changes
//! partitions.

use std::ops::{Deref, DerefMut};
use tokio::time::Instant;

use crate::leak::LeakTicket;
use crate::pool::Pool;

/// Pool-private wrapper around one raw connection
#[derive(Debug)]
pub(crate) struct ConnectionHandle<C> {
    id: u64,
    partition: usize,
    raw: C,
    created_at: Instant,
    last_used_at: Instant,
    /// True whenever the handle is not leased to a caller
    logically_closed: bool,
    /// Set by callers via [`Pooled::mark_broken`]; checked on release
    possibly_broken: bool,
}

impl<C> ConnectionHandle<C> {
    pub(crate) fn new(id: u64, partition: usize, raw: C) -> Self {
        let now = Instant::now();
        Self {
            id,
            partition,
            raw,
            created_at: now,
            last_used_at: now,
            logically_closed: true,
            possibly_broken: false,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn partition(&self) -> usize {
        self.partition
    }

    pub(crate) fn raw_mut(&mut self) -> &mut C {
        &mut self.raw
    }

    /// Consume the handle and hand back the raw connection for destruction
    pub(crate) fn into_raw(self) -> C {
        self.raw
    }

    /// Transition FREE → LEASED: refresh the timestamp and clear flags
    pub(crate) fn renew(&mut self) {
        self.logically_closed = false;
        self.possibly_broken = false;
        self.last_used_at = Instant::now();
    }

    /// Transition LEASED → FREE: refresh the timestamp and close logically
    pub(crate) fn mark_released(&mut self) {
        self.logically_closed = true;
        self.last_used_at = Instant::now();
    }

    pub(crate) fn mark_broken(&mut self) {
        self.possibly_broken = true;
    }

    pub(crate) fn is_possibly_broken(&self) -> bool {
        self.possibly_broken
    }

    #[cfg(test)]
    pub(crate) fn is_logically_closed(&self) -> bool {
        self.logically_closed
    }

    /// Time since this handle was created
    pub(crate) fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Time since this handle was last leased or released
    pub(crate) fn idle_time(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    /// Whether the handle exceeded the configured maximum lifetime.
    /// A zero max age means connections never expire.
    pub(crate) fn is_expired(&self, max_age: std::time::Duration, now: Instant) -> bool {
        !max_age.is_zero() && self.age(now) > max_age
    }
}

/// A leased connection, exclusively owned by the caller until released
///
/// Dereferences to the raw connection. Release explicitly through
/// [`Pool::release_connection`] — that path runs the full health check and
/// surfaces [`PoolError::DoubleRelease`](crate::PoolError::DoubleRelease) on
/// a second release. Dropping the guard instead performs a best-effort
/// return: healthy connections go straight back to their partition, broken
/// ones are destroyed in the background.
///
/// Using the guard after it was released is a programming error and panics.
#[derive(Debug)]
pub struct Pooled<C: Send + 'static> {
    handle: Option<ConnectionHandle<C>>,
    pool: Pool<C>,
    leak: Option<LeakTicket>,
}

impl<C: Send + 'static> Pooled<C> {
    pub(crate) fn new(handle: ConnectionHandle<C>, pool: Pool<C>, leak: Option<LeakTicket>) -> Self {
        Self {
            handle: Some(handle),
            pool,
            leak,
        }
    }

    /// Identifier of the underlying handle, stable across checkouts
    ///
    /// # Panics
    ///
    /// Panics if the guard was already released.
    #[must_use]
    pub fn handle_id(&self) -> u64 {
        self.handle().id()
    }

    /// Index of the partition that owns this connection
    #[must_use]
    pub fn partition_index(&self) -> usize {
        self.handle().partition()
    }

    /// Flag the connection as broken so release destroys it instead of
    /// recycling it
    ///
    /// Call this after observing an I/O error on the raw connection.
    pub fn mark_broken(&mut self) {
        self.handle
            .as_mut()
            .expect("connection handle already released")
            .mark_broken();
    }

    fn handle(&self) -> &ConnectionHandle<C> {
        self.handle
            .as_ref()
            .expect("connection handle already released")
    }

    /// Take the handle out for release; `None` means double release
    pub(crate) fn take_handle(&mut self) -> Option<ConnectionHandle<C>> {
        self.handle.take()
    }

    /// Cancel and take the leak watchdog, if one was registered
    pub(crate) fn take_leak_ticket(&mut self) -> Option<LeakTicket> {
        self.leak.take()
    }
}

impl<C: Send + 'static> Deref for Pooled<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self
            .handle
            .as_ref()
            .expect("connection handle already released")
            .raw
    }
}

impl<C: Send + 'static> DerefMut for Pooled<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.handle
            .as_mut()
            .expect("connection handle already released")
            .raw_mut()
    }
}

impl<C: Send + 'static> Drop for Pooled<C> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let leak_flagged = self
                .leak
                .take()
                .map(|ticket| {
                    let flagged = ticket.is_flagged_for_close();
                    ticket.cancel();
                    flagged
                })
                .unwrap_or(false);
            self.pool.release_on_drop(handle, leak_flagged);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_handle_starts_logically_closed() {
        let handle = ConnectionHandle::new(1, 0, ());
        assert!(handle.is_logically_closed());
        assert!(!handle.is_possibly_broken());
        assert_eq!(handle.id(), 1);
        assert_eq!(handle.partition(), 0);
    }

    #[test]
    fn test_renew_opens_handle_and_clears_broken() {
        let mut handle = ConnectionHandle::new(1, 0, ());
        handle.mark_broken();
        handle.renew();
        assert!(!handle.is_logically_closed());
        assert!(!handle.is_possibly_broken());
    }

    #[test]
    fn test_mark_released_closes_handle() {
        let mut handle = ConnectionHandle::new(1, 0, ());
        handle.renew();
        handle.mark_released();
        assert!(handle.is_logically_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_respects_zero_max_age() {
        let handle = ConnectionHandle::new(1, 0, ());
        tokio::time::advance(Duration::from_secs(3600)).await;
        let now = Instant::now();

        assert!(!handle.is_expired(Duration::ZERO, now));
        assert!(handle.is_expired(Duration::from_secs(60), now));
        assert!(!handle.is_expired(Duration::from_secs(7200), now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_tracks_last_use() {
        let mut handle = ConnectionHandle::new(1, 0, ());
        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(handle.idle_time(Instant::now()), Duration::from_secs(100));

        handle.renew();
        assert_eq!(handle.idle_time(Instant::now()), Duration::ZERO);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(handle.idle_time(Instant::now()), Duration::from_secs(5));
        // Age keeps counting from creation
        assert_eq!(handle.age(Instant::now()), Duration::from_secs(105));
    }
}
