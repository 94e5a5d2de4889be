//! Correlation Registry - maps correlation ids to outstanding calls.
//!
//! Flow:
//! 1. `send` generates a CorrelationId and calls `register()` BEFORE publishing
//! 2. The reply pump receives a delivery and calls `fulfil()`
//! 3. The caller consumes the reply through `wait()` (blocking with timeout)
//!    or `take()` (non-blocking poll)
//! 4. Entries nobody consumes are removed by `remove_expired()` (TTL reaper)
//!
//! The map is guarded by one registry-wide lock which is never held while a
//! caller is suspended. Each PendingCall owns its own wake primitive, a
//! `watch` cell, so a reply stored before anybody waits is observed
//! immediately and no wake-up can be lost.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::RegistryError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// A reply routed to its pending call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Opaque reply body
    pub payload: Bytes,
    /// Time between registration and fulfilment
    pub elapsed: Duration,
}

/// One outstanding request awaiting its reply.
#[derive(Debug)]
pub struct PendingCall {
    id: CorrelationId,
    slot: watch::Sender<Option<Reply>>,
    created_at: Instant,
}

impl PendingCall {
    fn new(id: CorrelationId) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            id,
            slot,
            created_at: Instant::now(),
        }
    }

    /// Correlation id of this call
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// When the call was registered
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// The reply, if one has arrived
    pub fn reply(&self) -> Option<Reply> {
        self.slot.borrow().clone()
    }

    /// Whether a reply has arrived
    pub fn is_fulfilled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Store the reply and wake every waiter. Returns `true` if an earlier
    /// reply was overwritten.
    fn fill(&self, payload: Bytes) -> bool {
        let reply = Reply {
            payload,
            elapsed: self.created_at.elapsed(),
        };
        let mut replaced = false;
        self.slot.send_modify(|slot| {
            replaced = slot.is_some();
            *slot = Some(reply);
        });
        replaced
    }

    /// Resolve once a reply is present. Checks the current value first.
    async fn fulfilled(&self) -> Option<Reply> {
        let mut rx = self.slot.subscribe();
        let reply = rx.wait_for(Option::is_some).await;
        reply.ok().and_then(|r| (*r).clone())
    }
}

/// Statistics for the correlation registry
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Calls registered
    pub total_registered: AtomicU64,
    /// Replies routed to a pending call
    pub total_fulfilled: AtomicU64,
    /// Replies handed to a caller (entry removed)
    pub total_consumed: AtomicU64,
    /// `wait` calls that ran out of time
    pub total_timeouts: AtomicU64,
    /// Replies for ids with no pending call
    pub total_orphaned: AtomicU64,
    /// Replies that overwrote an earlier one for the same id
    pub total_duplicate_replies: AtomicU64,
    /// Entries removed by the TTL reaper
    pub total_evicted: AtomicU64,
    /// Entries removed explicitly
    pub total_released: AtomicU64,
}

impl RegistryStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Thread-safe map from correlation id to [`PendingCall`].
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<CorrelationId, Arc<PendingCall>>>,
    stats: RegistryStats,
}

impl CorrelationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh pending call for `id`.
    ///
    /// # Errors
    ///
    /// `RegistryError::DuplicateId` if `id` is still outstanding. Ids are
    /// random v4 UUIDs, so this indicates a broken invariant.
    pub fn register(&self, id: CorrelationId) -> Result<Arc<PendingCall>, RegistryError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&id) {
            error!(correlation_id = %id, "Correlation id registered twice");
            return Err(RegistryError::DuplicateId(id));
        }

        let call = Arc::new(PendingCall::new(id));
        pending.insert(id, Arc::clone(&call));
        drop(pending);

        RegistryStats::bump(&self.stats.total_registered);
        debug!(correlation_id = %id, "Registered pending call");
        Ok(call)
    }

    /// Store `payload` as the reply for `id` and wake its waiters.
    ///
    /// Returns `false` if no call is pending under `id` (late reply after
    /// eviction, or a reply this client never asked for). A second reply for
    /// the same id replaces the first.
    pub fn fulfil(&self, id: &CorrelationId, payload: Bytes) -> bool {
        let call = self.pending.lock().get(id).cloned();

        let Some(call) = call else {
            RegistryStats::bump(&self.stats.total_orphaned);
            debug!(correlation_id = %id, "Reply for unknown or expired correlation id");
            return false;
        };

        if call.fill(payload) {
            RegistryStats::bump(&self.stats.total_duplicate_replies);
            warn!(correlation_id = %id, "Duplicate reply replaced an earlier one");
        } else {
            RegistryStats::bump(&self.stats.total_fulfilled);
        }
        debug!(
            correlation_id = %id,
            elapsed_ms = call.created_at().elapsed().as_millis() as u64,
            "Fulfilled pending call"
        );
        true
    }

    /// Non-blocking read. Consumes the entry if a reply is present; an
    /// unfulfilled entry stays registered.
    pub fn take(&self, id: &CorrelationId) -> Option<Reply> {
        let mut pending = self.pending.lock();
        let reply = pending.get(id)?.reply()?;
        pending.remove(id);
        drop(pending);

        RegistryStats::bump(&self.stats.total_consumed);
        Some(reply)
    }

    /// Suspend until the reply for `id` arrives or `timeout` elapses.
    ///
    /// The registry lock is only held to look the call up. On success the
    /// entry is consumed; on timeout it stays, so a later `take` can still
    /// pull a reply that arrives afterwards. Unknown ids resolve to `None`
    /// immediately since nothing could ever fulfil them.
    pub async fn wait(&self, id: &CorrelationId, timeout: Duration) -> Option<Reply> {
        let call = self.pending.lock().get(id).cloned();
        let Some(call) = call else {
            debug!(correlation_id = %id, "Wait on unknown correlation id");
            return None;
        };

        match tokio::time::timeout(timeout, call.fulfilled()).await {
            Ok(Some(reply)) => {
                self.consume(&call);
                Some(reply)
            }
            Ok(None) | Err(_) => {
                RegistryStats::bump(&self.stats.total_timeouts);
                debug!(
                    correlation_id = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for reply"
                );
                None
            }
        }
    }

    /// Remove `call` if it is still the entry registered under its id.
    fn consume(&self, call: &Arc<PendingCall>) {
        let mut pending = self.pending.lock();
        if pending
            .get(&call.id())
            .is_some_and(|current| Arc::ptr_eq(current, call))
        {
            pending.remove(&call.id());
            drop(pending);
            RegistryStats::bump(&self.stats.total_consumed);
        }
    }

    /// Drop the entry for `id` regardless of its state.
    pub fn remove(&self, id: &CorrelationId) -> bool {
        if self.pending.lock().remove(id).is_some() {
            RegistryStats::bump(&self.stats.total_released);
            true
        } else {
            false
        }
    }

    /// Remove entries older than `ttl` (TTL cleanup).
    ///
    /// Returns the number of entries removed.
    pub fn remove_expired(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.pending.lock().retain(|id, call| {
            let age = now.saturating_duration_since(call.created_at());
            if age > ttl {
                debug!(
                    correlation_id = %id,
                    age_ms = age.as_millis() as u64,
                    fulfilled = call.is_fulfilled(),
                    "Evicting expired pending call"
                );
                removed += 1;
                false
            } else {
                true
            }
        });

        self.stats
            .total_evicted
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Get number of currently pending calls
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Check if a correlation id is pending
    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.pending.lock().contains_key(id)
    }

    /// Get statistics
    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }
}
