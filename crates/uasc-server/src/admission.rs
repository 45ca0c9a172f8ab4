// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection admission under a hard capacity bound.
//!
//! Every accepted connection passes through here exactly once, before the
//! handshake pipeline ever sees it. The policy bounds resource consumption
//! by pre-session connections without ever consulting the session layer:
//! the registry's typed metadata is the only cross-layer signal.
//!
//! With capacity `C` and the live set `S`:
//!
//! 1. `|S| < C`: admit.
//! 2. Otherwise evict the oldest connection that carries no session, then
//!    admit.
//! 3. If every live connection is session-bound, reject the newcomer.
//!
//! Session-bound connections are never evicted. Rejection is a normal
//! outcome of capacity pressure, not a fault; the listener keeps accepting.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use uasc_core::channel::CloseReason;

use crate::registry::{ChannelRegistry, ConnectionRecord};

// =============================================================================
// AdmissionDecision
// =============================================================================

/// Outcome of one admission check.
#[derive(Debug)]
pub enum AdmissionDecision {
    /// The connection joined the live set within capacity.
    Admitted,

    /// The connection joined the live set after the contained record was
    /// evicted and closed.
    Evicted(Arc<ConnectionRecord>),

    /// The connection was closed without ever joining the live set.
    Rejected,
}

impl AdmissionDecision {
    /// Returns `true` if the new connection may proceed to the handshake.
    #[inline]
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

// =============================================================================
// ConnectionAdmission
// =============================================================================

/// Capacity-bounded admission controller.
///
/// Decisions are serialized so concurrent accepts on different I/O tasks
/// cannot overshoot capacity; each decision is a short critical section
/// with no await inside. Closures happen through the connection's handle,
/// so the victim's own deregistration hook still runs (as an idempotent
/// no-op, since the decision already removed it).
pub struct ConnectionAdmission {
    capacity: usize,
    registry: Arc<ChannelRegistry>,
    decision_lock: Mutex<()>,
    stats: AdmissionStats,
}

impl ConnectionAdmission {
    /// Creates a controller enforcing `capacity` over `registry`.
    pub fn new(capacity: usize, registry: Arc<ChannelRegistry>) -> Self {
        Self {
            capacity,
            registry,
            decision_lock: Mutex::new(()),
            stats: AdmissionStats::new(),
        }
    }

    /// Returns the configured capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Decides the fate of a newly accepted connection.
    ///
    /// On eviction the victim is closed before this returns; on rejection
    /// the newcomer is closed and never inserted. The registry size never
    /// exceeds the capacity once this returns.
    pub fn admit(&self, record: Arc<ConnectionRecord>) -> AdmissionDecision {
        let _guard = self.decision_lock.lock();

        if self.registry.len() < self.capacity {
            self.registry.insert(record);
            self.stats.record_admitted();
            return AdmissionDecision::Admitted;
        }

        match self.registry.take_oldest_sessionless() {
            Some(victim) => {
                tracing::info!(
                    channel_id = %victim.handle().id(),
                    age_ms = victim.created_at().elapsed().as_millis() as u64,
                    "evicting oldest session-less connection"
                );
                victim.handle().close(CloseReason::Evicted);
                self.registry.insert(record);
                self.stats.record_evicted();
                AdmissionDecision::Evicted(victim)
            }
            None => {
                tracing::warn!(
                    channel_id = %record.handle().id(),
                    capacity = self.capacity,
                    "rejecting connection: all live connections are session-bound"
                );
                record.handle().close(CloseReason::Rejected);
                self.stats.record_rejected();
                AdmissionDecision::Rejected
            }
        }
    }

    /// Returns the admission statistics.
    pub fn stats(&self) -> &AdmissionStats {
        &self.stats
    }
}

impl fmt::Debug for ConnectionAdmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionAdmission")
            .field("capacity", &self.capacity)
            .field("live", &self.registry.len())
            .finish()
    }
}

// =============================================================================
// AdmissionStats
// =============================================================================

/// Statistics for admission decisions.
#[derive(Debug)]
pub struct AdmissionStats {
    admitted: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
}

impl AdmissionStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self {
            admitted: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Connections that joined the live set.
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Evictions performed to make room.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Connections turned away.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

impl Default for AdmissionStats {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uasc_core::channel::ConnectionHandle;
    use uasc_core::types::{ChannelId, SessionId};

    fn record(seq: u64) -> Arc<ConnectionRecord> {
        Arc::new(ConnectionRecord::new(
            Arc::new(ConnectionHandle::new(ChannelId::new(seq as u32))),
            "opc.tcp://localhost:4840",
            seq,
        ))
    }

    fn controller(capacity: usize) -> (ConnectionAdmission, Arc<ChannelRegistry>) {
        let registry = Arc::new(ChannelRegistry::new());
        (
            ConnectionAdmission::new(capacity, Arc::clone(&registry)),
            registry,
        )
    }

    #[test]
    fn test_admits_below_capacity() {
        let (admission, registry) = controller(2);

        assert!(matches!(
            admission.admit(record(1)),
            AdmissionDecision::Admitted
        ));
        assert!(matches!(
            admission.admit(record(2)),
            AdmissionDecision::Admitted
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_evicts_oldest_sessionless_at_capacity() {
        let (admission, registry) = controller(2);
        let a = record(1);
        let b = record(2);
        admission.admit(a.clone());
        admission.admit(b.clone());

        let c = record(3);
        match admission.admit(c.clone()) {
            AdmissionDecision::Evicted(victim) => {
                assert_eq!(victim.key(), a.key());
                assert!(victim.handle().is_closed());
                assert_eq!(victim.handle().close_reason(), Some(CloseReason::Evicted));
            }
            other => panic!("expected eviction, got {:?}", other),
        }

        // Final live set is {B, C}, still at capacity.
        assert_eq!(registry.len(), 2);
        let keys: Vec<_> = registry.snapshot().iter().map(|r| r.key()).collect();
        assert_eq!(keys, vec![b.key(), c.key()]);
    }

    #[test]
    fn test_rejects_when_all_session_bound() {
        let (admission, registry) = controller(2);
        let a = record(1);
        let b = record(2);
        admission.admit(a.clone());
        admission.admit(b.clone());
        a.bind_session(SessionId::generate());
        b.bind_session(SessionId::generate());

        let c = record(3);
        assert!(matches!(
            admission.admit(c.clone()),
            AdmissionDecision::Rejected
        ));
        assert!(c.handle().is_closed());
        assert_eq!(c.handle().close_reason(), Some(CloseReason::Rejected));

        // Live set unchanged.
        assert_eq!(registry.len(), 2);
        assert!(!a.handle().is_closed());
        assert!(!b.handle().is_closed());
    }

    #[test]
    fn test_session_bound_connection_outlives_younger_sessionless() {
        let (admission, registry) = controller(2);
        let a = record(1);
        let b = record(2);
        admission.admit(a.clone());
        admission.admit(b.clone());

        // The older connection is protected; the younger one is not.
        a.bind_session(SessionId::generate());

        match admission.admit(record(3)) {
            AdmissionDecision::Evicted(victim) => assert_eq!(victim.key(), b.key()),
            other => panic!("expected eviction, got {:?}", other),
        }
        assert_eq!(registry.len(), 2);
        assert!(!a.handle().is_closed());
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let (admission, registry) = controller(0);

        assert!(matches!(
            admission.admit(record(1)),
            AdmissionDecision::Rejected
        ));
        assert!(registry.is_empty());
        assert_eq!(admission.stats().rejected(), 1);
    }

    #[test]
    fn test_capacity_never_exceeded_under_concurrent_admits() {
        let registry = Arc::new(ChannelRegistry::new());
        let admission = Arc::new(ConnectionAdmission::new(4, Arc::clone(&registry)));

        let mut threads = Vec::new();
        for seq in 0..32u64 {
            let admission = Arc::clone(&admission);
            threads.push(std::thread::spawn(move || {
                admission.admit(record(seq));
            }));
        }
        for thread in threads {
            thread.join().expect("admit thread");
        }

        assert_eq!(registry.len(), 4);
        assert_eq!(admission.stats().admitted(), 32);
        assert_eq!(admission.stats().evicted(), 28);
    }
}
