// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Registry of live accepted connections, ordered by acceptance time.
//!
//! The registry answers one question admission control keeps asking under
//! concurrent churn: which live connection is the oldest one that no
//! session has bound to yet. Records are totally ordered by their creation
//! instant, with an insertion sequence breaking ties so "oldest" stays well
//! defined even when two accepts land on the same clock reading.
//!
//! All mutation happens in short critical sections under one mutex; no lock
//! is ever held across an await point.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use uasc_core::channel::ConnectionHandle;
use uasc_core::types::SessionId;

// =============================================================================
// ConnectionKey
// =============================================================================

/// Total order for connection records: creation instant ascending, then
/// insertion sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionKey {
    /// Monotonic creation timestamp.
    pub created_at: Instant,

    /// Insertion sequence, the stable tiebreaker.
    pub seq: u64,
}

// =============================================================================
// ConnectionRecord
// =============================================================================

/// Metadata record attached to one accepted connection.
///
/// The record is a fixed, typed set of tags rather than a generic attribute
/// bag: the creation timestamps, the endpoint URL the connection arrived
/// on, and the session identifier a higher layer may bind later. Binding a
/// session never changes registry membership; it only marks the record as
/// protected from eviction.
pub struct ConnectionRecord {
    key: ConnectionKey,
    handle: Arc<ConnectionHandle>,
    endpoint_url: String,
    accepted_at: DateTime<Utc>,
    session_id: RwLock<Option<SessionId>>,
}

impl ConnectionRecord {
    /// Creates a record for a connection accepted now.
    pub fn new(handle: Arc<ConnectionHandle>, endpoint_url: impl Into<String>, seq: u64) -> Self {
        Self {
            key: ConnectionKey {
                created_at: Instant::now(),
                seq,
            },
            handle,
            endpoint_url: endpoint_url.into(),
            accepted_at: Utc::now(),
            session_id: RwLock::new(None),
        }
    }

    /// Returns the ordering key.
    #[inline]
    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    /// Returns the connection's control handle.
    #[inline]
    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    /// Returns the endpoint URL the connection was accepted on.
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Monotonic creation timestamp, the eviction ordering criterion.
    #[inline]
    pub fn created_at(&self) -> Instant {
        self.key.created_at
    }

    /// Wall-clock acceptance time, kept for logging.
    pub fn accepted_at(&self) -> DateTime<Utc> {
        self.accepted_at
    }

    /// Returns the bound session id, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        *self.session_id.read()
    }

    /// Returns `true` once a session has bound to this connection.
    pub fn is_session_bound(&self) -> bool {
        self.session_id.read().is_some()
    }

    /// Marks the connection as carrying an authenticated session.
    ///
    /// Called by the session layer once establishment completes. Returns
    /// `false` if a session was already bound.
    pub fn bind_session(&self, session_id: SessionId) -> bool {
        let mut slot = self.session_id.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(session_id);
        tracing::debug!(
            channel_id = %self.handle.id(),
            session_id = %session_id,
            "session bound to connection"
        );
        true
    }
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("channel_id", &self.handle.id())
            .field("seq", &self.key.seq)
            .field("endpoint_url", &self.endpoint_url)
            .field("session_bound", &self.is_session_bound())
            .finish()
    }
}

// =============================================================================
// ChannelRegistry
// =============================================================================

/// Creation-time-ordered set of live connections.
pub struct ChannelRegistry {
    records: Mutex<BTreeMap<ConnectionKey, Arc<ConnectionRecord>>>,
    stats: RegistryStats,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            stats: RegistryStats::new(),
        }
    }

    /// Inserts a record, returning the new live count.
    pub fn insert(&self, record: Arc<ConnectionRecord>) -> usize {
        let mut records = self.records.lock();
        records.insert(record.key(), record);
        self.stats.record_inserted();
        records.len()
    }

    /// Removes a record by key.
    ///
    /// Safe to call repeatedly; deregistration hooks and explicit removal
    /// may both attempt it.
    pub fn remove(&self, key: &ConnectionKey) -> Option<Arc<ConnectionRecord>> {
        let removed = self.records.lock().remove(key);
        if removed.is_some() {
            self.stats.record_removed();
        }
        removed
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if no connections are tracked.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Returns the oldest connection no session has bound to.
    pub fn oldest_sessionless(&self) -> Option<Arc<ConnectionRecord>> {
        self.records
            .lock()
            .values()
            .find(|record| !record.is_session_bound())
            .cloned()
    }

    /// Removes and returns the oldest session-less connection.
    pub fn take_oldest_sessionless(&self) -> Option<Arc<ConnectionRecord>> {
        let mut records = self.records.lock();
        let key = records
            .values()
            .find(|record| !record.is_session_bound())
            .map(|record| record.key())?;
        let record = records.remove(&key);
        if record.is_some() {
            self.stats.record_removed();
        }
        record
    }

    /// Returns every live record in creation order.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionRecord>> {
        self.records.lock().values().cloned().collect()
    }

    /// Removes and returns every live record.
    pub fn drain(&self) -> Vec<Arc<ConnectionRecord>> {
        let mut records = self.records.lock();
        let drained: Vec<_> = std::mem::take(&mut *records).into_values().collect();
        self.stats.record_removed_many(drained.len() as u64);
        drained
    }

    /// Returns the registry statistics.
    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("live", &self.len())
            .finish()
    }
}

// =============================================================================
// RegistryStats
// =============================================================================

/// Statistics for registry mutation.
#[derive(Debug)]
pub struct RegistryStats {
    inserted: AtomicU64,
    removed: AtomicU64,
}

impl RegistryStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self {
            inserted: AtomicU64::new(0),
            removed: AtomicU64::new(0),
        }
    }

    fn record_inserted(&self) {
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_removed(&self) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_removed_many(&self, count: u64) {
        self.removed.fetch_add(count, Ordering::Relaxed);
    }

    /// Total records ever inserted.
    pub fn inserted(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    /// Total records ever removed.
    pub fn removed(&self) -> u64 {
        self.removed.load(Ordering::Relaxed)
    }
}

impl Default for RegistryStats {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
