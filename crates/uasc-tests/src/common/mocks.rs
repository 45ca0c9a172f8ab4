// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Mock implementations for testing the transport in isolation.
//!
//! ## Design Principles
//!
//! - Configurable behavior for different test scenarios
//! - Recording of interactions for verification
//! - Thread-safe for concurrent testing
//! - Easy to set up error injection

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;

use uasc_core::channel::{ChannelSupplier, CloseHook, CloseReason, SecureChannel};
use uasc_core::error::{TransportError, TransportResult};
use uasc_core::types::{ChannelId, OutboundRequest};
use uasc_server::binding::ConnectionHandler;
use uasc_server::registry::ConnectionRecord;

// =============================================================================
// ScriptedChannel
// =============================================================================

/// A scriptable [`SecureChannel`] for driving the correlator in tests.
pub struct ScriptedChannel {
    id: ChannelId,

    /// Flipped off once the channel is closed.
    active: AtomicBool,

    /// Force the next write to fail.
    fail_next_write: AtomicBool,

    /// Force all writes to fail.
    fail_all_writes: AtomicBool,

    /// Artificial latency applied to every write.
    write_latency: Mutex<Duration>,

    /// Every request successfully written.
    written: Mutex<Vec<OutboundRequest>>,

    /// Close hooks awaiting the close event.
    hooks: Mutex<Vec<CloseHook>>,

    /// Write count, including failed writes.
    write_count: AtomicU64,
}

impl ScriptedChannel {
    /// Creates an active channel with the given id.
    pub fn new(id: u32) -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::new(id),
            active: AtomicBool::new(true),
            fail_next_write: AtomicBool::new(false),
            fail_all_writes: AtomicBool::new(false),
            write_latency: Mutex::new(Duration::ZERO),
            written: Mutex::new(Vec::new()),
            hooks: Mutex::new(Vec::new()),
            write_count: AtomicU64::new(0),
        })
    }

    /// Forces the next write to fail with a broken pipe.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Forces every write to fail.
    pub fn fail_all_writes(&self) {
        self.fail_all_writes.store(true, Ordering::SeqCst);
    }

    /// Applies artificial latency to writes.
    pub fn set_write_latency(&self, latency: Duration) {
        *self.write_latency.lock() = latency;
    }

    /// Closes the channel, firing every registered hook.
    pub fn close(&self, reason: CloseReason) {
        self.active.store(false, Ordering::SeqCst);
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            hook(reason.clone());
        }
    }

    /// Requests written so far.
    pub fn written(&self) -> Vec<OutboundRequest> {
        self.written.lock().clone()
    }

    /// Total write attempts.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecureChannel for ScriptedChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn write(&self, request: OutboundRequest) -> io::Result<()> {
        self.write_count.fetch_add(1, Ordering::SeqCst);

        let latency = *self.write_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.fail_all_writes.load(Ordering::SeqCst)
            || self.fail_next_write.swap(false, Ordering::SeqCst)
        {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted write failure"));
        }
        if !self.is_active() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "channel closed"));
        }

        self.written.lock().push(request);
        Ok(())
    }

    fn on_close(&self, hook: CloseHook) {
        if !self.is_active() {
            hook(CloseReason::Closed);
            return;
        }
        self.hooks.lock().push(hook);
    }
}

// =============================================================================
// ScriptedSupplier
// =============================================================================

/// A [`ChannelSupplier`] handing out a configurable channel.
pub struct ScriptedSupplier {
    channel: Mutex<Option<Arc<ScriptedChannel>>>,
    acquire_count: AtomicU64,
}

impl ScriptedSupplier {
    /// Creates a supplier that always returns `channel`.
    pub fn with_channel(channel: Arc<ScriptedChannel>) -> Arc<Self> {
        Arc::new(Self {
            channel: Mutex::new(Some(channel)),
            acquire_count: AtomicU64::new(0),
        })
    }

    /// Creates a supplier with no channel; every acquire fails.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            channel: Mutex::new(None),
            acquire_count: AtomicU64::new(0),
        })
    }

    /// Replaces the channel handed out, simulating a reconnect.
    pub fn replace_channel(&self, channel: Arc<ScriptedChannel>) {
        *self.channel.lock() = Some(channel);
    }

    /// Removes the channel; subsequent acquires fail.
    pub fn clear_channel(&self) {
        *self.channel.lock() = None;
    }

    /// Total acquire attempts.
    pub fn acquire_count(&self) -> u64 {
        self.acquire_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelSupplier for ScriptedSupplier {
    async fn acquire(&self) -> TransportResult<Arc<dyn SecureChannel>> {
        self.acquire_count.fetch_add(1, Ordering::SeqCst);
        match self.channel.lock().clone() {
            Some(channel) => Ok(channel),
            None => Err(TransportError::channel_unavailable(
                "scripted supplier has no channel",
            )),
        }
    }
}

// =============================================================================
// HoldConnectionHandler
// =============================================================================

/// Handshake stand-in that parks each admitted socket until its connection
/// handle closes, then drops it.
///
/// This mimics the ownership contract of the real handshake pipeline: the
/// socket lives exactly as long as the connection is live, so an evicted
/// peer observes EOF.
pub struct HoldConnectionHandler {
    handled: AtomicU64,
}

impl HoldConnectionHandler {
    /// Creates the handler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handled: AtomicU64::new(0),
        })
    }

    /// Number of admitted connections seen.
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionHandler for HoldConnectionHandler {
    async fn handle(&self, stream: TcpStream, record: Arc<ConnectionRecord>) {
        self.handled.fetch_add(1, Ordering::SeqCst);
        record.handle().closed().await;
        drop(stream);
    }
}
