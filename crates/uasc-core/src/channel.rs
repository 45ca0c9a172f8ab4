// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Channel abstractions shared by the client and server halves of the
//! transport.
//!
//! The conversation layer never touches sockets or wire framing directly.
//! On the client side it talks to a [`SecureChannel`] obtained from a
//! [`ChannelSupplier`]; on the server side each accepted connection is
//! represented by a [`ConnectionHandle`] that carries the close signal and
//! close-notification hooks. One implementation of each seam exists per
//! transport profile (TCP today), keeping correlation and admission logic
//! profile-agnostic.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::TransportResult;
use crate::types::{ChannelId, OutboundRequest};

// =============================================================================
// CloseReason
// =============================================================================

/// Why a channel or connection was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly local or peer close.
    Closed,

    /// Evicted by admission control to make room for a new connection.
    Evicted,

    /// Turned away by admission control before ever joining the live set.
    Rejected,

    /// Transport-level fault.
    Fault(String),
}

impl CloseReason {
    /// Returns `true` if the closure was caused by a fault.
    #[inline]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Evicted => write!(f, "evicted"),
            Self::Rejected => write!(f, "rejected"),
            Self::Fault(detail) => write!(f, "fault: {}", detail),
        }
    }
}

/// Callback invoked exactly once when a channel closes.
pub type CloseHook = Box<dyn FnOnce(CloseReason) + Send>;

// =============================================================================
// SecureChannel
// =============================================================================

/// A live secure channel the client can write requests to.
///
/// Implementations wrap the concrete transport and the encoding layer; the
/// correlator only needs to write stamped requests, observe liveness, and
/// learn about closure.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; writes arrive from arbitrary
/// tasks.
#[async_trait]
pub trait SecureChannel: Send + Sync {
    /// Returns the channel identifier.
    fn id(&self) -> ChannelId;

    /// Returns `true` if the channel is currently able to carry requests.
    fn is_active(&self) -> bool;

    /// Writes a stamped request to the channel.
    ///
    /// Resolution of the write future acknowledges the local write only;
    /// the response arrives separately through the receive pipeline.
    async fn write(&self, request: OutboundRequest) -> std::io::Result<()>;

    /// Registers a hook invoked once when the channel closes or faults.
    ///
    /// If the channel is already closed the hook fires immediately.
    fn on_close(&self, hook: CloseHook);
}

// =============================================================================
// ChannelSupplier
// =============================================================================

/// Source of live secure channels.
///
/// The supplier hides channel lifecycle (handshake, reconnect) from the
/// correlator. `acquire` either returns a usable channel or fails with
/// `ChannelUnavailable`; it must not block indefinitely.
#[async_trait]
pub trait ChannelSupplier: Send + Sync {
    /// Obtains a live channel, waiting for establishment if one is in
    /// progress.
    async fn acquire(&self) -> TransportResult<Arc<dyn SecureChannel>>;
}

// =============================================================================
// ConnectionHandle
// =============================================================================

/// Control handle for a server-side accepted connection.
///
/// The handle does not own the socket. It owns the close signal: admission
/// control, `unbind`, and the connection's own I/O task all close through
/// it, and whichever party closes first wins. Close hooks registered on the
/// handle fire exactly once, which is how registry deregistration is
/// guaranteed no matter what caused the closure.
pub struct ConnectionHandle {
    /// Channel id assigned at accept time.
    id: ChannelId,

    /// Set once, by the first successful `close`.
    closed: AtomicBool,

    /// Wakes tasks parked in [`ConnectionHandle::closed`].
    notify: Notify,

    /// Hooks pending invocation, drained on close.
    hooks: Mutex<Vec<CloseHook>>,

    /// Reason recorded by the winning close.
    reason: Mutex<Option<CloseReason>>,
}

impl ConnectionHandle {
    /// Creates an open handle.
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            notify: Notify::new(),
            hooks: Mutex::new(Vec::new()),
            reason: Mutex::new(None),
        }
    }

    /// Returns the channel id.
    #[inline]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Returns `true` once the connection has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the close reason, if the connection has closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.reason.lock().clone()
    }

    /// Closes the connection, invoking every registered hook with `reason`.
    ///
    /// Only the first call has any effect; later calls return `false`.
    pub fn close(&self, reason: CloseReason) -> bool {
        // The closed flag and the reason are committed under the hooks
        // lock, so a racing `on_close` either lands in the drained list or
        // observes the final state.
        let hooks = {
            let mut hooks = self.hooks.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return false;
            }
            *self.reason.lock() = Some(reason.clone());
            std::mem::take(&mut *hooks)
        };

        for hook in hooks {
            hook(reason.clone());
        }

        self.notify.notify_waiters();
        true
    }

    /// Registers a hook invoked once on close.
    ///
    /// If the connection is already closed the hook fires immediately with
    /// the recorded reason.
    pub fn on_close(&self, hook: CloseHook) {
        let immediate = {
            let mut hooks = self.hooks.lock();
            if self.is_closed() {
                Some(hook)
            } else {
                hooks.push(hook);
                None
            }
        };

        if let Some(hook) = immediate {
            let reason = self.close_reason().unwrap_or(CloseReason::Closed);
            hook(reason);
        }
    }

    /// Waits until the connection is closed.
    pub async fn closed(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
