// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Listener lifecycle for the server transport.
//!
//! The binding owns the accept side of the transport: it binds listening
//! sockets, tags every accepted connection with its typed metadata record,
//! runs the admission check, and hands admitted connections to the external
//! handshake pipeline. Correlation and admission logic above this module
//! never see a socket.
//!
//! ```text
//! TcpListener ──accept──▶ tag (record, hooks) ──▶ ConnectionAdmission
//!                                                      │
//!                                   rejected ◀─────────┼──────▶ admitted
//!                                   (closed)           │    ConnectionHandler
//!                                                      ▼    (handshake, external)
//!                                                 eviction of
//!                                                 oldest session-less
//! ```
//!
//! `bind` is idempotent per address and the shared acceptor bootstrap is
//! built lazily on first use; `unbind` tears everything down, including the
//! bootstrap, so a later `bind` starts fresh.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use uasc_core::channel::{CloseReason, ConnectionHandle};
use uasc_core::error::{BindError, BindResult};
use uasc_core::types::ChannelId;

use crate::admission::{AdmissionDecision, ConnectionAdmission};
use crate::config::ServerTransportConfig;
use crate::registry::{ChannelRegistry, ConnectionRecord};

// =============================================================================
// ConnectionHandler
// =============================================================================

/// External handshake pipeline for admitted connections.
///
/// The handler receives ownership of the socket together with the
/// connection's metadata record. It is expected to watch
/// [`ConnectionHandle::closed`] and release the socket when the connection
/// is evicted or the binding is torn down.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Drives one admitted connection, starting with the handshake.
    async fn handle(&self, stream: TcpStream, record: Arc<ConnectionRecord>);
}

/// Customization hook invoked per accepted connection, after tagging and
/// before the admission decision.
pub type AcceptHook = dyn Fn(&ConnectionRecord) + Send + Sync;

// =============================================================================
// ApplicationContext
// =============================================================================

/// Server application identity used to tag accepted connections.
#[derive(Debug, Clone)]
pub struct ApplicationContext {
    /// Human-readable application name, used in logs.
    pub application_name: String,

    /// Endpoint URL advertised for connections. When absent, a URL is
    /// derived from the bound address.
    pub endpoint_url: Option<String>,
}

impl ApplicationContext {
    /// Creates a context deriving endpoint URLs from bound addresses.
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            endpoint_url: None,
        }
    }

    /// Sets an explicit endpoint URL.
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    fn endpoint_for(&self, local_addr: SocketAddr) -> String {
        self.endpoint_url
            .clone()
            .unwrap_or_else(|| format!("opc.tcp://{}", local_addr))
    }
}

// =============================================================================
// TransportBinding
// =============================================================================

struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Server listener lifecycle: bind, accept, admit, unbind.
pub struct TransportBinding {
    config: ServerTransportConfig,
    handler: Arc<dyn ConnectionHandler>,
    accept_hook: Option<Arc<AcceptHook>>,
    registry: Arc<ChannelRegistry>,
    admission: Arc<ConnectionAdmission>,
    listeners: tokio::sync::Mutex<HashMap<SocketAddr, ListenerHandle>>,
    bootstrap: parking_lot::Mutex<Option<Arc<AcceptorBootstrap>>>,
}

impl TransportBinding {
    /// Creates an unbound transport binding.
    pub fn new(config: ServerTransportConfig, handler: Arc<dyn ConnectionHandler>) -> Self {
        let registry = Arc::new(ChannelRegistry::new());
        let admission = Arc::new(ConnectionAdmission::new(
            config.capacity,
            Arc::clone(&registry),
        ));
        Self {
            config,
            handler,
            accept_hook: None,
            registry,
            admission,
            listeners: tokio::sync::Mutex::new(HashMap::new()),
            bootstrap: parking_lot::Mutex::new(None),
        }
    }

    /// Installs a per-connection customization hook.
    pub fn with_accept_hook(mut self, hook: Arc<AcceptHook>) -> Self {
        self.accept_hook = Some(hook);
        self
    }

    /// Binds a listener on `addr` and starts accepting.
    ///
    /// Binding an address that is already bound is a no-op returning the
    /// existing local address. A bind failure surfaces here and leaves no
    /// listener or registry state behind. Returns the bound local address,
    /// which differs from `addr` when port 0 was requested.
    pub async fn bind(
        &self,
        context: &ApplicationContext,
        addr: SocketAddr,
    ) -> BindResult<SocketAddr> {
        let mut listeners = self.listeners.lock().await;
        if let Some(existing) = listeners.get(&addr) {
            tracing::debug!(address = %addr, "listener already bound");
            return Ok(existing.local_addr);
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BindError::bind(addr, source))?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BindError::bind(addr, source))?;

        let bootstrap = self.acceptor_bootstrap();
        let endpoint_url = context.endpoint_for(local_addr);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let retry_delay = self.config.accept_retry_delay;
        let task = tokio::spawn(accept_loop(
            listener,
            bootstrap,
            endpoint_url,
            shutdown_rx,
            retry_delay,
        ));

        tracing::info!(
            address = %local_addr,
            application = %context.application_name,
            capacity = self.config.capacity,
            "transport listener bound"
        );
        listeners.insert(
            addr,
            ListenerHandle {
                local_addr,
                shutdown: shutdown_tx,
                task,
            },
        );
        Ok(local_addr)
    }

    /// Stops every listener and closes every tracked connection.
    ///
    /// Session-bound connections are closed like any other. The registry,
    /// the bound-address set, and the lazily built acceptor bootstrap are
    /// all cleared, so a later [`bind`](Self::bind) starts from scratch.
    /// Idempotent and safe to call when nothing is bound.
    pub async fn unbind(&self) {
        let mut listeners = self.listeners.lock().await;
        for (addr, listener) in listeners.drain() {
            let _ = listener.shutdown.send(true);
            if let Err(error) = listener.task.await {
                if !error.is_cancelled() {
                    tracing::warn!(address = %addr, error = %error, "accept loop ended abnormally");
                }
            }
            tracing::info!(address = %addr, "listener unbound");
        }
        drop(listeners);

        let drained = self.registry.drain();
        if !drained.is_empty() {
            tracing::info!(connections = drained.len(), "closing tracked connections");
            for record in drained {
                record.handle().close(CloseReason::Closed);
            }
        }

        *self.bootstrap.lock() = None;
    }

    /// Returns the live-connection registry.
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Returns the admission controller.
    pub fn admission(&self) -> &Arc<ConnectionAdmission> {
        &self.admission
    }

    /// Number of currently bound listener addresses.
    pub async fn bound_count(&self) -> usize {
        self.listeners.lock().await.len()
    }

    /// Returns or lazily constructs the shared acceptor wiring.
    fn acceptor_bootstrap(&self) -> Arc<AcceptorBootstrap> {
        let mut slot = self.bootstrap.lock();
        match slot.as_ref() {
            Some(bootstrap) => Arc::clone(bootstrap),
            None => {
                tracing::debug!("constructing acceptor bootstrap");
                let bootstrap = Arc::new(AcceptorBootstrap {
                    next_channel_id: AtomicU32::new(1),
                    next_seq: AtomicU64::new(1),
                    registry: Arc::clone(&self.registry),
                    admission: Arc::clone(&self.admission),
                    handler: Arc::clone(&self.handler),
                    accept_hook: self.accept_hook.clone(),
                });
                *slot = Some(Arc::clone(&bootstrap));
                bootstrap
            }
        }
    }
}

impl fmt::Debug for TransportBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBinding")
            .field("capacity", &self.config.capacity)
            .field("live", &self.registry.len())
            .finish()
    }
}

// =============================================================================
// Accept path
// =============================================================================

/// Per-accept wiring shared by all listeners of one binding generation.
struct AcceptorBootstrap {
    next_channel_id: AtomicU32,
    next_seq: AtomicU64,
    registry: Arc<ChannelRegistry>,
    admission: Arc<ConnectionAdmission>,
    handler: Arc<dyn ConnectionHandler>,
    accept_hook: Option<Arc<AcceptHook>>,
}

impl AcceptorBootstrap {
    /// Tags, admits, and dispatches one accepted socket.
    fn accept(&self, stream: TcpStream, peer: SocketAddr, endpoint_url: &str) {
        let channel_id = ChannelId::new(self.next_channel_id.fetch_add(1, Ordering::Relaxed));
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(ConnectionHandle::new(channel_id));
        let record = Arc::new(ConnectionRecord::new(handle, endpoint_url, seq));

        // Deregistration is tied to closure itself, not to who closed:
        // eviction, protocol failure, and peer disconnect all pass here.
        {
            let registry = Arc::clone(&self.registry);
            let key = record.key();
            record.handle().on_close(Box::new(move |reason| {
                if registry.remove(&key).is_some() {
                    tracing::debug!(reason = %reason, "connection deregistered");
                }
            }));
        }

        if let Some(hook) = &self.accept_hook {
            hook(&record);
        }

        match self.admission.admit(Arc::clone(&record)) {
            AdmissionDecision::Admitted | AdmissionDecision::Evicted(_) => {
                tracing::debug!(
                    channel_id = %channel_id,
                    peer = %peer,
                    endpoint_url = %record.endpoint_url(),
                    "connection admitted"
                );
                let handler = Arc::clone(&self.handler);
                tokio::spawn(async move {
                    handler.handle(stream, record).await;
                });
            }
            AdmissionDecision::Rejected => {
                // The record's handle is already closed; dropping the
                // socket is all that is left.
                tracing::warn!(peer = %peer, "dropping rejected connection");
                drop(stream);
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    bootstrap: Arc<AcceptorBootstrap>,
    endpoint_url: String,
    mut shutdown: watch::Receiver<bool>,
    retry_delay: Duration,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => bootstrap.accept(stream, peer, &endpoint_url),
                Err(error) => {
                    tracing::warn!(error = %error, "accept failed; backing off");
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }
    tracing::debug!("accept loop stopped");
}

// =============================================================================
// Tests
// =============================================================================
