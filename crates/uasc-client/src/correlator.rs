// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Request/response correlation over a secure channel.
//!
//! The [`RequestCorrelator`] owns everything a client needs to run the
//! conversation protocol: request id allocation, the pending-request map,
//! the timeout wheel, and the completion sequencer. A caller submits a
//! request and gets a [`ResponseFuture`]; every outcome, success or
//! failure, arrives through that future exactly once.
//!
//! # Exactly-once completion
//!
//! Three independent events race to resolve a pending request: the peer's
//! response, the timeout deadline, and a channel failure. The pending map's
//! atomic `remove` is the single arbiter of that race. Whichever path
//! removes the entry owns the completion; every other path treats a failed
//! removal as a no-op. Completions are then routed through one FIFO
//! sequencer so callers observe them in the order the winning events
//! occurred.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use uasc_core::channel::{ChannelSupplier, CloseReason, SecureChannel};
use uasc_core::error::{TransportError, TransportResult};
use uasc_core::types::{ChannelId, OutboundRequest, RequestId, RequestMessage, ResponseMessage};

use crate::config::ClientTransportConfig;
use crate::sequencer::CompletionSequencer;
use crate::timer::{TimerHandle, TimerStats, TimerWheel};

// =============================================================================
// PendingRequest
// =============================================================================

/// Tracking state for one in-flight request.
///
/// Lives in the pending map from send until whichever completion path wins
/// the atomic remove.
struct PendingRequest {
    tx: oneshot::Sender<TransportResult<ResponseMessage>>,
    timer: Option<TimerHandle>,
    sent_at: Instant,
}

impl PendingRequest {
    fn new(tx: oneshot::Sender<TransportResult<ResponseMessage>>) -> Self {
        Self {
            tx,
            timer: None,
            sent_at: Instant::now(),
        }
    }

    /// Cancels the deadline and hands the completion to the sequencer.
    fn complete(self, sequencer: &CompletionSequencer, result: TransportResult<ResponseMessage>) {
        let Self { tx, timer, .. } = self;
        if let Some(timer) = timer {
            timer.cancel();
        }
        sequencer.submit(move || {
            // The receiver may have been dropped; nothing to deliver then.
            let _ = tx.send(result);
        });
    }
}

// =============================================================================
// ResponseFuture
// =============================================================================

/// Future resolving to the response of a sent request.
///
/// Resolves exactly once, to the response message or to the
/// [`TransportError`] describing why no response will come.
pub struct ResponseFuture {
    id: RequestId,
    rx: oneshot::Receiver<TransportResult<ResponseMessage>>,
}

impl ResponseFuture {
    /// Returns the id allocated to this request.
    pub fn request_id(&self) -> RequestId {
        self.id
    }
}

impl Future for ResponseFuture {
    type Output = TransportResult<ResponseMessage>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The correlator was dropped with the request still pending.
            Poll::Ready(Err(_)) => Poll::Ready(Err(TransportError::ChannelClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture").field("id", &self.id).finish()
    }
}

// =============================================================================
// RequestCorrelator
// =============================================================================

/// Client-side request/response protocol engine.
///
/// One correlator exists per logical transport. Its request id counter is
/// instance state, so independent transports in one process never
/// interfere, and the counter is not reset when the channel reconnects.
pub struct RequestCorrelator {
    inner: Arc<CorrelatorInner>,
}

struct CorrelatorInner {
    supplier: Arc<dyn ChannelSupplier>,
    pending: DashMap<RequestId, PendingRequest>,
    next_id: AtomicU64,
    timers: TimerWheel,
    sequencer: CompletionSequencer,
    /// Channels that already carry our close hook.
    hooked: Mutex<HashSet<ChannelId>>,
    stats: CorrelatorStats,
}

impl RequestCorrelator {
    /// Creates a correlator with default configuration.
    ///
    /// Must be called inside a tokio runtime; the timeout wheel and the
    /// completion sequencer spawn their worker tasks here.
    pub fn new(supplier: Arc<dyn ChannelSupplier>) -> Self {
        Self::with_config(supplier, ClientTransportConfig::default())
    }

    /// Creates a correlator with the given configuration.
    pub fn with_config(supplier: Arc<dyn ChannelSupplier>, config: ClientTransportConfig) -> Self {
        Self {
            inner: Arc::new(CorrelatorInner {
                supplier,
                pending: DashMap::new(),
                next_id: AtomicU64::new(1),
                timers: TimerWheel::new(config.timer_tick, config.timer_slots),
                sequencer: CompletionSequencer::new(),
                hooked: Mutex::new(HashSet::new()),
                stats: CorrelatorStats::new(),
            }),
        }
    }

    /// Sends a request and returns the future of its response.
    ///
    /// Never fails synchronously: channel acquisition failures, write
    /// failures, timeouts, and channel faults are all reported through the
    /// returned future. If the request header carries a positive timeout
    /// hint a deadline is scheduled; a zero or absent hint schedules
    /// nothing, and the request stays pending until a response, a channel
    /// failure, or an explicit [`cancel`](Self::cancel).
    pub fn send(&self, message: RequestMessage) -> ResponseFuture {
        let id = RequestId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.dispatch(id, message, tx).await;
        });

        ResponseFuture { id, rx }
    }

    /// Delivers a response received from the channel's read pipeline.
    ///
    /// A response for a request no longer tracked (its timeout already
    /// fired, or it was cancelled) is logged and dropped; the caller's
    /// future was already resolved by the winning path.
    pub fn handle_response(&self, response: ResponseMessage) {
        let id = response.request_id;
        match self.inner.pending.remove(&id) {
            Some((_, entry)) => {
                self.inner.stats.record_response();
                tracing::debug!(
                    request_id = %id,
                    elapsed_ms = entry.sent_at.elapsed().as_millis() as u64,
                    "response received"
                );
                entry.complete(&self.inner.sequencer, Ok(response));
            }
            None => {
                self.inner.stats.record_unknown_response();
                tracing::debug!(request_id = %id, "received response for unknown request");
            }
        }
    }

    /// Abandons a pending request, resolving its future with `Cancelled`.
    ///
    /// Returns `false` if the request was not pending, either because it
    /// already resolved or because its dispatch has not registered it yet.
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.inner.pending.remove(&id) {
            Some((_, entry)) => {
                self.inner.stats.record_cancelled();
                tracing::debug!(request_id = %id, "request cancelled by caller");
                entry.complete(&self.inner.sequencer, Err(TransportError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Fails every pending request with `ChannelClosed`.
    ///
    /// Invoked automatically through the channel close hook; exposed for
    /// read pipelines that learn about inactivity through other means.
    pub fn on_channel_inactive(&self) {
        self.inner.fail_all_pending(|| TransportError::ChannelClosed);
    }

    /// Fails every pending request with `ChannelError`.
    pub fn on_channel_fault(&self, detail: impl Into<String>) {
        let detail = detail.into();
        self.inner
            .fail_all_pending(move || TransportError::channel_error(detail.clone()));
    }

    /// Number of requests currently awaiting resolution.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Returns the correlator statistics.
    pub fn stats(&self) -> &CorrelatorStats {
        &self.inner.stats
    }

    /// Returns the timeout wheel statistics.
    pub fn timer_stats(&self) -> &TimerStats {
        self.inner.timers.stats()
    }
}

impl fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl CorrelatorInner {
    /// Runs the send path for one request.
    async fn dispatch(
        self: Arc<Self>,
        id: RequestId,
        message: RequestMessage,
        tx: oneshot::Sender<TransportResult<ResponseMessage>>,
    ) {
        let channel = match self.supplier.acquire().await {
            Ok(channel) => channel,
            Err(err) => {
                self.stats.record_channel_unavailable();
                tracing::warn!(request_id = %id, error = %err, "no channel for request");
                self.sequencer.submit(move || {
                    let _ = tx.send(Err(err));
                });
                return;
            }
        };

        self.attach_close_hook(&channel);

        let timeout = message.header.effective_timeout();
        self.stats.record_sent();
        self.pending.insert(id, PendingRequest::new(tx));

        if let Some(timeout) = timeout {
            let weak = Arc::downgrade(&self);
            let handle = self.timers.schedule(
                timeout,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_timeout(id, timeout);
                    }
                }),
            );
            match self.pending.get_mut(&id) {
                Some(mut entry) => entry.timer = Some(handle),
                // Another path already resolved the request.
                None => {
                    handle.cancel();
                }
            }
        }

        if let Err(err) = channel.write(OutboundRequest::new(id, message)).await {
            if let Some((_, entry)) = self.pending.remove(&id) {
                self.stats.record_write_failure();
                tracing::warn!(request_id = %id, error = %err, "request write failed");
                entry.complete(&self.sequencer, Err(TransportError::write_failure(err)));
            }
        }
    }

    /// Registers the failure hook on a channel seen for the first time.
    fn attach_close_hook(self: &Arc<Self>, channel: &Arc<dyn SecureChannel>) {
        let channel_id = channel.id();
        if !self.hooked.lock().insert(channel_id) {
            return;
        }

        let weak = Arc::downgrade(self);
        channel.on_close(Box::new(move |reason| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.hooked.lock().remove(&channel_id);
            tracing::warn!(channel_id = %channel_id, reason = %reason, "secure channel lost");
            match reason {
                CloseReason::Fault(detail) => {
                    inner.fail_all_pending(move || TransportError::channel_error(detail.clone()));
                }
                CloseReason::Closed | CloseReason::Evicted | CloseReason::Rejected => {
                    inner.fail_all_pending(|| TransportError::ChannelClosed);
                }
            }
        }));
    }

    /// Timeout-wheel callback for one request's deadline.
    fn on_timeout(&self, id: RequestId, after: Duration) {
        match self.pending.remove(&id) {
            Some((_, entry)) => {
                self.stats.record_timeout();
                tracing::debug!(request_id = %id, timeout_ms = after.as_millis() as u64, "request timed out");
                entry.complete(&self.sequencer, Err(TransportError::timeout(after)));
            }
            None => {
                tracing::trace!(request_id = %id, "timeout fired for request no longer tracked");
            }
        }
    }

    /// Drains the pending map, failing every entry.
    ///
    /// The map is empty when this returns; requests sent concurrently with
    /// the drain are dispatched against whatever channel the supplier hands
    /// out next.
    fn fail_all_pending(&self, make_error: impl Fn() -> TransportError) {
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0u64;
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                entry.complete(&self.sequencer, Err(make_error()));
                failed += 1;
            }
        }
        if failed > 0 {
            self.stats.record_channel_failures(failed);
            tracing::warn!(failed_requests = failed, "failed all pending requests");
        }
    }
}

// =============================================================================
// CorrelatorStats
// =============================================================================

/// Statistics for correlator operations.
#[derive(Debug)]
pub struct CorrelatorStats {
    sent: AtomicU64,
    responses: AtomicU64,
    timeouts: AtomicU64,
    write_failures: AtomicU64,
    channel_failures: AtomicU64,
    channel_unavailable: AtomicU64,
    cancelled: AtomicU64,
    unknown_responses: AtomicU64,
}

impl CorrelatorStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            responses: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            channel_failures: AtomicU64::new(0),
            channel_unavailable: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            unknown_responses: AtomicU64::new(0),
        }
    }

    fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_response(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_channel_failures(&self, count: u64) {
        self.channel_failures.fetch_add(count, Ordering::Relaxed);
    }

    fn record_channel_unavailable(&self) {
        self.channel_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn record_unknown_response(&self) {
        self.unknown_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests written (or at least registered) on a channel.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Requests resolved by a response.
    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }

    /// Requests resolved by their deadline.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Requests resolved by a failed channel write.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Requests resolved by a channel fault or closure.
    pub fn channel_failures(&self) -> u64 {
        self.channel_failures.load(Ordering::Relaxed)
    }

    /// Sends that found no channel at all.
    pub fn channel_unavailable(&self) -> u64 {
        self.channel_unavailable.load(Ordering::Relaxed)
    }

    /// Requests abandoned by the caller.
    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Responses that matched no tracked request.
    pub fn unknown_responses(&self) -> u64 {
        self.unknown_responses.load(Ordering::Relaxed)
    }
}

impl Default for CorrelatorStats {
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
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::AtomicBool;
    use uasc_core::channel::CloseHook;

    struct TestChannel {
        id: ChannelId,
        fail_writes: AtomicBool,
        written: Mutex<Vec<OutboundRequest>>,
        hooks: Mutex<Vec<CloseHook>>,
    }

    impl TestChannel {
        fn new(id: u32) -> Arc<Self> {
            Arc::new(Self {
                id: ChannelId::new(id),
                fail_writes: AtomicBool::new(false),
                written: Mutex::new(Vec::new()),
                hooks: Mutex::new(Vec::new()),
            })
        }

        fn close(&self, reason: CloseReason) {
            let hooks = std::mem::take(&mut *self.hooks.lock());
            for hook in hooks {
                hook(reason.clone());
            }
        }
    }

    #[async_trait]
    impl SecureChannel for TestChannel {
        fn id(&self) -> ChannelId {
            self.id
        }

        fn is_active(&self) -> bool {
            true
        }

        async fn write(&self, request: OutboundRequest) -> io::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write refused"));
            }
            self.written.lock().push(request);
            Ok(())
        }

        fn on_close(&self, hook: CloseHook) {
            self.hooks.lock().push(hook);
        }
    }

    struct TestSupplier {
        channel: Mutex<Option<Arc<TestChannel>>>,
    }

    impl TestSupplier {
        fn with_channel(channel: Arc<TestChannel>) -> Arc<Self> {
            Arc::new(Self {
                channel: Mutex::new(Some(channel)),
            })
        }

        fn empty() -> Arc<Self> {
            Arc::new(Self {
                channel: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl ChannelSupplier for TestSupplier {
        async fn acquire(&self) -> TransportResult<Arc<dyn SecureChannel>> {
            match self.channel.lock().clone() {
                Some(channel) => Ok(channel),
                None => Err(TransportError::channel_unavailable("no channel configured")),
            }
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition met in time");
    }

    #[tokio::test]
    async fn test_request_ids_are_strictly_increasing() {
        let channel = TestChannel::new(1);
        let correlator = RequestCorrelator::new(TestSupplier::with_channel(channel));

        let ids: Vec<u64> = (0..5)
            .map(|_| correlator.send(RequestMessage::new(vec![])).request_id().value())
            .collect();

        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_response_resolves_future() {
        let channel = TestChannel::new(1);
        let correlator = RequestCorrelator::new(TestSupplier::with_channel(channel.clone()));

        let future = correlator.send(RequestMessage::new(b"read".to_vec()));
        let id = future.request_id();

        wait_until(|| correlator.pending_count() == 1).await;
        correlator.handle_response(ResponseMessage::new(id, b"value".to_vec()));

        let response = future.await.expect("response");
        assert_eq!(response.request_id, id);
        assert_eq!(response.payload, b"value");
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.stats().responses(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_channel_fails_future() {
        let correlator = RequestCorrelator::new(TestSupplier::empty());

        let result = correlator.send(RequestMessage::new(vec![])).await;
        assert!(matches!(
            result,
            Err(TransportError::ChannelUnavailable { .. })
        ));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_fails_future_and_clears_entry() {
        let channel = TestChannel::new(1);
        channel.fail_writes.store(true, Ordering::SeqCst);
        let correlator = RequestCorrelator::new(TestSupplier::with_channel(channel));

        let result = correlator.send(RequestMessage::new(vec![1])).await;
        assert!(matches!(result, Err(TransportError::WriteFailure { .. })));
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.stats().write_failures(), 1);
    }

    #[tokio::test]
    async fn test_cancel_resolves_with_cancelled() {
        let channel = TestChannel::new(1);
        let correlator = RequestCorrelator::new(TestSupplier::with_channel(channel));

        let future = correlator.send(RequestMessage::new(vec![]));
        let id = future.request_id();

        wait_until(|| correlator.pending_count() == 1).await;
        assert!(correlator.cancel(id));
        assert!(!correlator.cancel(id));

        assert!(matches!(future.await, Err(TransportError::Cancelled)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_channel_close_hook_fails_pending() {
        let channel = TestChannel::new(7);
        let correlator = RequestCorrelator::new(TestSupplier::with_channel(channel.clone()));

        let future = correlator.send(RequestMessage::new(vec![]));
        wait_until(|| correlator.pending_count() == 1).await;

        channel.close(CloseReason::Closed);

        assert!(matches!(future.await, Err(TransportError::ChannelClosed)));
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.stats().channel_failures(), 1);
    }
}
