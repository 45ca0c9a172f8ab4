// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Hashed timer wheel for per-request deadlines.
//!
//! One deadline may exist per in-flight request, so schedule and cancel are
//! both O(1): scheduling hashes the deadline tick into a slot, cancelling
//! flips a per-entry atomic state. A driver task owned by the wheel advances
//! the cursor on a fixed tick interval and fires due callbacks on that task,
//! never on the caller of [`TimerWheel::schedule`].
//!
//! Cancelling a handle that already fired, or cancelling twice, is a safe
//! no-op. Entries whose deadline lies more than one wheel revolution ahead
//! simply stay in their slot until their tick comes around.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

// =============================================================================
// Timer entry state
// =============================================================================

const STATE_PENDING: u8 = 0;
const STATE_FIRED: u8 = 1;
const STATE_CANCELLED: u8 = 2;

/// Callback invoked when a deadline expires.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

struct TimerEntry {
    /// Absolute wheel tick at which the entry becomes due.
    deadline_tick: u64,

    /// Pending, fired, or cancelled. The transition out of pending happens
    /// exactly once.
    state: AtomicU8,

    /// Taken by whichever transition wins.
    callback: Mutex<Option<TimerCallback>>,
}

impl TimerEntry {
    /// Attempts the pending -> fired transition.
    fn try_fire(&self) -> Option<TimerCallback> {
        if self
            .state
            .compare_exchange(
                STATE_PENDING,
                STATE_FIRED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.callback.lock().take()
        } else {
            None
        }
    }

    /// Attempts the pending -> cancelled transition.
    fn try_cancel(&self) -> bool {
        if self
            .state
            .compare_exchange(
                STATE_PENDING,
                STATE_CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            // Drop the callback eagerly so captured resources are released.
            self.callback.lock().take();
            true
        } else {
            false
        }
    }

    fn is_settled(&self) -> bool {
        self.state.load(Ordering::Acquire) != STATE_PENDING
    }
}

// =============================================================================
// TimerHandle
// =============================================================================

/// Handle to a scheduled deadline.
///
/// Dropping the handle does not cancel the deadline.
pub struct TimerHandle {
    entry: Arc<TimerEntry>,
    stats: Arc<TimerStats>,
}

impl TimerHandle {
    /// Cancels the deadline.
    ///
    /// Returns `true` if the entry was still pending; cancelling an entry
    /// that already fired or was already cancelled returns `false` and has
    /// no other effect.
    pub fn cancel(&self) -> bool {
        let cancelled = self.entry.try_cancel();
        if cancelled {
            self.stats.record_cancelled();
        }
        cancelled
    }

    /// Returns `true` if the deadline has neither fired nor been cancelled.
    pub fn is_pending(&self) -> bool {
        !self.entry.is_settled()
    }
}

// =============================================================================
// TimerWheel
// =============================================================================

/// O(1) deadline scheduler backed by a hashed wheel.
///
/// The wheel spawns its driver task on construction and therefore must be
/// created inside a tokio runtime. Dropping the wheel stops the driver;
/// deadlines still pending at that point are dropped unfired.
pub struct TimerWheel {
    inner: Arc<WheelInner>,
}

struct WheelInner {
    slots: Vec<Mutex<Vec<Arc<TimerEntry>>>>,
    tick: Duration,
    mask: u64,
    current_tick: AtomicU64,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
    stats: Arc<TimerStats>,
}

impl TimerWheel {
    /// Creates a wheel and starts its driver task.
    ///
    /// `slots` is rounded up to the next power of two.
    pub fn new(tick: Duration, slots: usize) -> Self {
        let slot_count = slots.max(1).next_power_of_two();
        let inner = Arc::new(WheelInner {
            slots: (0..slot_count).map(|_| Mutex::new(Vec::new())).collect(),
            tick,
            mask: (slot_count - 1) as u64,
            current_tick: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            stats: Arc::new(TimerStats::new()),
        });

        let driver = Arc::clone(&inner);
        tokio::spawn(async move {
            driver.run().await;
        });

        Self { inner }
    }

    /// Schedules `callback` to fire once `delay` has elapsed.
    ///
    /// The callback runs on the wheel's driver task and must be cheap.
    /// Delays shorter than one tick are rounded up to one tick, and firing
    /// never happens before the full delay has elapsed.
    pub fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let tick_nanos = self.inner.tick.as_nanos().max(1);
        let ticks = ((delay.as_nanos() + tick_nanos - 1) / tick_nanos).max(1) as u64;

        // The extra tick covers the partial tick between now and the next
        // cursor advance, so the deadline is a lower bound.
        let deadline_tick = self.inner.current_tick.load(Ordering::Acquire) + ticks + 1;

        let entry = Arc::new(TimerEntry {
            deadline_tick,
            state: AtomicU8::new(STATE_PENDING),
            callback: Mutex::new(Some(callback)),
        });

        let slot = (deadline_tick & self.inner.mask) as usize;
        self.inner.slots[slot].lock().push(Arc::clone(&entry));
        self.inner.stats.record_scheduled();

        TimerHandle {
            entry,
            stats: Arc::clone(&self.inner.stats),
        }
    }

    /// Cancels a previously scheduled deadline.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        handle.cancel()
    }

    /// Returns the wheel statistics.
    pub fn stats(&self) -> &TimerStats {
        &self.inner.stats
    }

    /// Returns the configured tick duration.
    pub fn tick(&self) -> Duration {
        self.inner.tick
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.shutdown_notify.notify_waiters();
    }
}

impl WheelInner {
    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick);

        loop {
            tokio::select! {
                _ = self.shutdown_notify.notified() => break,
                _ = interval.tick() => {}
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.advance();
        }
    }

    /// Advances the cursor one tick and fires everything due in its slot.
    fn advance(&self) {
        let now = self.current_tick.fetch_add(1, Ordering::AcqRel) + 1;
        let slot = (now & self.mask) as usize;

        let due: Vec<Arc<TimerEntry>> = {
            let mut entries = self.slots[slot].lock();
            let mut due = Vec::new();
            entries.retain(|entry| {
                if entry.is_settled() {
                    return false;
                }
                if entry.deadline_tick <= now {
                    due.push(Arc::clone(entry));
                    false
                } else {
                    true
                }
            });
            due
        };

        // Callbacks run outside the slot lock.
        for entry in due {
            if let Some(callback) = entry.try_fire() {
                self.stats.record_fired();
                callback();
            }
        }
    }
}

// =============================================================================
// TimerStats
// =============================================================================

/// Statistics for wheel operations.
#[derive(Debug)]
pub struct TimerStats {
    scheduled: AtomicU64,
    fired: AtomicU64,
    cancelled: AtomicU64,
}

impl TimerStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self {
            scheduled: AtomicU64::new(0),
            fired: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    fn record_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fired(&self) {
        self.fired.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Total deadlines ever scheduled.
    pub fn scheduled(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }

    /// Total deadlines that fired.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Total deadlines cancelled while pending.
    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }
}

impl Default for TimerStats {
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
    use tokio::sync::oneshot;

    fn test_wheel() -> TimerWheel {
        TimerWheel::new(Duration::from_millis(5), 64)
    }

    #[tokio::test]
    async fn test_schedule_fires_after_delay() {
        let wheel = test_wheel();
        let (tx, rx) = oneshot::channel();

        let start = std::time::Instant::now();
        wheel.schedule(
            Duration::from_millis(30),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("deadline fired")
            .expect("callback ran");
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(wheel.stats().fired(), 1);
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let wheel = test_wheel();
        let (tx, rx) = oneshot::channel::<()>();

        let handle = wheel.schedule(
            Duration::from_millis(20),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        assert!(wheel.cancel(&handle));
        tokio::time::sleep(Duration::from_millis(80)).await;

        // The sender was dropped without firing.
        assert!(rx.await.is_err());
        assert_eq!(wheel.stats().fired(), 0);
        assert_eq!(wheel.stats().cancelled(), 1);
    }

    #[tokio::test]
    async fn test_cancel_after_fire_is_noop() {
        let wheel = test_wheel();
        let (tx, rx) = oneshot::channel();

        let handle = wheel.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("deadline fired")
            .expect("callback ran");

        assert!(!handle.cancel());
        assert!(!handle.cancel());
        assert_eq!(wheel.stats().cancelled(), 0);
    }

    #[tokio::test]
    async fn test_long_delay_survives_wheel_revolution() {
        // 8 slots at 5ms per tick: one revolution is 40ms.
        let wheel = TimerWheel::new(Duration::from_millis(5), 8);
        let (tx, rx) = oneshot::channel();

        let start = std::time::Instant::now();
        wheel.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("deadline fired")
            .expect("callback ran");
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_handle_reports_pending_state() {
        let wheel = test_wheel();
        let handle = wheel.schedule(Duration::from_secs(60), Box::new(|| {}));
        assert!(handle.is_pending());
        handle.cancel();
        assert!(!handle.is_pending());
    }
}
