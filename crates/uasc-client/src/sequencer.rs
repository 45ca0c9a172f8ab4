// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Single-worker FIFO queue for future completions.
//!
//! Response arrival, timeout firing, and channel failure all race on
//! different I/O tasks. Routing every future completion through one worker
//! gives callers a deterministic, non-interleaved completion order: the
//! order in which the winning events were submitted.
//!
//! Tasks must be cheap (complete a future, log). The queue is unbounded so
//! submitting never applies backpressure to the I/O tasks feeding it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// A queued unit of completion work.
pub type SequencedTask = Box<dyn FnOnce() + Send>;

// =============================================================================
// CompletionSequencer
// =============================================================================

/// Serializes completion callbacks onto one worker task.
pub struct CompletionSequencer {
    tx: mpsc::UnboundedSender<SequencedTask>,
    stats: Arc<SequencerStats>,
}

impl CompletionSequencer {
    /// Creates a sequencer and spawns its worker task.
    ///
    /// Must be called inside a tokio runtime. The worker drains remaining
    /// tasks and exits once the sequencer is dropped.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SequencedTask>();
        let stats = Arc::new(SequencerStats::new());

        let worker_stats = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
                worker_stats.record_executed();
            }
        });

        Self { tx, stats }
    }

    /// Enqueues a task to run after everything submitted before it.
    ///
    /// A task submitted after shutdown is dropped and counted.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        self.stats.record_submitted();
        if self.tx.send(Box::new(task)).is_err() {
            self.stats.record_dropped();
            tracing::warn!("completion sequencer is shut down; dropping task");
        }
    }

    /// Returns the sequencer statistics.
    pub fn stats(&self) -> &SequencerStats {
        &self.stats
    }
}

impl Default for CompletionSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompletionSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSequencer")
            .field("submitted", &self.stats.submitted())
            .field("executed", &self.stats.executed())
            .finish()
    }
}

// =============================================================================
// SequencerStats
// =============================================================================

/// Statistics for sequencer operations.
#[derive(Debug)]
pub struct SequencerStats {
    submitted: AtomicU64,
    executed: AtomicU64,
    dropped: AtomicU64,
}

impl SequencerStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Total tasks submitted.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Total tasks executed by the worker.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Total tasks dropped because the worker was gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for SequencerStats {
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
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let sequencer = CompletionSequencer::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100u32 {
            let order = Arc::clone(&order);
            sequencer.submit(move || {
                order.lock().push(i);
            });
        }

        let (tx, rx) = oneshot::channel();
        sequencer.submit(move || {
            let _ = tx.send(());
        });
        rx.await.expect("sentinel task ran");

        let seen = order.lock().clone();
        assert_eq!(seen, (0..100).collect::<Vec<u32>>());
        assert_eq!(sequencer.stats().executed(), 101);
    }

    #[tokio::test]
    async fn test_submissions_from_many_tasks_all_execute() {
        let sequencer = Arc::new(CompletionSequencer::new());
        let counter = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sequencer = Arc::clone(&sequencer);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let counter = Arc::clone(&counter);
                    sequencer.submit(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                }
            }));
        }
        for handle in handles {
            handle.await.expect("submitter finished");
        }

        let (tx, rx) = oneshot::channel();
        sequencer.submit(move || {
            let _ = tx.send(());
        });
        rx.await.expect("sentinel task ran");

        assert_eq!(counter.load(Ordering::SeqCst), 400);
    }
}
