//! Pending-report buffer and the per-notifier worker pool.
//!
//! Submission appends a pending report and returns immediately; a small
//! fixed pool of worker tasks drains the buffer and runs the submission
//! pipeline (gates, packaging, user callbacks, enqueue). The buffer is
//! bounded: under a burst the oldest pending report is evicted, which keeps
//! memory bounded at the cost of the oldest unprocessed submissions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rollbar_api::{Body, Level};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::events::{Event, EventBus, InternalErrorKind};
use crate::notifier::ReportOptions;
use crate::payload::{DeliveryOutcome, SignalSender};

/// Bounded depth of the pending-report buffer.
pub(crate) const PENDING_REPORTS_DEPTH: usize = 128;

/// Fixed number of worker tasks per notifier.
pub(crate) const WORKER_POOL_SIZE: usize = 2;

/// One accepted submission awaiting processing.
pub(crate) struct PendingReport {
    pub level: Level,
    pub body: Body,
    pub options: ReportOptions,
    pub signal: Option<SignalSender>,
    pub deadline: Option<Instant>,
}

impl PendingReport {
    pub(crate) fn resolve(&mut self, outcome: DeliveryOutcome) {
        if let Some(signal) = self.signal.take() {
            let _ = signal.send(outcome);
        }
    }
}

/// Bounded FIFO of pending reports with oldest-evict overflow.
pub(crate) struct ReportBuffer {
    pending: Mutex<VecDeque<PendingReport>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl ReportBuffer {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        Arc::new(ReportBuffer {
            pending: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Accepts a report unless the buffer is closed. Past capacity the
    /// oldest pending report is evicted and observed on the event bus.
    pub(crate) fn push(&self, report: PendingReport, events: &EventBus) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let evicted = {
            #[allow(clippy::expect_used)]
            let mut pending = self.pending.lock().expect("report buffer lock poisoned");
            let evicted = if pending.len() >= self.capacity {
                pending.pop_front().map(|mut oldest| {
                    oldest.resolve(DeliveryOutcome::Aborted);
                })
            } else {
                None
            };
            pending.push_back(report);
            evicted
        };
        if evicted.is_some() {
            warn!(capacity = self.capacity, "pending-report buffer full, dropping oldest report");
            events.emit(Event::InternalError {
                kind: InternalErrorKind::SubmissionOverflow,
                uuid: None,
                context: "pending-report buffer full, oldest report evicted".to_string(),
            });
        }
        self.notify.notify_one();
        true
    }

    fn pop(&self) -> Option<PendingReport> {
        #[allow(clippy::expect_used)]
        self.pending
            .lock()
            .expect("report buffer lock poisoned")
            .pop_front()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.pending.lock().expect("report buffer lock poisoned").len()
    }

    /// Rejects further submissions and wakes the workers so they can drain
    /// what was already accepted and exit.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Fixed pool of tasks draining one report buffer.
pub(crate) struct WorkerPool {
    _handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns the pool. Each worker pops a report and runs `process` on it;
    /// after [`ReportBuffer::close`] the workers drain the remainder and
    /// exit. Must be called within a tokio runtime.
    pub(crate) fn spawn<F>(buffer: Arc<ReportBuffer>, process: F) -> Self
    where
        F: Fn(PendingReport) + Send + Sync + 'static,
    {
        let process = Arc::new(process);
        let handles = (0..WORKER_POOL_SIZE)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                let process = Arc::clone(&process);
                tokio::spawn(async move {
                    loop {
                        // Register interest before the emptiness check so a
                        // push between the two cannot be missed.
                        let notified = buffer.notify.notified();
                        if let Some(report) = buffer.pop() {
                            process(report);
                            continue;
                        }
                        if buffer.is_closed() {
                            break;
                        }
                        notified.await;
                    }
                })
            })
            .collect();
        WorkerPool { _handles: handles }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn report(tag: u64) -> PendingReport {
        PendingReport {
            level: Level::Error,
            body: Body::message(format!("report {tag}")),
            options: ReportOptions::default(),
            signal: None,
            deadline: None,
        }
    }

    #[tokio::test]
    async fn test_workers_drain_pushed_reports() {
        let buffer = ReportBuffer::new(16);
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&processed);
        let _pool = WorkerPool::spawn(Arc::clone(&buffer), move |_report| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let events = EventBus::new();
        for i in 0..10 {
            assert!(buffer.push(report(i), &events));
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while processed.load(Ordering::SeqCst) < 10 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_overflow_evicts_oldest_and_releases_signal() {
        let buffer = ReportBuffer::new(2);
        let events = EventBus::new();
        let mut rx_events = events.subscribe();

        let (tx, rx) = oneshot::channel();
        let first = PendingReport {
            signal: Some(tx),
            ..report(0)
        };
        // No workers are draining, so pushes accumulate.
        assert!(buffer.push(first, &events));
        assert!(buffer.push(report(1), &events));
        assert!(buffer.push(report(2), &events));

        assert_eq!(buffer.len(), 2);
        assert_eq!(rx.await.unwrap(), DeliveryOutcome::Aborted);
        match rx_events.recv().await.unwrap() {
            Event::InternalError { kind, .. } => {
                assert_eq!(kind, InternalErrorKind::SubmissionOverflow);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_buffer_rejects_pushes() {
        let buffer = ReportBuffer::new(4);
        let events = EventBus::new();

        buffer.close();
        assert!(!buffer.push(report(0), &events));
    }

    #[tokio::test]
    async fn test_close_drains_accepted_reports() {
        let buffer = ReportBuffer::new(16);
        let processed = Arc::new(AtomicUsize::new(0));
        let events = EventBus::new();

        for i in 0..5 {
            assert!(buffer.push(report(i), &events));
        }

        let counter = Arc::clone(&processed);
        let _pool = WorkerPool::spawn(Arc::clone(&buffer), move |_report| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        buffer.close();

        tokio::time::timeout(Duration::from_secs(1), async {
            while processed.load(Ordering::SeqCst) < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
