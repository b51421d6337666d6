//! Per-notifier bounded payload queue.
//!
//! Each notifier exclusively owns one queue; the controller drains them all.
//! The queue is a strict FIFO with a single drop policy: an enqueue past
//! capacity evicts the *head* (oldest) payload. Evicted, flushed, and
//! expired payloads always release their delivery signal — a blocking
//! caller is never left waiting on a payload that silently disappeared.
//!
//! The queue also carries the notifier's dispatch pacing state
//! (`next_dequeue_time`, the backoff exponent) and its transport handle,
//! which a reconfigure swaps atomically with a flush.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use rollbar_api::TelemetryItem;
use tracing::{debug, warn};

use crate::events::{Event, EventBus, InternalErrorKind};
use crate::payload::{DeliveryOutcome, Payload};
use crate::transport::Transport;

/// First retry delay after a transient failure; doubles per attempt.
pub const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Retry delay ceiling.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Everything the controller needs to post the head payload without holding
/// the queue lock across the HTTP round trip.
pub(crate) struct DispatchJob {
    pub payload_id: u64,
    pub uuid: Option<String>,
    pub body: Bytes,
    pub transport: Arc<dyn Transport>,
}

/// Outcome of preparing the head payload for dispatch.
pub(crate) enum Prepared {
    Job(DispatchJob),
    Empty,
    /// The head payload could not be serialized and was dropped.
    Poisoned {
        uuid: Option<String>,
        error: String,
    },
}

struct Inner {
    items: VecDeque<Payload>,
    depth: usize,
    max_reports_per_minute: u32,
    max_items: u64,
    next_dequeue_time: Instant,
    backoff_exponent: u32,
    transport: Arc<dyn Transport>,
}

/// Bounded FIFO of payloads awaiting dispatch.
pub struct PayloadQueue {
    access_token: String,
    inner: Mutex<Inner>,
}

impl PayloadQueue {
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        depth: usize,
        max_reports_per_minute: u32,
        max_items: u64,
        transport: Arc<dyn Transport>,
    ) -> Self {
        PayloadQueue {
            access_token: access_token.into(),
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(depth),
                depth,
                max_reports_per_minute,
                max_items,
                next_dequeue_time: Instant::now(),
                backoff_exponent: 0,
                transport,
            }),
        }
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a payload, evicting the oldest one past capacity.
    pub fn enqueue(&self, payload: Payload, events: &EventBus) {
        let evicted_uuid = {
            let mut inner = self.lock();
            let evicted = if inner.items.len() >= inner.depth {
                inner.items.pop_front().map(|mut oldest| {
                    oldest.resolve(DeliveryOutcome::Aborted);
                    oldest.uuid()
                })
            } else {
                None
            };
            inner.items.push_back(payload);
            evicted
        };

        if let Some(uuid) = evicted_uuid {
            warn!(token = %self.access_token, "payload queue full, dropping oldest payload");
            events.emit(Event::InternalError {
                kind: InternalErrorKind::QueueOverflow,
                uuid,
                context: "payload queue full, oldest payload evicted".to_string(),
            });
        }
    }

    /// Atomically clears the queue; pending signals release as `Aborted`.
    pub fn flush(&self) {
        let mut inner = self.lock();
        for mut payload in inner.items.drain(..) {
            payload.resolve(DeliveryOutcome::Aborted);
        }
    }

    /// Flushes, swaps the transport handle, and resets pacing. Called under
    /// reconfiguration; atomic with respect to in-flight payloads because
    /// everything happens under the queue lock.
    pub fn reconfigure(
        &self,
        transport: Arc<dyn Transport>,
        depth: usize,
        max_reports_per_minute: u32,
        max_items: u64,
    ) {
        let mut inner = self.lock();
        for mut payload in inner.items.drain(..) {
            payload.resolve(DeliveryOutcome::Aborted);
        }
        inner.transport = transport;
        inner.depth = depth;
        inner.max_reports_per_minute = max_reports_per_minute;
        inner.max_items = max_items;
        inner.next_dequeue_time = Instant::now();
        inner.backoff_exponent = 0;
    }

    /// Readiness gate consulted at the top of each tick.
    pub(crate) fn is_ready(&self, now: Instant) -> bool {
        self.lock().next_dequeue_time <= now
    }

    /// Drops expired payloads from the head, releasing each signal as
    /// `TimedOut`. Only payloads that have never begun a dispatch attempt
    /// are subject to the deadline. Returns the dropped UUIDs.
    pub(crate) fn sweep_expired(&self, now: Instant) -> Vec<Option<String>> {
        let mut dropped = Vec::new();
        let mut inner = self.lock();
        while inner
            .items
            .front()
            .is_some_and(|head| head.deadline_expired(now))
        {
            if let Some(mut expired) = inner.items.pop_front() {
                expired.resolve(DeliveryOutcome::TimedOut);
                dropped.push(expired.uuid());
            }
        }
        dropped
    }

    /// Prepares the head payload: attaches the telemetry snapshot (once),
    /// serializes the wire body (once), and hands back everything needed to
    /// post without the lock held.
    pub(crate) fn prepare_dispatch(&self, telemetry: Option<Vec<TelemetryItem>>) -> Prepared {
        let mut inner = self.lock();
        let transport = Arc::clone(&inner.transport);
        let Some(head) = inner.items.front_mut() else {
            return Prepared::Empty;
        };
        if let Some(snapshot) = telemetry {
            head.attach_telemetry(snapshot);
        }
        match head.serialized_body() {
            Ok(body) => Prepared::Job(DispatchJob {
                payload_id: head.id(),
                uuid: head.uuid(),
                body,
                transport,
            }),
            Err(err) => {
                let uuid = head.uuid();
                if let Some(mut poisoned) = inner.items.pop_front() {
                    poisoned.resolve(DeliveryOutcome::Aborted);
                }
                Prepared::Poisoned {
                    uuid,
                    error: err.to_string(),
                }
            }
        }
    }

    /// Dequeues the head if it is still the payload the controller posted,
    /// releasing its signal with the terminal outcome. Returns false when a
    /// concurrent flush or reconfigure already removed it.
    pub(crate) fn finish(&self, payload_id: u64, outcome: DeliveryOutcome) -> bool {
        let mut inner = self.lock();
        if inner
            .items
            .front()
            .is_some_and(|head| head.id() == payload_id)
        {
            if let Some(mut finished) = inner.items.pop_front() {
                finished.resolve(outcome);
            }
            inner.backoff_exponent = 0;
            true
        } else {
            debug!(token = %self.access_token, "payload vanished during dispatch, outcome dropped");
            false
        }
    }

    /// Drops the head without dispatching (per-process cap reached).
    pub(crate) fn drop_head(&self) -> Option<Option<String>> {
        let mut inner = self.lock();
        inner.items.pop_front().map(|mut head| {
            head.resolve(DeliveryOutcome::Aborted);
            head.uuid()
        })
    }

    /// Defers the next dequeue to the given instant (rate gate, 429).
    pub(crate) fn defer_until(&self, until: Instant) {
        self.lock().next_dequeue_time = until;
    }

    /// Applies one step of exponential backoff after a transient failure
    /// and returns the delay chosen.
    pub(crate) fn apply_backoff(&self, now: Instant) -> Duration {
        let mut inner = self.lock();
        let exponent = inner.backoff_exponent.min(7);
        let base_ms = u64::try_from(BACKOFF_BASE.as_millis()).unwrap_or(500);
        let delay = MAX_BACKOFF.min(Duration::from_millis(base_ms << exponent));
        inner.backoff_exponent = inner.backoff_exponent.saturating_add(1);
        inner.next_dequeue_time = now + delay;
        delay
    }

    pub(crate) fn rate_limit(&self) -> u32 {
        self.lock().max_reports_per_minute
    }

    pub(crate) fn depth(&self) -> usize {
        self.lock().depth
    }

    pub(crate) fn max_items(&self) -> u64 {
        self.lock().max_items
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("payload queue lock poisoned")
    }
}
