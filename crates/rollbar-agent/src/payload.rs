//! Payload envelope: one report, its delivery signal, and its cached wire
//! body.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use rollbar_api::item::Item;
use rollbar_api::{Data, TelemetryItem};
use tokio::sync::oneshot;

/// Terminal outcome of one payload, as seen by a blocking caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted by the API.
    Delivered,
    /// Rejected permanently by the API.
    ApiError,
    /// The payload's pre-dispatch deadline expired.
    TimedOut,
    /// Evicted, flushed, ignored, or otherwise dropped before dispatch.
    Aborted,
}

/// One-shot channel end released at a payload's terminal transition.
pub(crate) type SignalSender = oneshot::Sender<DeliveryOutcome>;

static NEXT_PAYLOAD_ID: AtomicU64 = AtomicU64::new(1);

/// The unit of delivery.
///
/// Immutable after construction except for three controlled transitions:
/// the cached serialized body (populated on first dispatch, reused verbatim
/// on retry), the telemetry snapshot (attached once, just before the first
/// dispatch), and the signal (consumed at the first terminal transition).
#[derive(Debug)]
pub struct Payload {
    id: u64,
    access_token: String,
    data: Data,
    deadline: Option<Instant>,
    signal: Option<SignalSender>,
    cached_body: Option<Bytes>,
    attempted: bool,
}

impl Payload {
    #[must_use]
    pub fn new(access_token: impl Into<String>, data: Data) -> Self {
        Payload::with_signal(access_token, data, None, None)
    }

    /// Payload carrying an optional pre-dispatch deadline and an optional
    /// blocking-caller signal.
    #[must_use]
    pub fn with_signal(
        access_token: impl Into<String>,
        data: Data,
        deadline: Option<Instant>,
        signal: Option<SignalSender>,
    ) -> Self {
        Payload {
            id: NEXT_PAYLOAD_ID.fetch_add(1, Ordering::Relaxed),
            access_token: access_token.into(),
            data,
            deadline,
            signal,
            cached_body: None,
            attempted: false,
        }
    }

    /// Identity used to re-find this payload across the unlocked HTTP
    /// round trip.
    #[must_use]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Occurrence UUID, once the packager has stamped one.
    #[must_use]
    pub fn uuid(&self) -> Option<String> {
        self.data.uuid.clone()
    }

    #[must_use]
    pub fn data(&self) -> &Data {
        &self.data
    }

    /// Whether the pre-dispatch deadline has expired. Once a dispatch
    /// attempt has begun the deadline no longer applies: a payload that is
    /// in flight or backing off stays resident and may still deliver after
    /// its blocking caller gave up.
    #[must_use]
    pub(crate) fn deadline_expired(&self, now: Instant) -> bool {
        !self.attempted && self.deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Attaches a telemetry snapshot unless one is already present.
    pub(crate) fn attach_telemetry(&mut self, snapshot: Vec<TelemetryItem>) {
        if self.data.telemetry.is_none() && !snapshot.is_empty() {
            self.data.telemetry = Some(snapshot);
        }
    }

    /// Serialized HTTP body, computed once and reused byte-identically on
    /// every retry. Marks the payload as attempted.
    pub(crate) fn serialized_body(&mut self) -> Result<Bytes, serde_json::Error> {
        self.attempted = true;
        if let Some(body) = &self.cached_body {
            return Ok(body.clone());
        }
        let item = Item {
            access_token: &self.access_token,
            data: &self.data,
        };
        let body = Bytes::from(serde_json::to_vec(&item)?);
        self.cached_body = Some(body.clone());
        Ok(body)
    }

    /// Releases the signal with the given outcome. Idempotent; only the
    /// first terminal transition is observed by the caller.
    pub(crate) fn resolve(&mut self, outcome: DeliveryOutcome) {
        if let Some(signal) = self.signal.take() {
            // The waiting side may already have timed out and dropped.
            let _ = signal.send(outcome);
        }
    }
}
