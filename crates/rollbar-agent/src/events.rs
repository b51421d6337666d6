//! Typed event bus for delivery outcomes and internal errors.
//!
//! The pipeline is the single producer; any number of subscribers observe
//! delivery outcomes without being able to slow dispatch down. Events ride a
//! bounded broadcast channel: sends never block, and a subscriber that falls
//! behind loses the oldest events rather than stalling the controller. This
//! is an observability channel, not a reliability channel.
//!
//! ```text
//!   controller / workers          EventBus            subscribers (many)
//!         │                          │                      │
//!         ├─ Communication ─────────>│ ──> broadcast ─────> rx
//!         ├─ CommunicationError ────>│      channel  ─────> rx
//!         ├─ ApiError ──────────────>│               ─────> rx
//!         └─ InternalError ─────────>│
//! ```

use rollbar_api::ApiResponse;
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum number of events buffered per subscriber before the oldest are
/// overwritten.
pub const MAX_EVENTS: usize = 100;

/// Classification of a failed delivery attempt that will be retried or
/// deferred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommunicationErrorKind {
    /// HTTP 429; dispatch deferred per `Retry-After`.
    RateLimited,
    /// HTTP 5xx; retried with backoff.
    Server,
    /// DNS/TCP/TLS/timeout failure; retried with backoff.
    Transport,
}

/// Classification of an error internal to the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalErrorKind {
    /// A payload queue evicted its oldest payload on overflow.
    QueueOverflow,
    /// The pending-report buffer evicted its oldest report under a burst.
    SubmissionOverflow,
    /// A payload's deadline expired before its first dispatch attempt.
    PayloadTimeout,
    /// The per-process successful-delivery cap was reached.
    MaxItemsReached,
    /// A user callback panicked and was treated as a no-op.
    UserCallback,
    /// An occurrence could not be serialized and was dropped.
    Serialization,
}

/// Events observable on the bus.
///
/// Each variant carries the responsible access token, the occurrence UUID
/// when one exists, and a human-readable context string where the structured
/// fields alone would not explain the situation.
#[derive(Clone, Debug)]
pub enum Event {
    /// An item was accepted by the API.
    Communication {
        access_token: String,
        uuid: Option<String>,
        response: ApiResponse,
    },
    /// A delivery attempt failed in a retryable or deferred way.
    CommunicationError {
        kind: CommunicationErrorKind,
        access_token: String,
        uuid: Option<String>,
        detail: String,
    },
    /// The API rejected an item permanently.
    ApiError {
        code: i64,
        message: String,
        access_token: String,
        uuid: Option<String>,
    },
    /// An error internal to the pipeline.
    InternalError {
        kind: InternalErrorKind,
        uuid: Option<String>,
        context: String,
    },
}

/// Bounded broadcast bus the pipeline emits on.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(MAX_EVENTS);
        EventBus { tx }
    }

    /// Registers a new subscriber. Events emitted before subscription are
    /// not replayed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emits an event. Never blocks; with no live subscriber the event is
    /// simply dropped.
    pub fn emit(&self, event: Event) {
        debug!(?event, "pipeline event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
