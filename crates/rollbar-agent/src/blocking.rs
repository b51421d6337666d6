//! Blocking submission wrapper.
//!
//! Converts a fire-and-forget submission into a call that waits for the
//! payload's terminal outcome, bounded by a timeout. The wrapper attaches a
//! one-shot signal and an absolute deadline to the payload; the controller
//! releases the signal at the first terminal transition, and the deadline
//! evicts the payload deterministically if it never begins dispatch. A
//! payload whose dispatch already began when the caller's wait expires stays
//! resident and may still deliver afterwards.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rollbar_api::{Body, Level};
use tokio::sync::oneshot;

use crate::notifier::{Notifier, ReportOptions};
use crate::payload::DeliveryOutcome;

/// Wraps a notifier so submissions wait for their outcome.
#[derive(Clone)]
pub struct BlockingNotifier {
    inner: Arc<Notifier>,
    timeout: Duration,
}

impl BlockingNotifier {
    #[must_use]
    pub fn new(inner: Arc<Notifier>, timeout: Duration) -> Self {
        BlockingNotifier { inner, timeout }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The wrapped notifier, for fire-and-forget submissions alongside
    /// blocking ones.
    #[must_use]
    pub fn inner(&self) -> &Arc<Notifier> {
        &self.inner
    }

    /// Submits a report and waits up to the configured timeout for its
    /// terminal outcome.
    pub async fn log(&self, level: Level, body: Body) -> DeliveryOutcome {
        self.log_with(level, body, ReportOptions::default()).await
    }

    /// [`Self::log`] with per-report extras.
    pub async fn log_with(
        &self,
        level: Level,
        body: Body,
        options: ReportOptions,
    ) -> DeliveryOutcome {
        let (signal, outcome) = oneshot::channel();
        let deadline = Instant::now() + self.timeout;

        if self
            .inner
            .submit(level, body, options, Some(signal), Some(deadline))
            .is_err()
        {
            return DeliveryOutcome::Aborted;
        }

        match tokio::time::timeout(self.timeout, outcome).await {
            Ok(Ok(outcome)) => outcome,
            // The signal end was dropped without a terminal transition.
            Ok(Err(_)) => DeliveryOutcome::Aborted,
            Err(_) => DeliveryOutcome::TimedOut,
        }
    }
}
