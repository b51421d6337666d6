//! Notifier facade: construction, the submission path, reconfiguration,
//! and disposal.
//!
//! `log` is fire-and-forget: it returns once the report is accepted into
//! the pending buffer and never fails for network reasons. The worker pool
//! applies the enabled and severity gates, packages the occurrence, runs
//! the user callbacks under panic isolation, and enqueues the payload for
//! the controller to dispatch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rollbar_api::item::{Person, Request};
use rollbar_api::{Body, Level};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::Config;
use crate::controller::QueueController;
use crate::error::AgentError;
use crate::events::{Event, EventBus, InternalErrorKind};
use crate::packager;
use crate::payload::{DeliveryOutcome, Payload, SignalSender};
use crate::queue::PayloadQueue;
use crate::telemetry::TelemetryBuffer;
use crate::transport::HttpTransport;
use crate::worker::{PendingReport, ReportBuffer, WorkerPool, PENDING_REPORTS_DEPTH};
use crate::panic_hook;

/// Per-report extras carried onto the occurrence envelope.
#[derive(Clone, Debug, Default)]
pub struct ReportOptions {
    /// Arbitrary key/value data for the `custom` field.
    pub custom: Option<Map<String, Value>>,
    /// HTTP request context; subject to the IP collection policy.
    pub request: Option<Request>,
    /// Person for this report; overrides the configured default person.
    pub person: Option<Person>,
    pub fingerprint: Option<String>,
    pub title: Option<String>,
    pub context: Option<String>,
}

pub(crate) struct NotifierShared {
    config: RwLock<Arc<Config>>,
    queue: Arc<PayloadQueue>,
    controller: Arc<QueueController>,
}

impl NotifierShared {
    fn config(&self) -> Arc<Config> {
        #[allow(clippy::expect_used)]
        Arc::clone(&self.config.read().expect("config lock poisoned"))
    }
}

/// A configured reporting handle. Exclusively owns one payload queue.
pub struct Notifier {
    shared: Arc<NotifierShared>,
    buffer: Arc<ReportBuffer>,
    _workers: WorkerPool,
    closed: AtomicBool,
}

impl Notifier {
    /// Builds a notifier against the process-wide controller and telemetry
    /// ring. Must be called within a tokio runtime.
    pub fn new(config: Config) -> Result<Arc<Self>, AgentError> {
        Self::with_controller(config, QueueController::shared())
    }

    /// Builds a notifier against an explicit controller; tests construct
    /// isolated pipelines this way. Must be called within a tokio runtime.
    pub fn with_controller(
        config: Config,
        controller: Arc<QueueController>,
    ) -> Result<Arc<Self>, AgentError> {
        config.validate()?;

        let transport = HttpTransport::new(controller.transport_pool(), &config)?;
        let queue = Arc::new(PayloadQueue::new(
            config.access_token.clone(),
            config.reporting_queue_depth,
            config.max_reports_per_minute,
            config.max_items,
            Arc::new(transport),
        ));
        controller.register(&queue);
        controller.telemetry().attach();

        let capture_panics = config.capture_uncaught_exceptions;
        let shared = Arc::new(NotifierShared {
            config: RwLock::new(Arc::new(config)),
            queue,
            controller,
        });

        let buffer = ReportBuffer::new(PENDING_REPORTS_DEPTH);
        let worker_shared = Arc::clone(&shared);
        let workers = WorkerPool::spawn(Arc::clone(&buffer), move |report| {
            process_report(&worker_shared, report);
        });

        let notifier = Arc::new(Notifier {
            shared,
            buffer,
            _workers: workers,
            closed: AtomicBool::new(false),
        });
        if capture_panics {
            panic_hook::install(&notifier);
        }
        debug!(environment = %notifier.config().environment, "notifier started");
        Ok(notifier)
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        self.shared.config()
    }

    /// Submits a report. Returns once the report is accepted into the
    /// pending buffer; delivery is asynchronous and observable on the
    /// event bus.
    pub fn log(&self, level: Level, body: Body) -> Result<(), AgentError> {
        self.log_with(level, body, ReportOptions::default())
    }

    /// [`Self::log`] with per-report extras.
    pub fn log_with(
        &self,
        level: Level,
        body: Body,
        options: ReportOptions,
    ) -> Result<(), AgentError> {
        self.submit(level, body, options, None, None)
    }

    /// The internal submission path; the blocking wrapper attaches a signal
    /// and an absolute deadline here.
    pub(crate) fn submit(
        &self,
        level: Level,
        body: Body,
        options: ReportOptions,
        signal: Option<SignalSender>,
        deadline: Option<Instant>,
    ) -> Result<(), AgentError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AgentError::ShutDown);
        }
        let report = PendingReport {
            level,
            body,
            options,
            signal,
            deadline,
        };
        if self.buffer.push(report, self.events()) {
            Ok(())
        } else {
            Err(AgentError::ShutDown)
        }
    }

    /// Atomically reconfigures: the queue is flushed (pending signals
    /// release as aborted), the transport handle is swapped through the
    /// pool, and dispatch pacing resets.
    pub fn configure(&self, config: Config) -> Result<(), AgentError> {
        config.validate()?;
        let transport =
            HttpTransport::new(self.shared.controller.transport_pool(), &config)?;
        self.shared.queue.reconfigure(
            Arc::new(transport),
            config.reporting_queue_depth,
            config.max_reports_per_minute,
            config.max_items,
        );
        #[allow(clippy::expect_used)]
        let mut current = self.shared.config.write().expect("config lock poisoned");
        *current = Arc::new(config);
        Ok(())
    }

    /// Subscribes to delivery outcomes and internal errors.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.controller.subscribe()
    }

    /// The telemetry ring this notifier's payloads snapshot from.
    #[must_use]
    pub fn telemetry(&self) -> &Arc<TelemetryBuffer> {
        self.shared.controller.telemetry()
    }

    /// Worst-case time to drain all queues at full rate.
    #[must_use]
    pub fn recommended_timeout(&self) -> Duration {
        self.shared.controller.recommended_timeout()
    }

    /// Payloads currently resident in this notifier's queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub(crate) fn events(&self) -> &EventBus {
        self.shared.controller.events()
    }

    /// Stops accepting submissions, lets the workers drain what was already
    /// accepted, deregisters the queue, and releases pending signals as
    /// aborted. Idempotent; also runs on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.buffer.close();
        // Deregistration precedes the transport release that happens when
        // the queue is dropped with this notifier.
        self.shared.controller.deregister(&self.shared.queue);
        self.shared.queue.flush();
        self.shared.controller.telemetry().detach();
        debug!("notifier closed");
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.close();
    }
}

/// Runs one pending report through the submission pipeline on a worker.
fn process_report(shared: &NotifierShared, report: PendingReport) {
    let PendingReport {
        level,
        body,
        options,
        signal,
        deadline,
    } = report;
    let config = shared.config();
    let events = shared.controller.events();

    if !config.enabled || level < config.log_level {
        abandon(signal);
        return;
    }

    let mut data = packager::assemble(&config, level, body, options);

    if let Some(check_ignore) = &config.check_ignore {
        match catch_unwind(AssertUnwindSafe(|| check_ignore(&data))) {
            Ok(true) => {
                abandon(signal);
                return;
            }
            Ok(false) => {}
            Err(_) => {
                // A panicking predicate must not suppress the report.
                events.emit(Event::InternalError {
                    kind: InternalErrorKind::UserCallback,
                    uuid: data.uuid.clone(),
                    context: "check_ignore panicked, treating report as not ignored".to_string(),
                });
            }
        }
    }

    for (name, mutator) in [("transform", &config.transform), ("truncate", &config.truncate)] {
        if let Some(mutator) = mutator {
            // Mutate a scratch copy so a mid-mutation panic leaves the
            // occurrence untouched rather than half-transformed.
            let mut candidate = data.clone();
            match catch_unwind(AssertUnwindSafe(|| {
                mutator(&mut candidate);
                candidate
            })) {
                Ok(mutated) => data = mutated,
                Err(_) => {
                    events.emit(Event::InternalError {
                        kind: InternalErrorKind::UserCallback,
                        uuid: data.uuid.clone(),
                        context: format!("{name} panicked, keeping occurrence unchanged"),
                    });
                }
            }
        }
    }

    let payload = Payload::with_signal(config.access_token.clone(), data, deadline, signal);
    shared.queue.enqueue(payload, events);
}

fn abandon(signal: Option<SignalSender>) {
    if let Some(signal) = signal {
        let _ = signal.send(DeliveryOutcome::Aborted);
    }
}
