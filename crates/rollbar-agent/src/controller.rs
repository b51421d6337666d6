//! Process-wide queue controller.
//!
//! One controller drains every registered payload queue on a fixed cadence.
//! Each tick visits each queue exactly once, in stable registration order:
//!
//! ```text
//!   ┌────────────┐   readiness    ┌──────────────┐
//!   │  registry  │ ──── gate ───> │ deadline     │
//!   │ (Weak refs)│                │ sweep        │
//!   └────────────┘                └──────┬───────┘
//!                                        v
//!   ┌────────────┐   defer        ┌──────────────┐      ┌───────────┐
//!   │ rate gate  │ <─────────────>│ dispatch     │ ───> │ event bus │
//!   │ (per token)│                │ (HTTP POST)  │      └───────────┘
//!   └────────────┘                └──────────────┘
//! ```
//!
//! The POST is awaited on the controller task itself. That makes the
//! controller the single global serialization point for HTTP egress and for
//! rate accounting; concurrency comes from the tick interleaving different
//! queues, never from parallel posts. Queue locks are released before the
//! round trip and outcomes are re-applied by payload identity, so a flush or
//! reconfigure racing an in-flight post cannot misattribute a result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::events::{CommunicationErrorKind, Event, EventBus, InternalErrorKind};
use crate::payload::DeliveryOutcome;
use crate::queue::{PayloadQueue, Prepared};
use crate::rate_limit::RateWindow;
use crate::telemetry::TelemetryBuffer;
use crate::transport::TransportPool;

/// Cadence of the controller's pass over all registered queues.
pub const TICK_PERIOD: Duration = Duration::from_millis(250);

/// Deferral applied on HTTP 429 when the server sent no `Retry-After`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Process-wide scheduler of all payload queues.
pub struct QueueController {
    registry: Mutex<Vec<Weak<PayloadQueue>>>,
    rate: Mutex<HashMap<String, RateWindow>>,
    events: EventBus,
    pool: TransportPool,
    telemetry: Arc<TelemetryBuffer>,
    total_delivered: AtomicU64,
    max_items_reported: AtomicBool,
    tick_task: Mutex<Option<JoinHandle<()>>>,
}

impl QueueController {
    /// Controller bound to the process-wide telemetry ring.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_telemetry(Arc::clone(TelemetryBuffer::shared()))
    }

    /// Controller bound to an explicit telemetry ring (tests construct
    /// isolated pipelines this way).
    #[must_use]
    pub fn with_telemetry(telemetry: Arc<TelemetryBuffer>) -> Arc<Self> {
        Arc::new(QueueController {
            registry: Mutex::new(Vec::new()),
            rate: Mutex::new(HashMap::new()),
            events: EventBus::new(),
            pool: TransportPool::new(),
            telemetry,
            total_delivered: AtomicU64::new(0),
            max_items_reported: AtomicBool::new(false),
            tick_task: Mutex::new(None),
        })
    }

    /// The process-wide controller, created on first use. Notifiers built
    /// through [`crate::Notifier::new`] register here; explicitly
    /// constructed controllers can be passed instead.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<QueueController>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(QueueController::new))
    }

    /// Subscribes to delivery outcomes and internal errors.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn transport_pool(&self) -> &TransportPool {
        &self.pool
    }

    pub(crate) fn telemetry(&self) -> &Arc<TelemetryBuffer> {
        &self.telemetry
    }

    /// Total successful deliveries since the controller started.
    #[must_use]
    pub fn total_delivered(&self) -> u64 {
        self.total_delivered.load(Ordering::Relaxed)
    }

    /// Registers a queue and starts the tick loop if this is the first
    /// registration. Must be called within a tokio runtime.
    pub fn register(self: &Arc<Self>, queue: &Arc<PayloadQueue>) {
        self.register_detached(queue);
        self.ensure_started();
    }

    /// Registers without starting the tick loop; unit tests drive
    /// [`Self::tick`] by hand.
    pub(crate) fn register_detached(&self, queue: &Arc<PayloadQueue>) {
        let mut registry = self.lock_registry();
        registry.retain(|weak| weak.strong_count() > 0);
        let already = registry
            .iter()
            .any(|weak| weak.as_ptr() == Arc::as_ptr(queue));
        if !already {
            registry.push(Arc::downgrade(queue));
        }
    }

    /// Removes a queue. Mandatory on notifier disposal, before the
    /// notifier's transport handle is released.
    pub fn deregister(&self, queue: &Arc<PayloadQueue>) {
        self.lock_registry()
            .retain(|weak| weak.strong_count() > 0 && weak.as_ptr() != Arc::as_ptr(queue));
    }

    /// Worst-case time to drain every registered queue at full rate:
    /// `ceil(sum(depths) / min(rate limit)) * 60 s + tick`.
    #[must_use]
    pub fn recommended_timeout(&self) -> Duration {
        let queues = self.live_queues();
        let total_depth: usize = queues.iter().map(|queue| queue.depth()).sum();
        let min_rpm = queues
            .iter()
            .map(|queue| queue.rate_limit())
            .min()
            .unwrap_or(crate::config::DEFAULT_MAX_REPORTS_PER_MINUTE)
            .max(1);
        let windows = total_depth.div_ceil(usize::try_from(min_rpm).unwrap_or(usize::MAX));
        Duration::from_secs(60) * u32::try_from(windows).unwrap_or(u32::MAX) + TICK_PERIOD
    }

    /// Stops the tick loop. Payloads still queued are neither flushed nor
    /// resolved; this is process-teardown, not a drain.
    pub fn shutdown(&self) {
        #[allow(clippy::expect_used)]
        let task = self.tick_task.lock().expect("tick task lock poisoned").take();
        if let Some(task) = task {
            task.abort();
            debug!("queue controller tick loop stopped");
        }
    }

    fn ensure_started(self: &Arc<Self>) {
        #[allow(clippy::expect_used)]
        let mut task = self.tick_task.lock().expect("tick task lock poisoned");
        if task.is_none() {
            let controller = Arc::clone(self);
            *task = Some(tokio::spawn(async move {
                controller.run().await;
            }));
        }
    }

    async fn run(self: Arc<Self>) {
        debug!("queue controller tick loop started");
        let mut interval = tokio::time::interval(TICK_PERIOD);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// One pass: every registered queue, exactly once.
    pub(crate) async fn tick(&self) {
        for queue in self.live_queues() {
            self.process_queue(&queue).await;
        }
    }

    fn live_queues(&self) -> Vec<Arc<PayloadQueue>> {
        let mut registry = self.lock_registry();
        registry.retain(|weak| weak.strong_count() > 0);
        registry.iter().filter_map(Weak::upgrade).collect()
    }

    async fn process_queue(&self, queue: &Arc<PayloadQueue>) {
        let now = Instant::now();
        if !queue.is_ready(now) {
            return;
        }

        for uuid in queue.sweep_expired(now) {
            self.events.emit(Event::InternalError {
                kind: InternalErrorKind::PayloadTimeout,
                uuid,
                context: "payload deadline expired before dispatch".to_string(),
            });
        }

        if queue.is_empty() {
            return;
        }

        let cap = queue.max_items();
        if cap > 0 && self.total_delivered.load(Ordering::Relaxed) >= cap {
            let uuid = queue.drop_head().flatten();
            if !self.max_items_reported.swap(true, Ordering::Relaxed) {
                warn!(cap, "per-process delivery cap reached, dropping further payloads");
                self.events.emit(Event::InternalError {
                    kind: InternalErrorKind::MaxItemsReached,
                    uuid,
                    context: format!("per-process delivery cap of {cap} reached"),
                });
            }
            return;
        }

        let token = queue.access_token().to_string();
        let gate = {
            #[allow(clippy::expect_used)]
            let mut rate = self.rate.lock().expect("rate map lock poisoned");
            rate.entry(token.clone())
                .or_insert_with(|| RateWindow::new(now))
                .check(now, queue.rate_limit())
        };
        if let Err(reopens) = gate {
            queue.defer_until(reopens);
            return;
        }

        let job = match queue.prepare_dispatch(Some(self.telemetry.snapshot())) {
            Prepared::Job(job) => job,
            Prepared::Empty => return,
            Prepared::Poisoned { uuid, error } => {
                self.events.emit(Event::InternalError {
                    kind: InternalErrorKind::Serialization,
                    uuid,
                    context: format!("payload could not be serialized: {error}"),
                });
                return;
            }
        };

        // No queue lock is held across the round trip.
        let result = job.transport.post_item(&token, job.body.clone()).await;
        let now = Instant::now();

        match result {
            Ok(response) if (200..300).contains(&response.status) => {
                let api = response.api.unwrap_or_default();
                if api.is_accepted() {
                    if queue.finish(job.payload_id, DeliveryOutcome::Delivered) {
                        self.record_rate(&token, now);
                        self.total_delivered.fetch_add(1, Ordering::Relaxed);
                        self.events.emit(Event::Communication {
                            access_token: token,
                            uuid: job.uuid,
                            response: api,
                        });
                    }
                } else if queue.finish(job.payload_id, DeliveryOutcome::ApiError) {
                    self.record_rate(&token, now);
                    self.events.emit(Event::ApiError {
                        code: api.err,
                        message: api.message.unwrap_or_default(),
                        access_token: token,
                        uuid: job.uuid,
                    });
                }
            }
            Ok(response) if response.status == 429 => {
                let delay = response.retry_after.unwrap_or(DEFAULT_RETRY_AFTER);
                queue.defer_until(now + delay);
                debug!(token = %token, ?delay, "rate limited by server, deferring queue");
                self.events.emit(Event::CommunicationError {
                    kind: CommunicationErrorKind::RateLimited,
                    access_token: token,
                    uuid: job.uuid,
                    detail: format!("server rate limited, retrying in {}s", delay.as_secs()),
                });
            }
            Ok(response) if response.status >= 500 => {
                let delay = queue.apply_backoff(now);
                self.events.emit(Event::CommunicationError {
                    kind: CommunicationErrorKind::Server,
                    access_token: token,
                    uuid: job.uuid,
                    detail: format!(
                        "server returned {}, retrying in {}ms",
                        response.status,
                        delay.as_millis()
                    ),
                });
            }
            Ok(response) => {
                // Remaining 4xx: permanent rejection.
                if queue.finish(job.payload_id, DeliveryOutcome::ApiError) {
                    self.record_rate(&token, now);
                    let message = response
                        .api
                        .and_then(|api| api.message)
                        .unwrap_or_else(|| format!("HTTP {}", response.status));
                    self.events.emit(Event::ApiError {
                        code: i64::from(response.status),
                        message,
                        access_token: token,
                        uuid: job.uuid,
                    });
                }
            }
            Err(err) => {
                let delay = queue.apply_backoff(now);
                self.events.emit(Event::CommunicationError {
                    kind: CommunicationErrorKind::Transport,
                    access_token: token,
                    uuid: job.uuid,
                    detail: format!("{err}, retrying in {}ms", delay.as_millis()),
                });
            }
        }
    }

    fn record_rate(&self, token: &str, now: Instant) {
        #[allow(clippy::expect_used)]
        let mut rate = self.rate.lock().expect("rate map lock poisoned");
        rate.entry(token.to_string())
            .or_insert_with(|| RateWindow::new(now))
            .record(now);
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Vec<Weak<PayloadQueue>>> {
        #[allow(clippy::expect_used)]
        self.registry.lock().expect("registry lock poisoned")
    }
}
