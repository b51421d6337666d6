//! Process-wide telemetry ring buffer.
//!
//! Recent breadcrumbs are kept in a bounded FIFO and snapshotted onto every
//! outgoing payload just before its first dispatch. Overflow evicts the
//! oldest entry. Capture is active while at least one notifier is attached;
//! with no notifier alive, breadcrumbs have nowhere to go and are discarded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use rollbar_api::{Level, TelemetryItem, TelemetrySource};
use tracing::warn;

/// Default ring capacity.
pub const DEFAULT_TELEMETRY_CAPACITY: usize = 50;

/// Bounded FIFO of recent telemetry breadcrumbs.
///
/// Both `capture` and `snapshot` take a short critical section; neither
/// blocks on anything but the ring's own mutex.
#[derive(Debug)]
pub struct TelemetryBuffer {
    ring: Mutex<VecDeque<TelemetryItem>>,
    capacity: usize,
    attached: AtomicUsize,
}

impl TelemetryBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        TelemetryBuffer {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            attached: AtomicUsize::new(0),
        }
    }

    /// The process-wide ring, created on first use with the default
    /// capacity. Explicitly constructed buffers can be passed to notifiers
    /// instead; this locator exists for the common single-ring case.
    pub fn shared() -> &'static Arc<TelemetryBuffer> {
        static SHARED: OnceLock<Arc<TelemetryBuffer>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(TelemetryBuffer::new(DEFAULT_TELEMETRY_CAPACITY)))
    }

    /// Records a breadcrumb. Dropped when no notifier is attached or when
    /// the capacity is zero; past capacity the oldest entry is evicted.
    pub fn capture(&self, item: TelemetryItem) {
        if self.attached.load(Ordering::Relaxed) == 0 || self.capacity == 0 {
            return;
        }
        #[allow(clippy::expect_used)]
        let mut ring = self.ring.lock().expect("telemetry ring lock poisoned");
        if ring.len() >= self.capacity {
            ring.pop_front();
            warn!(capacity = self.capacity, "telemetry ring full, dropping oldest breadcrumb");
        }
        ring.push_back(item);
    }

    /// Convenience capture of a message breadcrumb stamped with the current
    /// wall-clock time.
    pub fn capture_message(&self, source: TelemetrySource, level: Level, message: impl Into<String>) {
        self.capture(TelemetryItem::message(now_ms(), source, level, message));
    }

    /// A consistent copy of the current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TelemetryItem> {
        #[allow(clippy::expect_used)]
        let ring = self.ring.lock().expect("telemetry ring lock poisoned");
        ring.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.ring.lock().expect("telemetry ring lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks a notifier as alive; enables capture on the first attachment.
    pub(crate) fn attach(&self) {
        self.attached.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks a notifier as disposed; the last detachment disables capture
    /// and clears the ring.
    pub(crate) fn detach(&self) {
        if self.attached.fetch_sub(1, Ordering::Relaxed) == 1 {
            #[allow(clippy::expect_used)]
            self.ring.lock().expect("telemetry ring lock poisoned").clear();
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
