//! Per-access-token sliding-window rate accounting.
//!
//! One window per token, shared by every queue posting with that token.
//! The gate is consulted before dispatch without consuming budget; budget is
//! consumed only when an attempt reaches a terminal outcome (acceptance or a
//! permanent API rejection), so retried attempts do not burn the window.

use std::time::{Duration, Instant};

/// Length of the accounting window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window counter for one access token.
#[derive(Debug)]
pub struct RateWindow {
    window_start: Instant,
    count: u32,
}

impl RateWindow {
    #[must_use]
    pub fn new(now: Instant) -> Self {
        RateWindow {
            window_start: now,
            count: 0,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= RATE_WINDOW {
            self.window_start = now;
            self.count = 0;
        }
    }

    /// Whether another dispatch fits in the current window. On refusal,
    /// returns the instant the window reopens.
    pub fn check(&mut self, now: Instant, max_per_window: u32) -> Result<(), Instant> {
        self.roll(now);
        if self.count < max_per_window {
            Ok(())
        } else {
            Err(self.window_start + RATE_WINDOW)
        }
    }

    /// Consumes one unit of window budget.
    pub fn record(&mut self, now: Instant) {
        self.roll(now);
        self.count = self.count.saturating_add(1);
    }
}
