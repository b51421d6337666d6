//! # Rollbar Agent
//!
//! Asynchronous error and telemetry delivery pipeline for the Rollbar item
//! ingestion API.
//!
//! ## Overview
//!
//! Application code submits reports through a [`notifier::Notifier`] and is
//! never blocked on network I/O. Each notifier owns a bounded payload queue;
//! a single process-wide [`controller::QueueController`] drains every
//! registered queue on a fixed cadence, enforces per-access-token rate
//! limits, posts items over HTTPS, and surfaces delivery outcomes on a typed
//! event bus.
//!
//! ```text
//!  caller ──> report workers ──> payload queue ─┐
//!  caller ──> report workers ──> payload queue ─┼─> queue controller ──> HTTPS
//!                                               │     (250 ms tick)
//!                telemetry ring ── snapshots ───┘        │
//!                                                        v
//!                                                    event bus
//! ```
//!
//! ## Delivery semantics
//!
//! - Submission is fire-and-forget; drops are explicit and observable on the
//!   event bus (queue overflow evicts the *oldest* payload).
//! - Transient failures (HTTP 5xx, transport errors) retry with exponential
//!   backoff and a byte-identical cached body; HTTP 429 defers per
//!   `Retry-After`.
//! - [`blocking::BlockingNotifier`] converts a submission into a bounded wait
//!   for the payload's terminal outcome.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

/// Blocking submission wrapper.
pub mod blocking;

/// Recognized configuration options and validation.
pub mod config;

/// Process-wide queue controller and dispatch loop.
pub mod controller;

/// Error taxonomy.
pub mod error;

/// Typed event bus for delivery outcomes and internal errors.
pub mod events;

/// Tracing formatter for the agent's own diagnostics.
pub mod logger;

/// Notifier facade and the submission path.
pub mod notifier;

/// Envelope assembly and collection policies.
pub(crate) mod packager;

/// Uncaught-panic reporting.
pub mod panic_hook;

/// Payload envelope and delivery signal.
pub mod payload;

/// Per-notifier bounded payload queue.
pub mod queue;

/// Per-access-token sliding-window rate limiting.
pub mod rate_limit;

/// Process-wide telemetry ring buffer.
pub mod telemetry;

/// HTTP transport seam and proxy-keyed client pool.
pub mod transport;

/// Pending-report buffer and worker pool.
pub(crate) mod worker;

pub use rollbar_api as api;

pub use blocking::BlockingNotifier;
pub use config::Config;
pub use error::AgentError;
pub use events::Event;
pub use notifier::{Notifier, ReportOptions};
pub use payload::DeliveryOutcome;

/// Name reported in every occurrence's notifier stanza.
pub const NOTIFIER_NAME: &str = "rollbar-agent";

/// Version reported in every occurrence's notifier stanza.
pub const NOTIFIER_VERSION: &str = env!("CARGO_PKG_VERSION");
