//! # Rollbar API
//!
//! Wire-level data types for the Rollbar item ingestion API.
//!
//! This crate defines the JSON shapes exchanged with the ingestion endpoint:
//! the occurrence envelope ([`item::Data`] wrapped in [`item::Item`]), the
//! tagged report [`body::Body`] variants, severity [`level::Level`]s,
//! telemetry breadcrumbs, and the API [`response::ApiResponse`].
//!
//! It contains no I/O and no pipeline logic; the delivery machinery lives in
//! the `rollbar-agent` crate.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

/// Tagged report body variants (message, trace, trace chain, crash report).
pub mod body;

/// Occurrence envelope and the top-level item wrapper.
pub mod item;

/// Severity levels and their ordering.
pub mod level;

/// Ingestion API response shape.
pub mod response;

/// Telemetry breadcrumb wire form.
pub mod telemetry;

pub use body::Body;
pub use item::{Data, Item, Notifier, Person, Request, Server};
pub use level::Level;
pub use response::ApiResponse;
pub use telemetry::{TelemetryItem, TelemetrySource};
