//! Telemetry breadcrumb wire form.

use serde::Serialize;
use serde_json::{Map, Value};

/// Where a telemetry breadcrumb originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySource {
    Client,
    Server,
    Log,
    Manual,
    Network,
    Navigation,
}

/// One telemetry breadcrumb.
///
/// A bounded ring of these is kept process-wide and snapshotted onto
/// outgoing occurrences.
#[derive(Clone, Debug, Serialize)]
pub struct TelemetryItem {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub source: TelemetrySource,
    pub level: crate::level::Level,
    pub body: Map<String, Value>,
}

impl TelemetryItem {
    /// Breadcrumb with a single `message` entry in its body.
    #[must_use]
    pub fn message(
        timestamp_ms: u64,
        source: TelemetrySource,
        level: crate::level::Level,
        message: impl Into<String>,
    ) -> Self {
        let mut body = Map::new();
        body.insert("message".to_string(), Value::String(message.into()));
        TelemetryItem {
            timestamp_ms,
            source,
            level,
            body,
        }
    }
}
