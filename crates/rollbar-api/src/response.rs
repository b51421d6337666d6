//! Ingestion API response shape.

use serde::Deserialize;
use serde_json::Value;

/// Body of an ingestion API response.
///
/// `err == 0` means the item was accepted; any other value is an
/// application-level rejection with a `message`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub err: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

impl ApiResponse {
    /// Whether the item was accepted by the API.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.err == 0
    }
}
