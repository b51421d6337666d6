//! The occurrence envelope and its top-level wrapper.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::body::Body;
use crate::level::Level;
use crate::telemetry::TelemetryItem;

/// Identity of the reporting library, included with every occurrence.
#[derive(Clone, Debug, Serialize)]
pub struct Notifier {
    pub name: String,
    pub version: String,
}

/// Host metadata attached to an occurrence.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Server {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_version: Option<String>,
}

/// Affected-user metadata attached to an occurrence.
///
/// Which of these fields survive onto the wire is governed by the agent's
/// person-data collection policy.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Person {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// HTTP request context attached to an occurrence.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Request {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ip: Option<String>,
}

/// One occurrence: the `data` object of an item.
///
/// Everything other than `environment`, `body`, `level`, `timestamp`, and
/// the notifier stanza is optional and omitted from the wire when unset.
#[derive(Clone, Debug, Serialize)]
pub struct Data {
    pub environment: String,
    pub body: Body,
    pub level: Level,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub platform: String,
    pub language: String,
    pub notifier: Notifier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<Server>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person: Option<Person>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Vec<TelemetryItem>>,
}

impl Data {
    /// Minimal occurrence for the given environment, body, and level.
    /// Timestamp, platform, and notifier fields are the caller's to stamp.
    #[must_use]
    pub fn new(environment: impl Into<String>, body: Body, level: Level) -> Self {
        Data {
            environment: environment.into(),
            body,
            level,
            timestamp: 0,
            platform: String::new(),
            language: "rust".to_string(),
            notifier: Notifier {
                name: String::new(),
                version: String::new(),
            },
            server: None,
            person: None,
            request: None,
            client: None,
            custom: None,
            fingerprint: None,
            title: None,
            uuid: None,
            context: None,
            code_version: None,
            framework: None,
            telemetry: None,
        }
    }
}

/// The top-level POST body: `{"access_token": ..., "data": {...}}`.
#[derive(Clone, Debug, Serialize)]
pub struct Item<'a> {
    pub access_token: &'a str,
    pub data: &'a Data,
}
