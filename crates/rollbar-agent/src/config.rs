//! Recognized configuration options for a notifier.
//!
//! Construction goes through [`Config::new`] plus field assignment; the
//! notifier calls [`Config::validate`] once at construction time, where a
//! blank access token or an unparseable endpoint is fatal.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rollbar_api::item::{Person, Server};
use rollbar_api::{Data, Level};

use crate::error::AgentError;

/// Default ingestion endpoint prefix.
pub const DEFAULT_ENDPOINT: &str = "https://api.rollbar.com/api/1/";

/// Default per-token dispatch budget per 60 s window.
pub const DEFAULT_MAX_REPORTS_PER_MINUTE: u32 = 60;

/// Default bounded depth of each notifier's payload queue.
pub const DEFAULT_REPORTING_QUEUE_DEPTH: usize = 20;

/// Default per-request HTTP timeout.
pub const DEFAULT_POST_TIMEOUT: Duration = Duration::from_secs(30);

/// Predicate consulted before enqueueing a report; `true` means ignore.
pub type CheckIgnore = Arc<dyn Fn(&Data) -> bool + Send + Sync>;

/// In-place mutation of an occurrence before enqueueing.
pub type DataMutator = Arc<dyn Fn(&mut Data) + Send + Sync>;

/// How client IP addresses are stamped onto request context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IpAddressPolicy {
    /// Ship the address as provided.
    #[default]
    Collect,
    /// Zero the host portion (last IPv4 octet, low 64 IPv6 bits).
    Anonymize,
    /// Drop the address entirely.
    DoNotCollect,
}

/// Which person fields are allowed onto the wire. The person id is always
/// kept when person data is present at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PersonDataPolicy {
    pub collect_username: bool,
    pub collect_email: bool,
}

impl Default for PersonDataPolicy {
    fn default() -> Self {
        PersonDataPolicy {
            collect_username: true,
            collect_email: true,
        }
    }
}

/// The full set of recognized notifier options.
#[derive(Clone)]
pub struct Config {
    /// Destination project token; also the rate-limit accounting key.
    pub access_token: String,
    /// Environment name stamped on every occurrence.
    pub environment: String,
    /// When false, submissions are accepted and silently discarded.
    pub enabled: bool,
    /// Severity gate: submissions below this level are dropped.
    pub log_level: Level,
    /// Sliding-window dispatch budget per access token.
    pub max_reports_per_minute: u32,
    /// Bounded depth of this notifier's payload queue.
    pub reporting_queue_depth: usize,
    /// Per-process cap on successful deliveries; 0 means unlimited.
    pub max_items: u64,
    /// Install a panic hook that reports uncaught panics at critical level.
    pub capture_uncaught_exceptions: bool,
    /// Field names the external redaction collaborator should scrub.
    pub scrub_fields: Vec<String>,
    /// Field names exempt from scrubbing; wins over `scrub_fields` overlap.
    pub scrub_whitelist_fields: Vec<String>,
    /// Ingestion endpoint prefix; items post to `{endpoint}item/`.
    pub endpoint: String,
    pub proxy_address: Option<String>,
    pub proxy_user: Option<String>,
    pub proxy_password: Option<String>,
    /// Ignore predicate; a panic inside counts as "not ignored".
    pub check_ignore: Option<CheckIgnore>,
    /// Occurrence mutator run before the truncator; panics are identity.
    pub transform: Option<DataMutator>,
    /// Occurrence mutator run last; panics are identity.
    pub truncate: Option<DataMutator>,
    /// Host metadata stamped on every occurrence.
    pub server: Option<Server>,
    /// Default person stamped when a report carries none of its own.
    pub person: Option<Person>,
    pub person_data_policy: PersonDataPolicy,
    pub ip_address_policy: IpAddressPolicy,
    /// Per-request HTTP timeout for item posts.
    pub post_timeout: Duration,
}

impl Config {
    /// Configuration with the given token and environment, everything else
    /// at its default.
    #[must_use]
    pub fn new(access_token: impl Into<String>, environment: impl Into<String>) -> Self {
        Config {
            access_token: access_token.into(),
            environment: environment.into(),
            enabled: true,
            log_level: Level::Debug,
            max_reports_per_minute: DEFAULT_MAX_REPORTS_PER_MINUTE,
            reporting_queue_depth: DEFAULT_REPORTING_QUEUE_DEPTH,
            max_items: 0,
            capture_uncaught_exceptions: false,
            scrub_fields: Vec::new(),
            scrub_whitelist_fields: Vec::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            proxy_address: None,
            proxy_user: None,
            proxy_password: None,
            check_ignore: None,
            transform: None,
            truncate: None,
            server: None,
            person: None,
            person_data_policy: PersonDataPolicy::default(),
            ip_address_policy: IpAddressPolicy::default(),
            post_timeout: DEFAULT_POST_TIMEOUT,
        }
    }

    /// Validates the options that are fatal at notifier construction.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.access_token.trim().is_empty() {
            return Err(AgentError::InvalidConfig(
                "access token must not be blank".to_string(),
            ));
        }
        if self.endpoint.parse::<reqwest::Url>().is_err() {
            return Err(AgentError::InvalidConfig(format!(
                "invalid endpoint '{}'",
                self.endpoint
            )));
        }
        if self.max_reports_per_minute == 0 {
            return Err(AgentError::InvalidConfig(
                "max_reports_per_minute must be greater than 0".to_string(),
            ));
        }
        if self.reporting_queue_depth == 0 {
            return Err(AgentError::InvalidConfig(
                "reporting_queue_depth must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The absolute URL items are posted to.
    #[must_use]
    pub fn item_url(&self) -> String {
        if self.endpoint.ends_with('/') {
            format!("{}item/", self.endpoint)
        } else {
            format!("{}/item/", self.endpoint)
        }
    }

    /// Scrub list with the whitelist already subtracted, so the redaction
    /// collaborator consumes a single resolved set.
    #[must_use]
    pub fn effective_scrub_fields(&self) -> Vec<String> {
        self.scrub_fields
            .iter()
            .filter(|field| !self.scrub_whitelist_fields.contains(field))
            .cloned()
            .collect()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Callbacks are opaque; log the scalar options only.
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("enabled", &self.enabled)
            .field("log_level", &self.log_level)
            .field("max_reports_per_minute", &self.max_reports_per_minute)
            .field("reporting_queue_depth", &self.reporting_queue_depth)
            .field("max_items", &self.max_items)
            .field("endpoint", &self.endpoint)
            .field("proxy_address", &self.proxy_address)
            .finish_non_exhaustive()
    }
}
