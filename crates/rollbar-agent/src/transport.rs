//! HTTP transport: the seam the controller posts through, its `reqwest`
//! implementation, and the proxy-keyed client pool.
//!
//! Clients are pooled by the `(proxy_address, proxy_user, proxy_password)`
//! triple and shared across notifiers with the same proxy configuration.
//! The pool holds weak references, so a client is torn down when the last
//! notifier using it deregisters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use rollbar_api::ApiResponse;
use tracing::error;

use crate::config::Config;
use crate::error::AgentError;

/// Header carrying the bearer access token.
pub const ACCESS_TOKEN_HEADER: &str = "X-Rollbar-Access-Token";

const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

/// Result of one item post that reached the server.
#[derive(Debug)]
pub struct ItemResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed `Retry-After` seconds, when the server sent one.
    pub retry_after: Option<Duration>,
    /// Parsed response body, when it was valid JSON.
    pub api: Option<ApiResponse>,
}

/// Failure before any HTTP status was obtained (DNS, TCP, TLS, timeout).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// The operation the controller dispatches through. Production uses
/// [`HttpTransport`]; tests substitute their own implementations.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_item(&self, access_token: &str, body: Bytes)
        -> Result<ItemResponse, TransportError>;
}

/// `reqwest`-backed transport bound to one item URL and post timeout. The
/// underlying client may be shared with other transports through the pool.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Arc<reqwest::Client>,
    item_url: String,
    post_timeout: Duration,
}

impl HttpTransport {
    /// Builds a transport for the given configuration, acquiring the pooled
    /// client for its proxy triple.
    pub fn new(pool: &TransportPool, config: &Config) -> Result<Self, AgentError> {
        Ok(HttpTransport {
            client: pool.acquire(config)?,
            item_url: config.item_url(),
            post_timeout: config.post_timeout,
        })
    }

    #[must_use]
    pub fn item_url(&self) -> &str {
        &self.item_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_item(
        &self,
        access_token: &str,
        body: Bytes,
    ) -> Result<ItemResponse, TransportError> {
        let response = self
            .client
            .post(&self.item_url)
            .timeout(self.post_timeout)
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header(ACCESS_TOKEN_HEADER, access_token)
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        // Read the body to completion before anything else happens; no lock
        // is ever held around this await.
        let api = match response.bytes().await {
            Ok(bytes) => serde_json::from_slice::<ApiResponse>(&bytes).ok(),
            Err(_) => None,
        };

        Ok(ItemResponse {
            status,
            retry_after,
            api,
        })
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Pool key: the proxy triple.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ProxyKey {
    address: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

impl ProxyKey {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        ProxyKey {
            address: config.proxy_address.clone(),
            user: config.proxy_user.clone(),
            password: config.proxy_password.clone(),
        }
    }
}

/// Weak-referenced pool of `reqwest` clients keyed by proxy triple.
#[derive(Debug, Default)]
pub struct TransportPool {
    clients: Mutex<HashMap<ProxyKey, Weak<reqwest::Client>>>,
}

impl TransportPool {
    #[must_use]
    pub fn new() -> Self {
        TransportPool::default()
    }

    /// Returns the shared client for the configuration's proxy triple,
    /// building one if no live client exists.
    pub fn acquire(&self, config: &Config) -> Result<Arc<reqwest::Client>, AgentError> {
        let key = ProxyKey::from_config(config);
        #[allow(clippy::expect_used)]
        let mut clients = self.clients.lock().expect("transport pool lock poisoned");

        if let Some(existing) = clients.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let client = Arc::new(build_client(config)?);
        clients.retain(|_, weak| weak.strong_count() > 0);
        clients.insert(key, Arc::downgrade(&client));
        Ok(client)
    }

    /// Number of live pooled clients.
    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let clients = self.clients.lock().expect("transport pool lock poisoned");
        clients
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build_client(config: &Config) -> Result<reqwest::Client, AgentError> {
    match build_client_inner(config, true) {
        Ok(client) => Ok(client),
        Err(err) => {
            // Misconfigured proxies fall back to a direct connection so the
            // agent keeps reporting.
            error!(
                "Unable to apply proxy configuration: {}, falling back to direct connection",
                err
            );
            build_client_inner(config, false)
        }
    }
}

fn build_client_inner(config: &Config, allow_proxy: bool) -> Result<reqwest::Client, AgentError> {
    let mut builder = reqwest::Client::builder()
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if allow_proxy {
        if let Some(address) = &config.proxy_address {
            let mut proxy = reqwest::Proxy::all(address)
                .map_err(|err| AgentError::Transport(err.to_string()))?;
            if let Some(user) = &config.proxy_user {
                proxy = proxy.basic_auth(user, config.proxy_password.as_deref().unwrap_or(""));
            }
            builder = builder.proxy(proxy);
        }
    }

    builder
        .build()
        .map_err(|err| AgentError::Transport(err.to_string()))
}
