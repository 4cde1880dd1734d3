//! Client configuration.
//!
//! Resilience behavior (timeout, retry policy, cache TTL, connectivity
//! source) is layered through one configuration struct rather than client
//! subtypes: a mobile shell and an editor extension construct differently
//! configured instances of the same client.

use crate::cache::{ResourceCache, DEFAULT_TTL};
use crate::client::ToolCallObserver;
use crate::connectivity::NetworkMonitor;
use pocketmcp_retries::RetryConfig;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`McpClient`](crate::McpClient).
#[derive(Clone)]
pub struct ClientConfig {
    /// Client name sent in the initialize handshake.
    pub client_name: String,
    /// Client version sent in the initialize handshake.
    pub client_version: String,
    /// Budget for each request/response exchange.
    pub request_timeout: Duration,
    /// Time-to-live for cached resource contents.
    pub cache_ttl: Duration,
    /// Retry policy used by `call_tool_with_retry`.
    pub retry: RetryConfig,
    /// Resource content cache, shared process-wide by default.
    pub cache: Arc<ResourceCache>,
    /// Connectivity source, shared process-wide by default.
    pub monitor: NetworkMonitor,
    /// Optional started/finished hooks around tool calls.
    pub observer: Option<Arc<dyn ToolCallObserver>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "pocketmcp".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout: Duration::from_secs(30),
            cache_ttl: DEFAULT_TTL,
            retry: RetryConfig::default(),
            cache: ResourceCache::shared(),
            monitor: NetworkMonitor::global(),
            observer: None,
        }
    }
}

impl ClientConfig {
    /// Create a new default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset tuned for mobile shells: short timeout, patient retries.
    pub fn mobile() -> Self {
        Self::new()
            .request_timeout(Duration::from_secs(10))
            .retry(RetryConfig::new().max_attempts(3).linear(Duration::from_secs(1)))
    }

    /// Set the client name and version sent during the handshake.
    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_name = name.into();
        self.client_version = version.into();
        self
    }

    /// Set the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the cache TTL for resource reads.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Use a dedicated cache instead of the process-wide one.
    pub fn cache(mut self, cache: Arc<ResourceCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Use a dedicated connectivity monitor instead of the process-wide one.
    pub fn monitor(mut self, monitor: NetworkMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    /// Install started/finished hooks around tool calls.
    pub fn observer(mut self, observer: Arc<dyn ToolCallObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_name", &self.client_name)
            .field("client_version", &self.client_version)
            .field("request_timeout", &self.request_timeout)
            .field("cache_ttl", &self.cache_ttl)
            .field("retry", &self.retry)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
