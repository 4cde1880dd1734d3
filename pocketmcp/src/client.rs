//! The protocol client.
//!
//! [`McpClient`] translates the six host-facing operations (`connect`,
//! `list_tools`, `list_resources`, `read_resource`, `call_tool`,
//! `disconnect`) into correlated request/response exchanges over an
//! injected transport, with timeout, retry, and caching policy layered on
//! top. Hosts never see correlation ids, transport details, or cache
//! internals.

use crate::config::ClientConfig;
use crate::error::{McpError, McpResult};
use crate::transport::McpTransport;
use crate::types::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, ListResourcesResult, ListToolsResult, ReadResourceParams,
    ReadResourceResult, Resource, ServerCapabilities, Tool, PROTOCOL_VERSION,
};
use parking_lot::Mutex;
use pocketmcp_retries::with_retry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport. Initial state, and the result of `disconnect()`.
    Disconnected,
    /// Transport is being opened.
    Connecting,
    /// Transport established, initialize handshake in flight.
    Initializing,
    /// Handshake complete; all operations permitted.
    Ready,
    /// Unrecoverable failure; only a fresh `connect()` leaves this state.
    Failed,
}

/// One logical connected lifetime against a server.
#[derive(Debug, Clone)]
pub struct Session {
    /// Protocol version the server settled on.
    pub protocol_version: String,
    /// Server-advertised capability set.
    pub capabilities: ServerCapabilities,
    /// Server implementation info.
    pub server_info: Implementation,
}

/// Where and how to reach a server.
pub enum ServerDescriptor {
    /// Spawn a local process and talk over its standard streams.
    Stdio {
        /// Command to run.
        command: String,
        /// Command arguments.
        args: Vec<String>,
        /// Extra environment variables for the child.
        env: HashMap<String, String>,
    },
    /// POST each request to an HTTP endpoint.
    #[cfg(feature = "http")]
    Http {
        /// Endpoint URL.
        url: String,
        /// Extra headers (e.g. Authorization).
        headers: HashMap<String, String>,
    },
    /// Use an already-constructed transport.
    InProcess(Arc<dyn McpTransport>),
}

impl ServerDescriptor {
    /// Describe a stdio server.
    pub fn stdio(command: impl Into<String>, args: &[&str]) -> Self {
        Self::Stdio {
            command: command.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
        }
    }

    /// Describe an HTTP server.
    #[cfg(feature = "http")]
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    /// Wrap an in-process transport.
    pub fn in_process(transport: Arc<dyn McpTransport>) -> Self {
        Self::InProcess(transport)
    }
}

impl std::fmt::Debug for ServerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio { command, args, .. } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .finish(),
            #[cfg(feature = "http")]
            Self::Http { url, .. } => f.debug_struct("Http").field("url", url).finish(),
            Self::InProcess(_) => f.write_str("InProcess"),
        }
    }
}

/// Started/finished hooks fired around each tool call.
///
/// Hosts use these to drive loading indicators. The finished hook fires
/// exactly once per call, success or failure, before any error propagates.
pub trait ToolCallObserver: Send + Sync {
    /// A tool call is about to be sent.
    fn call_started(&self, tool: &str);
    /// The tool call's exchange has completed, successfully or not.
    fn call_finished(&self, tool: &str);
}

/// Protocol client for one server session.
///
/// # Example
///
/// ```ignore
/// use pocketmcp::{ClientConfig, McpClient, ServerDescriptor};
///
/// let client = McpClient::new(ClientConfig::default());
/// client.connect(ServerDescriptor::stdio("demo-server", &[])).await?;
///
/// let tools = client.list_tools().await?;
/// let result = client
///     .call_tool("read_file", serde_json::json!({"path": "a.txt"}))
///     .await?;
///
/// client.disconnect().await?;
/// ```
pub struct McpClient {
    config: ClientConfig,
    transport: Mutex<Option<Arc<dyn McpTransport>>>,
    state: Mutex<SessionState>,
    session: Mutex<Option<Session>>,
    next_id: AtomicI64,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("session", &self.session())
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Create a new, disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: Mutex::new(None),
            state: Mutex::new(SessionState::Disconnected),
            session: Mutex::new(None),
            next_id: AtomicI64::new(1),
        }
    }

    /// Create a client with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ClientConfig::default())
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether the client is ready for calls.
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// The current session, if ready.
    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Open the described transport, run the initialize handshake, and
    /// enter the ready state.
    ///
    /// Permitted from `Disconnected` and `Failed`; a fresh connect restarts
    /// the state machine.
    pub async fn connect(&self, descriptor: ServerDescriptor) -> McpResult<Session> {
        {
            let mut state = self.state.lock();
            match *state {
                SessionState::Disconnected | SessionState::Failed => {
                    *state = SessionState::Connecting;
                }
                other => {
                    return Err(McpError::Other(format!(
                        "connect() is not permitted in the {:?} state",
                        other
                    )));
                }
            }
        }

        match self.connect_inner(descriptor).await {
            Ok(session) => Ok(session),
            Err(err) => {
                *self.state.lock() = SessionState::Failed;
                Err(err)
            }
        }
    }

    async fn connect_inner(&self, descriptor: ServerDescriptor) -> McpResult<Session> {
        let transport = Self::open_transport(descriptor).await?;
        *self.state.lock() = SessionState::Initializing;

        let params = InitializeParams::new(Implementation::new(
            &self.config.client_name,
            &self.config.client_version,
        ));

        let result: InitializeResult = match self.request_on(&transport, "initialize", params).await
        {
            Ok(result) => result,
            Err(McpError::Remote { code, message }) => {
                transport.close().await.ok();
                return Err(McpError::HandshakeRejected(format!(
                    "{} (code {})",
                    message, code
                )));
            }
            Err(err) => {
                transport.close().await.ok();
                return Err(err);
            }
        };

        if result.protocol_version != PROTOCOL_VERSION {
            transport.close().await.ok();
            return Err(McpError::HandshakeRejected(format!(
                "unsupported protocol version {}",
                result.protocol_version
            )));
        }

        transport
            .notify(&JsonRpcNotification::new("notifications/initialized"))
            .await?;

        let session = Session {
            protocol_version: result.protocol_version,
            capabilities: result.capabilities,
            server_info: result.server_info,
        };

        *self.transport.lock() = Some(transport);
        *self.session.lock() = Some(session.clone());
        *self.state.lock() = SessionState::Ready;

        info!(
            server = %session.server_info.name,
            version = %session.protocol_version,
            "session ready"
        );

        Ok(session)
    }

    async fn open_transport(descriptor: ServerDescriptor) -> McpResult<Arc<dyn McpTransport>> {
        match descriptor {
            ServerDescriptor::Stdio { command, args, env } => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                let transport =
                    crate::transport::StdioTransport::spawn_with_env(&command, &args, env).await?;
                Ok(Arc::new(transport))
            }
            #[cfg(feature = "http")]
            ServerDescriptor::Http { url, headers } => Ok(Arc::new(
                crate::transport::HttpTransport::with_headers(url, headers),
            )),
            ServerDescriptor::InProcess(transport) => Ok(transport),
        }
    }

    /// Close the transport and return to the disconnected state.
    ///
    /// Session data is dropped; the process-wide resource content cache is
    /// not, it outlives individual sessions.
    pub async fn disconnect(&self) -> McpResult<()> {
        let transport = self.transport.lock().take();
        *self.session.lock() = None;
        *self.state.lock() = SessionState::Disconnected;

        if let Some(transport) = transport {
            transport.close().await?;
        }

        info!("session disconnected");
        Ok(())
    }

    // ========================================================================
    // Tools
    // ========================================================================

    /// List the server's tools, verbatim and in the order received.
    ///
    /// Never cached: per-call freshness is assumed cheap.
    pub async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        let transport = self.ensure_ready()?;
        let result: ListToolsResult = self
            .request_on(&transport, "tools/list", JsonValue::Null)
            .await?;
        Ok(result.tools)
    }

    /// Invoke a tool. Never cached: tool calls may have side effects.
    pub async fn call_tool(&self, name: &str, arguments: JsonValue) -> McpResult<CallToolResult> {
        let transport = self.ensure_ready()?;

        if let Some(observer) = &self.config.observer {
            observer.call_started(name);
        }

        let result = self
            .request_on(&transport, "tools/call", CallToolParams::new(name, arguments))
            .await;

        // Fires exactly once per call, on error too, before propagation.
        if let Some(observer) = &self.config.observer {
            observer.call_finished(name);
        }

        result
    }

    /// Invoke a tool, retrying transport-class failures up to
    /// `max_attempts` times in total.
    ///
    /// Server answers such as "unknown tool" are terminal on first
    /// occurrence. The delay before attempt `k` is the configured retry
    /// base delay times `k`; the first success short-circuits, and
    /// exhausting the budget returns the last observed error.
    pub async fn call_tool_with_retry(
        &self,
        name: &str,
        arguments: JsonValue,
        max_attempts: u32,
    ) -> McpResult<CallToolResult> {
        let retry = self.config.retry.clone().max_attempts(max_attempts);
        with_retry(&retry, || self.call_tool(name, arguments.clone())).await
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// List the server's resources, verbatim and in the order received.
    pub async fn list_resources(&self) -> McpResult<Vec<Resource>> {
        let transport = self.ensure_ready()?;
        let result: ListResourcesResult = self
            .request_on(&transport, "resources/list", JsonValue::Null)
            .await?;
        Ok(result.resources)
    }

    /// Read a resource, serving fresh cache entries without a network
    /// call and storing fetched content under the configured TTL.
    ///
    /// While offline, this degrades to "cache or fail": a miss returns
    /// [`McpError::NetworkUnavailable`] immediately, with no network call
    /// and no retry.
    pub async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        self.read_resource_inner(uri, true).await
    }

    /// Read a resource bypassing the cache entirely: no lookup, no store.
    pub async fn read_resource_fresh(&self, uri: &str) -> McpResult<ReadResourceResult> {
        self.read_resource_inner(uri, false).await
    }

    async fn read_resource_inner(&self, uri: &str, use_cache: bool) -> McpResult<ReadResourceResult> {
        let transport = self.ensure_ready()?;

        if use_cache {
            if let Some(hit) = self.config.cache.get(uri) {
                debug!(uri, "resource served from cache");
                return Ok(hit);
            }
        }

        if !self.config.monitor.is_online() {
            return Err(McpError::NetworkUnavailable);
        }

        let result: ReadResourceResult = self
            .request_on(
                &transport,
                "resources/read",
                ReadResourceParams {
                    uri: uri.to_string(),
                },
            )
            .await?;

        if use_cache {
            self.config
                .cache
                .insert(uri, result.clone(), self.config.cache_ttl);
        }

        Ok(result)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn ensure_ready(&self) -> McpResult<Arc<dyn McpTransport>> {
        if *self.state.lock() != SessionState::Ready {
            return Err(McpError::NotConnected);
        }
        self.transport.lock().clone().ok_or(McpError::NotConnected)
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn request_on<P: Serialize, R: DeserializeOwned>(
        &self,
        transport: &Arc<dyn McpTransport>,
        method: &str,
        params: P,
    ) -> McpResult<R> {
        let request = JsonRpcRequest::new(self.next_id(), method).with_params(params);
        debug!(id = ?request.id, method, "sending request");

        let response = match timeout(self.config.request_timeout, transport.request(&request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                if matches!(err, McpError::ConnectionClosed) {
                    warn!(error = %err, "transport lost, session marked failed");
                    *self.state.lock() = SessionState::Failed;
                }
                return Err(err);
            }
            // The dropped request future removes its correlation entry; a
            // late response is then unmatched and dropped at the routing
            // layer.
            Err(_) => return Err(McpError::Timeout),
        };

        if response.id != request.id {
            warn!(
                expected = ?request.id,
                received = ?response.id,
                "dropping response with mismatched correlation id"
            );
            return Err(McpError::ConnectionClosed);
        }

        if let Some(error) = response.error {
            return Err(McpError::from(error));
        }

        let result = response.result.ok_or(McpError::MissingResult)?;
        Ok(serde_json::from_value(result)?)
    }
}

/// Builder for creating and connecting clients.
///
/// # Example
///
/// ```ignore
/// use pocketmcp::McpClientBuilder;
///
/// let client = McpClientBuilder::new()
///     .command("npx")
///     .args(["-y", "@modelcontextprotocol/server-filesystem"])
///     .connect()
///     .await?;
/// ```
pub struct McpClientBuilder {
    config: ClientConfig,
    command: Option<String>,
    args: Vec<String>,
    env: HashMap<String, String>,
    #[cfg(feature = "http")]
    url: Option<String>,
    #[cfg(feature = "http")]
    headers: HashMap<String, String>,
}

impl Default for McpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl McpClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            #[cfg(feature = "http")]
            url: None,
            #[cfg(feature = "http")]
            headers: HashMap::new(),
        }
    }

    /// Use a specific configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the command for a stdio server.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Add an argument for the stdio command.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments for the stdio command.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the spawned server.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the URL for an HTTP server.
    #[cfg(feature = "http")]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Add a header for HTTP requests.
    #[cfg(feature = "http")]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Build the client and connect it.
    pub async fn connect(self) -> McpResult<McpClient> {
        #[cfg(feature = "http")]
        if let Some(url) = self.url {
            let client = McpClient::new(self.config);
            client
                .connect(ServerDescriptor::Http {
                    url,
                    headers: self.headers,
                })
                .await?;
            return Ok(client);
        }

        if let Some(command) = self.command {
            let client = McpClient::new(self.config);
            client
                .connect(ServerDescriptor::Stdio {
                    command,
                    args: self.args,
                    env: self.env,
                })
                .await?;
            return Ok(client);
        }

        Err(McpError::Other("no transport configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResourceCache;
    use crate::connectivity::NetworkMonitor;
    use crate::transport::MemoryTransport;
    use crate::types::{JsonRpcResponse, ResourceContent};
    use async_trait::async_trait;
    use pocketmcp_retries::RetryConfig;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::time::Instant;

    fn init_result() -> InitializeResult {
        InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: Implementation::new("demo-server", "1.0.0"),
            instructions: None,
        }
    }

    fn read_result(uri: &str, text: &str) -> ReadResourceResult {
        ReadResourceResult {
            contents: vec![ResourceContent::text(uri, text)],
        }
    }

    fn isolated_config() -> ClientConfig {
        ClientConfig::new()
            .cache(Arc::new(ResourceCache::new()))
            .monitor(NetworkMonitor::new())
            .retry(RetryConfig::new().linear(Duration::from_secs(1)))
    }

    async fn connected(transport: &Arc<MemoryTransport>, config: ClientConfig) -> McpClient {
        transport.push_result(init_result());
        let client = McpClient::new(config);
        client
            .connect(ServerDescriptor::in_process(transport.clone()))
            .await
            .unwrap();
        client
    }

    fn method_count(transport: &MemoryTransport, method: &str) -> usize {
        transport
            .requests()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    struct NeverTransport;

    #[async_trait]
    impl McpTransport for NeverTransport {
        async fn request(&self, _request: &JsonRpcRequest) -> McpResult<JsonRpcResponse> {
            std::future::pending().await
        }

        async fn notify(&self, _notification: &JsonRpcNotification) -> McpResult<()> {
            Ok(())
        }

        async fn close(&self) -> McpResult<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        started: AtomicU32,
        finished: AtomicU32,
    }

    impl ToolCallObserver for CountingObserver {
        fn call_started(&self, _tool: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn call_finished(&self, _tool: &str) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_calls_before_connect_fail() {
        let client = McpClient::new(isolated_config());

        assert!(matches!(
            client.list_tools().await,
            Err(McpError::NotConnected)
        ));
        assert!(matches!(
            client.list_resources().await,
            Err(McpError::NotConnected)
        ));
        assert!(matches!(
            client.read_resource("file:///a.txt").await,
            Err(McpError::NotConnected)
        ));
        assert!(matches!(
            client.call_tool("read_file", JsonValue::Null).await,
            Err(McpError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_reaches_ready() {
        let transport = Arc::new(MemoryTransport::new());
        let client = connected(&transport, isolated_config()).await;

        assert_eq!(client.state(), SessionState::Ready);
        let session = client.session().unwrap();
        assert_eq!(session.server_info.name, "demo-server");
        assert_eq!(session.protocol_version, PROTOCOL_VERSION);

        // Handshake completion is announced to the server.
        assert_eq!(
            transport.notifications()[0].method,
            "notifications/initialized"
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_version_mismatch() {
        let transport = Arc::new(MemoryTransport::new());
        let mut result = init_result();
        result.protocol_version = "1999-01-01".to_string();
        transport.push_result(result);

        let client = McpClient::new(isolated_config());
        let err = client
            .connect(ServerDescriptor::in_process(transport.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::HandshakeRejected(_)));
        assert_eq!(client.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_connect_maps_server_error_to_handshake_rejected() {
        let transport = Arc::new(MemoryTransport::new());
        transport.push_remote_error(-32600, "unsupported client");

        let client = McpClient::new(isolated_config());
        let err = client
            .connect(ServerDescriptor::in_process(transport.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::HandshakeRejected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out() {
        let client = McpClient::new(isolated_config());
        let err = client
            .connect(ServerDescriptor::in_process(Arc::new(NeverTransport)))
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::Timeout));
        assert_eq!(client.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_connect_permitted_again_after_failure() {
        let transport = Arc::new(MemoryTransport::new());
        transport.push_remote_error(-32600, "nope");

        let client = McpClient::new(isolated_config());
        let _ = client
            .connect(ServerDescriptor::in_process(transport.clone()))
            .await;
        assert_eq!(client.state(), SessionState::Failed);

        transport.push_result(init_result());
        client
            .connect(ServerDescriptor::in_process(transport.clone()))
            .await
            .unwrap();
        assert_eq!(client.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_connect_while_ready_is_rejected() {
        let transport = Arc::new(MemoryTransport::new());
        let client = connected(&transport, isolated_config()).await;

        let err = client
            .connect(ServerDescriptor::in_process(transport.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Other(_)));
        assert_eq!(client.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_correlation_ids_are_unique_and_increasing() {
        let transport = Arc::new(MemoryTransport::new());
        let client = connected(&transport, isolated_config()).await;

        transport.push_result(ListToolsResult {
            tools: vec![],
            next_cursor: None,
        });
        transport.push_result(ListToolsResult {
            tools: vec![],
            next_cursor: None,
        });
        client.list_tools().await.unwrap();
        client.list_tools().await.unwrap();

        let ids: Vec<i64> = transport
            .requests()
            .iter()
            .map(|r| match &r.id {
                crate::types::RequestId::Number(n) => *n,
                other => panic!("expected numeric id, got {:?}", other),
            })
            .collect();

        // Strictly increasing implies never reused.
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_mismatched_correlation_id_is_not_delivered() {
        let transport = Arc::new(MemoryTransport::new());
        let client = connected(&transport, isolated_config()).await;

        transport.push_raw(JsonRpcResponse::success(9999, "spurious"));
        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_read_resource_caches_within_ttl() {
        let transport = Arc::new(MemoryTransport::new());
        let client = connected(&transport, isolated_config()).await;

        transport.push_result(read_result("file:///a.txt", "hello"));

        let first = client.read_resource("file:///a.txt").await.unwrap();
        let second = client.read_resource("file:///a.txt").await.unwrap();

        assert_eq!(first.contents[0].text, second.contents[0].text);
        // Second read was a cache hit: exactly one network call.
        assert_eq!(method_count(&transport, "resources/read"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_resource_refetches_after_ttl() {
        let transport = Arc::new(MemoryTransport::new());
        let client = connected(&transport, isolated_config()).await;

        transport.push_result(read_result("file:///a.txt", "v1"));
        transport.push_result(read_result("file:///a.txt", "v2"));

        client.read_resource("file:///a.txt").await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;

        let refreshed = client.read_resource("file:///a.txt").await.unwrap();
        assert_eq!(refreshed.contents[0].text.as_deref(), Some("v2"));
        assert_eq!(method_count(&transport, "resources/read"), 2);
    }

    #[tokio::test]
    async fn test_read_resource_fresh_bypasses_cache() {
        let transport = Arc::new(MemoryTransport::new());
        let config = isolated_config();
        let cache = config.cache.clone();
        let client = connected(&transport, config).await;

        transport.push_result(read_result("file:///a.txt", "v1"));
        transport.push_result(read_result("file:///a.txt", "v2"));

        client.read_resource("file:///a.txt").await.unwrap();
        let fresh = client.read_resource_fresh("file:///a.txt").await.unwrap();

        assert_eq!(fresh.contents[0].text.as_deref(), Some("v2"));
        assert_eq!(method_count(&transport, "resources/read"), 2);
        // The bypassing read did not disturb the cached copy.
        let cached = cache.get("file:///a.txt").unwrap();
        assert_eq!(cached.contents[0].text.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_offline_miss_fails_without_network_call() {
        let transport = Arc::new(MemoryTransport::new());
        let config = isolated_config();
        let monitor = config.monitor.clone();
        let client = connected(&transport, config).await;

        monitor.set_online(false);

        let err = client.read_resource("file:///a.txt").await.unwrap_err();
        assert!(matches!(err, McpError::NetworkUnavailable));
        assert_eq!(method_count(&transport, "resources/read"), 0);
    }

    #[tokio::test]
    async fn test_offline_hit_serves_cache() {
        let transport = Arc::new(MemoryTransport::new());
        let config = isolated_config();
        let monitor = config.monitor.clone();
        let client = connected(&transport, config).await;

        transport.push_result(read_result("file:///a.txt", "hello"));
        client.read_resource("file:///a.txt").await.unwrap();

        monitor.set_online(false);

        let hit = client.read_resource("file:///a.txt").await.unwrap();
        assert_eq!(hit.contents[0].text.as_deref(), Some("hello"));
        assert_eq!(method_count(&transport, "resources/read"), 1);
    }

    #[tokio::test]
    async fn test_call_tool_observer_fires_on_success_and_failure() {
        let transport = Arc::new(MemoryTransport::new());
        let observer = Arc::new(CountingObserver::default());
        let config = isolated_config().observer(observer.clone());
        let client = connected(&transport, config).await;

        transport.push_result(CallToolResult::text("ok"));
        client.call_tool("read_file", JsonValue::Null).await.unwrap();

        transport.push_failure(McpError::TransportUnavailable("boom".to_string()));
        client
            .call_tool("read_file", JsonValue::Null)
            .await
            .unwrap_err();

        // Finished fired exactly once per call, the failed one included.
        assert_eq!(observer.started.load(Ordering::SeqCst), 2);
        assert_eq!(observer.finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_observer_silent_when_not_connected() {
        let observer = Arc::new(CountingObserver::default());
        let client = McpClient::new(isolated_config().observer(observer.clone()));

        let _ = client.call_tool("read_file", JsonValue::Null).await;

        // No exchange happened, so no signals.
        assert_eq!(observer.started.load(Ordering::SeqCst), 0);
        assert_eq!(observer.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_failures() {
        let transport = Arc::new(MemoryTransport::new());
        let client = connected(&transport, isolated_config()).await;

        transport.push_failure(McpError::TransportUnavailable("drop 1".to_string()));
        transport.push_failure(McpError::TransportUnavailable("drop 2".to_string()));
        transport.push_result(CallToolResult::text("ok"));

        let started = Instant::now();
        let result = client
            .call_tool_with_retry("read_file", JsonValue::Null, 3)
            .await
            .unwrap();

        assert!(!result.is_error);
        assert_eq!(method_count(&transport, "tools/call"), 3);
        // Linear backoff: base*2 before attempt 2, base*3 before attempt 3.
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_stops_on_remote_error() {
        let transport = Arc::new(MemoryTransport::new());
        let client = connected(&transport, isolated_config()).await;

        transport.push_remote_error(-32601, "unknown tool");

        let err = client
            .call_tool_with_retry("nope", JsonValue::Null, 3)
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::Remote { code: -32601, .. }));
        assert_eq!(method_count(&transport, "tools/call"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_last_error_on_exhaustion() {
        let transport = Arc::new(MemoryTransport::new());
        let client = connected(&transport, isolated_config()).await;

        transport.push_failure(McpError::TransportUnavailable("drop 1".to_string()));
        transport.push_failure(McpError::TransportUnavailable("drop 2".to_string()));

        let err = client
            .call_tool_with_retry("read_file", JsonValue::Null, 2)
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::TransportUnavailable(msg) if msg == "drop 2"));
        assert_eq!(method_count(&transport, "tools/call"), 2);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_content_cache() {
        let transport = Arc::new(MemoryTransport::new());
        let config = isolated_config();
        let cache = config.cache.clone();
        let client = connected(&transport, config).await;

        transport.push_result(read_result("file:///a.txt", "hello"));
        client.read_resource("file:///a.txt").await.unwrap();

        client.disconnect().await.unwrap();

        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(client.session().is_none());
        // The URI content cache is process-wide and outlives the session.
        assert!(cache.get("file:///a.txt").is_some());
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let transport = Arc::new(MemoryTransport::new());
        let client = connected(&transport, isolated_config()).await;

        transport.push_result(ListToolsResult {
            tools: vec![Tool::new(
                "read_file",
                serde_json::json!({"type": "object"}),
            )],
            next_cursor: None,
        });
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "read_file");

        transport.push_result(CallToolResult::text("file content"));
        let result = client
            .call_tool("read_file", serde_json::json!({"path": "a.txt"}))
            .await
            .unwrap();
        assert!(
            matches!(&result.content[0], crate::types::ToolResultContent::Text { text } if text == "file content")
        );

        client.disconnect().await.unwrap();
        assert_eq!(client.state(), SessionState::Disconnected);

        assert!(matches!(
            client.list_tools().await,
            Err(McpError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_list_resources() {
        let transport = Arc::new(MemoryTransport::new());
        let client = connected(&transport, isolated_config()).await;

        transport.push_result(ListResourcesResult {
            resources: vec![Resource {
                uri: "file:///a.txt".to_string(),
                name: "a.txt".to_string(),
                description: None,
                mime_type: Some("text/plain".to_string()),
            }],
            next_cursor: None,
        });

        let resources = client.list_resources().await.unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].uri, "file:///a.txt");
    }

    #[tokio::test]
    async fn test_builder_requires_a_transport() {
        let err = McpClientBuilder::new().connect().await.unwrap_err();
        assert!(matches!(err, McpError::Other(_)));
    }
}
