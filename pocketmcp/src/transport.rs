//! Transport implementations.
//!
//! The client is transport-agnostic: it depends only on "send an envelope,
//! eventually receive the matching envelope or a transport-level failure".
//! Three implementations are provided: a spawned local process exchanging
//! line-delimited messages over its standard streams, an HTTP endpoint
//! receiving one POST per request (feature `http`), and an in-memory double
//! for tests.

use crate::error::{McpError, McpResult};
use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Trait for transport implementations.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for its matching response.
    async fn request(&self, request: &JsonRpcRequest) -> McpResult<JsonRpcResponse>;

    /// Send a notification (no response expected).
    async fn notify(&self, notification: &JsonRpcNotification) -> McpResult<()>;

    /// Close the transport. Pending requests fail with
    /// [`McpError::ConnectionClosed`].
    async fn close(&self) -> McpResult<()>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>;

/// Route a response to the caller whose correlation ID matches.
///
/// Duplicate or unmatched responses are dropped with a logged warning and
/// affect no pending caller. A matched entry is removed before delivery, so
/// a second response with the same ID is unmatched by construction.
fn route_response(pending: &PendingMap, response: JsonRpcResponse) {
    let id = match &response.id {
        RequestId::Number(n) if *n >= 0 => *n as u64,
        other => {
            warn!(id = ?other, "dropping response with unusable correlation id");
            return;
        }
    };

    let sender = pending.lock().remove(&id);
    match sender {
        Some(tx) => {
            if tx.send(response).is_err() {
                // Caller abandoned the request (cancellation or timeout).
                warn!(id, "dropping late response, caller is gone");
            }
        }
        None => warn!(id, "dropping response with no matching request"),
    }
}

/// Removes a pending correlation entry when the waiting caller goes away.
///
/// Held across the `rx.await`; if the caller is cancelled or times out, the
/// drop removes the entry and any late response is then treated as
/// unmatched by [`route_response`].
struct PendingSlot {
    pending: Arc<PendingMap>,
    id: u64,
}

impl PendingSlot {
    fn insert(pending: &Arc<PendingMap>, id: u64, tx: oneshot::Sender<JsonRpcResponse>) -> Self {
        pending.lock().insert(id, tx);
        Self {
            pending: pending.clone(),
            id,
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Stdio transport for locally spawned servers.
///
/// Exchanges newline-delimited JSON with a child process. A background
/// reader task routes responses to pending callers by correlation ID, so
/// multiple requests may be in flight at once and responses may arrive out
/// of order.
pub struct StdioTransport {
    child: Arc<tokio::sync::Mutex<Option<Child>>>,
    stdin: Arc<tokio::sync::Mutex<ChildStdin>>,
    pending: Arc<PendingMap>,
    connected: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Spawn a new process and connect via stdio.
    pub async fn spawn(command: &str, args: &[&str]) -> McpResult<Self> {
        Self::spawn_with_env(command, args, HashMap::new()).await
    }

    /// Spawn a new process with extra environment variables.
    ///
    /// The provided variables are merged over the parent environment.
    pub async fn spawn_with_env(
        command: &str,
        args: &[&str],
        env: HashMap<String, String>,
    ) -> McpResult<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| {
                McpError::TransportUnavailable(format!("failed to spawn {}: {}", command, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::TransportUnavailable("no stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::TransportUnavailable("no stdout".to_string()))?;

        let stderr = child.stderr.take();

        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::reader_task(
            stdout,
            pending.clone(),
            connected.clone(),
        ));

        // Some servers write diagnostics to stderr; drain it so the pipe
        // buffer never fills up and blocks the process.
        if let Some(stderr) = stderr {
            tokio::spawn(Self::stderr_drainer(stderr));
        }

        Ok(Self {
            child: Arc::new(tokio::sync::Mutex::new(Some(child))),
            stdin: Arc::new(tokio::sync::Mutex::new(stdin)),
            pending,
            connected,
        })
    }

    async fn reader_task(stdout: ChildStdout, pending: Arc<PendingMap>, connected: Arc<AtomicBool>) {
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                        Ok(response) => {
                            debug!(id = ?response.id, "response received");
                            route_response(&pending, response);
                        }
                        Err(err) => {
                            warn!(error = %err, "dropping malformed response line");
                        }
                    }
                }
                Err(_) => break,
            }
        }

        // Reader gone means no response can ever arrive; fail the waiters.
        connected.store(false, Ordering::SeqCst);
        pending.lock().clear();
    }

    async fn stderr_drainer(stderr: ChildStderr) {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }

    async fn send_raw(&self, data: &str) -> McpResult<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(data.as_bytes())
            .await
            .map_err(|e| McpError::TransportUnavailable(e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| McpError::TransportUnavailable(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::TransportUnavailable(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, request: &JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let id = match &request.id {
            RequestId::Number(n) if *n >= 0 => *n as u64,
            _ => {
                return Err(McpError::TransportUnavailable(
                    "stdio requires non-negative numeric correlation ids".to_string(),
                ));
            }
        };

        let (tx, rx) = oneshot::channel();
        let _slot = PendingSlot::insert(&self.pending, id, tx);

        let json = serde_json::to_string(request)?;
        self.send_raw(&json).await?;

        rx.await.map_err(|_| McpError::ConnectionClosed)
    }

    async fn notify(&self, notification: &JsonRpcNotification) -> McpResult<()> {
        let json = serde_json::to_string(notification)?;
        self.send_raw(&json).await
    }

    async fn close(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.pending.lock().clear();

        let mut child = self.child.lock().await;
        if let Some(mut c) = child.take() {
            c.kill().await.ok();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// HTTP transport for remote servers.
///
/// One POST per request; the pairing of request to response is the HTTP
/// exchange itself. Understands both plain JSON bodies and single-event
/// SSE bodies (`data:` line).
#[cfg(feature = "http")]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    session_id: Mutex<Option<String>>,
    connected: AtomicBool,
    custom_headers: HashMap<String, String>,
}

#[cfg(feature = "http")]
impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_headers(base_url, HashMap::new())
    }

    /// Create with custom headers (e.g. Authorization).
    pub fn with_headers(base_url: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            session_id: Mutex::new(None),
            connected: AtomicBool::new(true),
            custom_headers: headers,
        }
    }

    fn classify(err: reqwest::Error) -> McpError {
        if err.is_timeout() {
            McpError::Timeout
        } else {
            McpError::TransportUnavailable(err.to_string())
        }
    }

    async fn post<T: serde::Serialize>(&self, body: &T) -> McpResult<reqwest::Response> {
        let mut req = self
            .client
            .post(&self.base_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .json(body);

        for (key, value) in &self.custom_headers {
            req = req.header(key, value);
        }

        if let Some(id) = self.session_id.lock().clone() {
            req = req.header("Mcp-Session-Id", id);
        }

        let response = req.send().await.map_err(Self::classify)?;

        if let Some(id) = response.headers().get("Mcp-Session-Id") {
            if let Ok(id_str) = id.to_str() {
                *self.session_id.lock() = Some(id_str.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Http(status.as_u16()));
        }

        Ok(response)
    }
}

/// Extract the JSON body from a response that may be SSE-framed.
#[cfg(feature = "http")]
fn parse_sse_body(text: &str) -> McpResult<&str> {
    for line in text.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            return Ok(data);
        }
    }

    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return Ok(trimmed);
    }

    Err(McpError::TransportUnavailable(format!(
        "cannot parse response body: {}",
        text
    )))
}

#[cfg(feature = "http")]
#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, request: &JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let response = self.post(request).await?;
        let text = response.text().await.map_err(Self::classify)?;
        let body = parse_sse_body(&text)?;
        let envelope: JsonRpcResponse = serde_json::from_str(body)?;
        Ok(envelope)
    }

    async fn notify(&self, notification: &JsonRpcNotification) -> McpResult<()> {
        self.post(notification).await.map(|_| ())
    }

    async fn close(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Scripted reply for [`MemoryTransport`].
enum Scripted {
    /// Success result; the envelope echoes the request's correlation id.
    Result(serde_json::Value),
    /// Well-formed error envelope, echoing the request's correlation id.
    RemoteError(i32, String),
    /// Transport-level failure.
    Failure(McpError),
    /// A verbatim envelope, correlation id left untouched.
    Raw(JsonRpcResponse),
}

/// In-memory transport for tests.
///
/// Replies are scripted in FIFO order; requests and notifications are
/// recorded for assertions.
#[derive(Default)]
pub struct MemoryTransport {
    replies: Mutex<std::collections::VecDeque<Scripted>>,
    requests: Mutex<Vec<JsonRpcRequest>>,
    notifications: Mutex<Vec<JsonRpcNotification>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Create a new memory transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a success result for the next request.
    pub fn push_result(&self, result: impl serde::Serialize) {
        self.replies.lock().push_back(Scripted::Result(
            serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
        ));
    }

    /// Script a server error envelope for the next request.
    pub fn push_remote_error(&self, code: i32, message: impl Into<String>) {
        self.replies
            .lock()
            .push_back(Scripted::RemoteError(code, message.into()));
    }

    /// Script a transport-level failure for the next request.
    pub fn push_failure(&self, error: McpError) {
        self.replies.lock().push_back(Scripted::Failure(error));
    }

    /// Script a verbatim response envelope, correlation id included.
    pub fn push_raw(&self, response: JsonRpcResponse) {
        self.replies.lock().push_back(Scripted::Raw(response));
    }

    /// Requests recorded so far.
    pub fn requests(&self) -> Vec<JsonRpcRequest> {
        self.requests.lock().clone()
    }

    /// Notifications recorded so far.
    pub fn notifications(&self) -> Vec<JsonRpcNotification> {
        self.notifications.lock().clone()
    }
}

#[async_trait]
impl McpTransport for MemoryTransport {
    async fn request(&self, request: &JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        self.requests.lock().push(request.clone());

        let scripted = self.replies.lock().pop_front();
        match scripted {
            Some(Scripted::Result(value)) => {
                Ok(JsonRpcResponse::success(request.id.clone(), value))
            }
            Some(Scripted::RemoteError(code, message)) => {
                Ok(JsonRpcResponse::error(request.id.clone(), code, message))
            }
            Some(Scripted::Failure(error)) => Err(error),
            Some(Scripted::Raw(response)) => Ok(response),
            None => Err(McpError::ConnectionClosed),
        }
    }

    async fn notify(&self, notification: &JsonRpcNotification) -> McpResult<()> {
        self.notifications.lock().push(notification.clone());
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_matched_response() {
        let pending: PendingMap = Mutex::new(HashMap::new());
        let (tx, rx) = oneshot::channel();
        pending.lock().insert(1, tx);

        route_response(&pending, JsonRpcResponse::success(1, "ok"));

        let delivered = rx.blocking_recv().unwrap();
        assert!(!delivered.is_error());
        assert!(pending.lock().is_empty());
    }

    #[test]
    fn test_route_unmatched_response_affects_no_caller() {
        let pending: PendingMap = Mutex::new(HashMap::new());
        let (tx, mut rx) = oneshot::channel();
        pending.lock().insert(1, tx);

        // Spurious id: dropped, the pending caller stays pending.
        route_response(&pending, JsonRpcResponse::success(99, "spurious"));

        assert!(rx.try_recv().is_err());
        assert!(pending.lock().contains_key(&1));
    }

    #[test]
    fn test_route_duplicate_response_dropped() {
        let pending: PendingMap = Mutex::new(HashMap::new());
        let (tx, rx) = oneshot::channel();
        pending.lock().insert(7, tx);

        route_response(&pending, JsonRpcResponse::success(7, "first"));
        // Entry was removed on delivery, so the duplicate is unmatched.
        route_response(&pending, JsonRpcResponse::success(7, "second"));

        let delivered = rx.blocking_recv().unwrap();
        assert_eq!(delivered.result.unwrap(), serde_json::json!("first"));
    }

    #[test]
    fn test_route_response_to_cancelled_caller() {
        let pending: PendingMap = Mutex::new(HashMap::new());
        let (tx, rx) = oneshot::channel();
        pending.lock().insert(3, tx);
        drop(rx);

        // Must not panic; the late response is logged and discarded.
        route_response(&pending, JsonRpcResponse::success(3, "late"));
        assert!(pending.lock().is_empty());
    }

    #[test]
    fn test_pending_slot_removes_entry_on_drop() {
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let (tx, _rx) = oneshot::channel();

        let slot = PendingSlot::insert(&pending, 5, tx);
        assert!(pending.lock().contains_key(&5));

        drop(slot);
        assert!(!pending.lock().contains_key(&5));
    }

    #[tokio::test]
    async fn test_memory_transport_scripted_replies() {
        let transport = MemoryTransport::new();
        transport.push_result(serde_json::json!({"ok": true}));
        transport.push_remote_error(-32601, "unknown tool");
        transport.push_failure(McpError::Timeout);

        let req = JsonRpcRequest::new(10, "tools/call");
        let resp = transport.request(&req).await.unwrap();
        assert_eq!(resp.id, RequestId::Number(10));
        assert!(!resp.is_error());

        let resp = transport.request(&req).await.unwrap();
        assert!(resp.is_error());

        let err = transport.request(&req).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout));

        // Exhausted script behaves like a dropped connection.
        let err = transport.request(&req).await.unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed));

        assert_eq!(transport.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_memory_transport_records_notifications() {
        let transport = MemoryTransport::new();
        let notification = JsonRpcNotification::new("notifications/initialized");
        transport.notify(&notification).await.unwrap();

        assert_eq!(transport.notifications().len(), 1);
        assert_eq!(
            transport.notifications()[0].method,
            "notifications/initialized"
        );
    }

    #[tokio::test]
    async fn test_memory_transport_close() {
        let transport = MemoryTransport::new();
        assert!(transport.is_connected());

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_parse_sse_body() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        assert!(parse_sse_body(body).unwrap().starts_with('{'));

        let plain = "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}";
        assert_eq!(parse_sse_body(plain).unwrap(), plain);

        assert!(parse_sse_body("not json").is_err());
    }
}
