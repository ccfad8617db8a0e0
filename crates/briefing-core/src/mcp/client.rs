//! MCP session bound to one worker
//!
//! Handles JSON-RPC communication with a single worker.
//! Uses a background receive loop that matches responses to requests by id.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use super::protocol::{
    ClientInfo, InitializeParams, InitializeResult, McpError, McpNotification, McpReply,
    McpRequest, McpResponse, ResourceDescriptor, ResourceReadParams, ResourceReadResult,
    ResourceResult, ResourcesListResult, ServerCapabilities, ServerInfo, ToolCallParams,
    ToolCallResult,
    ToolDescriptor, ToolResult, ToolsListResult,
};
use super::transport::StdioTransport;
use crate::constants::mcp::{CLIENT_NAME, PROTOCOL_VERSION};
use crate::error::SessionError;
use crate::process::WorkerStdio;
use crate::tools::ToolProvider;

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value, SessionError>>>>>;

/// Protocol client for one worker, valid after a successful handshake
pub struct McpSession {
    name: String,
    transport: Arc<StdioTransport>,
    next_id: AtomicI64,
    pending: PendingMap,
    tools: RwLock<Vec<ToolDescriptor>>,
    resources: RwLock<Vec<ResourceDescriptor>>,
    server_info: RwLock<Option<ServerInfo>>,
    capabilities: RwLock<ServerCapabilities>,
    protocol_version: RwLock<Option<String>>,
    timeout: Duration,
    alive: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl McpSession {
    /// Attach to a running worker's pipes and complete the handshake
    pub async fn connect(
        name: &str,
        stdio: WorkerStdio,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let transport = StdioTransport::from_worker(name, stdio);
        Self::connect_transport(name, transport, timeout).await
    }

    /// Handshake over arbitrary byte streams
    pub async fn connect_with<R, W>(
        name: &str,
        reader: R,
        writer: W,
        timeout: Duration,
    ) -> Result<Self, SessionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let transport = StdioTransport::new(name, reader, writer);
        Self::connect_transport(name, transport, timeout).await
    }

    async fn connect_transport(
        name: &str,
        transport: StdioTransport,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        info!(worker = %name, "Connecting session");

        let session = Self::open(name, transport, timeout);

        if let Err(e) = session.initialize().await {
            error!(worker = %name, error = %e, "Handshake failed");
            session.disconnect().await;
            return Err(SessionError::Connect {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }

        if let Err(e) = session.list_tools().await {
            error!(worker = %name, error = %e, "Tool listing failed");
            session.disconnect().await;
            return Err(SessionError::Connect {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }

        session.list_resources().await;

        info!(
            worker = %name,
            tools = session.tools.read().len(),
            resources = session.resources.read().len(),
            "Session connected"
        );
        Ok(session)
    }

    /// Start the receive loop; no handshake yet
    fn open(name: &str, transport: StdioTransport, timeout: Duration) -> Self {
        let transport = Arc::new(transport);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let recv_transport = Arc::clone(&transport);
        let recv_pending = Arc::clone(&pending);
        let recv_alive = Arc::clone(&alive);
        let recv_name = name.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(worker = %recv_name, "Receive loop shutting down");
                        break;
                    }
                    result = recv_transport.receive() => {
                        match result {
                            Ok(message) => {
                                handle_message(&recv_name, &message, &recv_pending, &recv_transport).await;
                            }
                            Err(e) => {
                                warn!(worker = %recv_name, error = %e, "Receive loop ended");
                                break;
                            }
                        }
                    }
                }
            }

            recv_alive.store(false, Ordering::SeqCst);
            let mut pending = recv_pending.lock().await;
            for (_, tx) in pending.drain() {
                let _ = tx.send(Err(SessionError::Transport("Connection lost".to_string())));
            }
        });

        Self {
            name: name.to_string(),
            transport,
            next_id: AtomicI64::new(1),
            pending,
            tools: RwLock::new(Vec::new()),
            resources: RwLock::new(Vec::new()),
            server_info: RwLock::new(None),
            capabilities: RwLock::new(ServerCapabilities::default()),
            protocol_version: RwLock::new(None),
            timeout,
            alive,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        }
    }

    async fn initialize(&self) -> Result<(), SessionError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: ClientInfo {
                name: CLIENT_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result: InitializeResult = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;

        info!(
            worker = %self.name,
            protocol = ?result.protocol_version,
            peer = ?result.server_info.as_ref().map(|s| s.name.as_str()),
            "Handshake complete"
        );

        *self.server_info.write() = result.server_info;
        *self.capabilities.write() = result.capabilities;
        *self.protocol_version.write() = result.protocol_version;

        self.notify("notifications/initialized", None).await
    }

    /// Query the tool catalog and cache it
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
        let result: ToolsListResult = self.request("tools/list", None).await?;
        info!(worker = %self.name, "Worker has {} tools", result.tools.len());

        for tool in &result.tools {
            debug!(worker = %self.name, tool = %tool.name, schema = ?tool.input_schema, "Tool listed");
        }

        *self.tools.write() = result.tools.clone();
        Ok(result.tools)
    }

    /// Query resources. Workers that did not advertise resources, or reject
    /// the listing, yield an empty list.
    pub async fn list_resources(&self) -> Vec<ResourceDescriptor> {
        if self.capabilities.read().resources.is_none() {
            debug!(worker = %self.name, "Worker does not advertise resources");
            *self.resources.write() = Vec::new();
            return Vec::new();
        }

        let resources = match self
            .request::<ResourcesListResult>("resources/list", None)
            .await
        {
            Ok(result) => {
                info!(worker = %self.name, "Worker has {} resources", result.resources.len());
                result.resources
            }
            Err(e) if e.is_method_not_found() => {
                debug!(worker = %self.name, "Worker does not support resources/list");
                Vec::new()
            }
            Err(e) => {
                warn!(worker = %self.name, error = %e, "Resource listing failed");
                Vec::new()
            }
        };

        *self.resources.write() = resources.clone();
        resources
    }

    /// Re-query tools and resources
    pub async fn refresh_capabilities(&self) -> Result<(), SessionError> {
        self.list_tools().await?;
        self.list_resources().await;
        Ok(())
    }

    /// Call a tool. Peer-reported failures come back as `success = false`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, SessionError> {
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };

        info!(worker = %self.name, tool = %name, "Calling tool");

        match self
            .request::<ToolCallResult>("tools/call", Some(serde_json::to_value(params)?))
            .await
        {
            Ok(result) => {
                debug!(
                    worker = %self.name,
                    tool = %name,
                    blocks = result.content.len(),
                    is_error = result.is_error,
                    "Tool returned"
                );
                Ok(result.into())
            }
            Err(SessionError::Rpc { code, message }) => {
                warn!(worker = %self.name, tool = %name, code, "Tool call rejected: {}", message);
                Ok(ToolResult::failure(message))
            }
            Err(e) => Err(e),
        }
    }

    /// Read a resource. Peers that reject the read yield `success = false`.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceResult, SessionError> {
        info!(worker = %self.name, uri = %uri, "Reading resource");

        let params = ResourceReadParams {
            uri: uri.to_string(),
        };
        match self
            .request::<ResourceReadResult>("resources/read", Some(serde_json::to_value(params)?))
            .await
        {
            Ok(result) => Ok(ResourceResult {
                success: true,
                contents: result.contents,
                error: None,
            }),
            Err(SessionError::Rpc { message, .. }) => Ok(ResourceResult {
                success: false,
                contents: Vec::new(),
                error: Some(message),
            }),
            Err(e) => Err(e),
        }
    }

    /// Close the session. Safe to call more than once.
    pub async fn disconnect(&self) {
        let Some(tx) = self.shutdown_tx.lock().await.take() else {
            return;
        };
        let _ = tx.try_send(());
        self.transport.close().await;
        self.alive.store(false, Ordering::SeqCst);

        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(SessionError::Disconnected(self.name.clone())));
        }
        info!(worker = %self.name, "Session disconnected");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cached tool catalog
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().clone()
    }

    /// Cached resource list
    pub fn resources(&self) -> Vec<ResourceDescriptor> {
        self.resources.read().clone()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().clone()
    }

    /// Capabilities the worker advertised in the handshake
    pub fn capabilities(&self) -> ServerCapabilities {
        self.capabilities.read().clone()
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.protocol_version.read().clone()
    }

    /// Receive loop still running and not disconnected
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Send a request and wait for the response with the same id
    async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R, SessionError> {
        if !self.is_alive() {
            return Err(SessionError::Disconnected(self.name.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = McpRequest::new(id, method, params);
        let json = serde_json::to_string(&request)?;

        debug!(worker = %self.name, id, method, "Request");

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.transport.send(&json).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(serde_json::from_value(value)?),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(SessionError::Transport("Request cancelled".to_string())),
            Err(_) => {
                // A late response for this id is dropped by the receive loop
                self.pending.lock().await.remove(&id);
                Err(SessionError::Timeout {
                    method: method.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), SessionError> {
        let json = serde_json::to_string(&McpNotification::new(method, params))?;
        debug!(worker = %self.name, method, "Notify");
        self.transport.send(&json).await
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.get_mut().take() {
            let _ = tx.try_send(());
        }
    }
}

#[async_trait]
impl ToolProvider for McpSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        McpSession::tools(self)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, SessionError> {
        McpSession::call_tool(self, name, arguments).await
    }
}

/// Route one incoming line (called by the receive loop)
async fn handle_message(
    name: &str,
    message: &str,
    pending: &PendingMap,
    transport: &StdioTransport,
) {
    let response: McpResponse = match serde_json::from_str(message) {
        Ok(r) => r,
        Err(e) => {
            warn!(worker = %name, error = %e, "Dropping malformed frame");
            return;
        }
    };

    if let Some(id) = response.response_id() {
        let Some(tx) = pending.lock().await.remove(&id) else {
            debug!(worker = %name, id, "Response for unknown or expired request");
            return;
        };
        let outcome = match response.error {
            Some(err) => Err(SessionError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(outcome);
        return;
    }

    let Some(method) = response.method else {
        debug!(worker = %name, "Ignoring message without id or method");
        return;
    };

    // Peer requests get a reply so the worker never blocks on us
    if let Some(id) = response.id {
        let reply = if method == "ping" {
            McpReply {
                jsonrpc: "2.0",
                id,
                result: Some(json!({})),
                error: None,
            }
        } else {
            McpReply {
                jsonrpc: "2.0",
                id,
                result: None,
                error: Some(McpError {
                    code: -32601,
                    message: format!("Method not found: {}", method),
                    data: None,
                }),
            }
        };
        match serde_json::to_string(&reply) {
            Ok(json) => {
                if let Err(e) = transport.send(&json).await {
                    debug!(worker = %name, error = %e, "Failed to reply to peer request");
                }
            }
            Err(e) => debug!(worker = %name, error = %e, "Failed to encode reply"),
        }
        return;
    }

    debug!(worker = %name, method = %method, "Notification");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// Scripted peer: answers each request line with the reply the closure builds
    fn spawn_peer<F>(stream: DuplexStream, mut reply: F)
    where
        F: FnMut(&Value) -> Vec<String> + Send + 'static,
    {
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(stream);
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(msg) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                for out in reply(&msg) {
                    if write_half.write_all(out.as_bytes()).await.is_err() {
                        return;
                    }
                    let _ = write_half.write_all(b"\n").await;
                }
            }
        });
    }

    fn ok(id: &Value, result: Value) -> String {
        json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()
    }

    fn err(id: &Value, code: i64, message: &str) -> String {
        json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}).to_string()
    }

    /// A well-behaved worker with one `search` tool and no resources
    fn standard_peer(msg: &Value) -> Vec<String> {
        let id = msg.get("id").cloned().unwrap_or(Value::Null);
        match msg["method"].as_str().unwrap_or_default() {
            "initialize" => vec![
                "booting worker".to_string(),
                ok(&id, json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "fake", "version": "0.1"}
                })),
            ],
            "tools/list" => vec![ok(&id, json!({"tools": [
                {"name": "search", "description": "Search", "inputSchema": {"type": "object"}}
            ]}))],
            "resources/list" => vec![err(&id, -32601, "Method not found")],
            "tools/call" => match msg["params"]["name"].as_str() {
                Some("search") => vec![ok(&id, json!({
                    "content": [{"type": "text", "text": format!("found {}", msg["params"]["arguments"]["q"])}]
                }))],
                _ => vec![err(&id, -32602, "Unknown tool")],
            },
            _ => Vec::new(),
        }
    }

    async fn connected(peer: fn(&Value) -> Vec<String>) -> McpSession {
        let (ours, theirs) = duplex(64 * 1024);
        spawn_peer(theirs, peer);
        let (r, w) = tokio::io::split(ours);
        McpSession::connect_with("fake", r, w, Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_handshake_and_listing() {
        let session = connected(standard_peer).await;

        assert!(session.is_alive());
        assert_eq!(session.server_info().unwrap().name, "fake");
        assert_eq!(session.protocol_version().as_deref(), Some("2024-11-05"));
        assert_eq!(session.tools().len(), 1);
        assert!(session.resources().is_empty());
    }

    #[tokio::test]
    async fn test_call_tool_success_and_peer_error() {
        let session = connected(standard_peer).await;

        let result = session.call_tool("search", json!({"q": "ops"})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.joined_text(), "found \"ops\"");

        let result = session.call_tool("missing", json!({})).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown tool"));
    }

    #[tokio::test]
    async fn test_responses_matched_by_id_not_order() {
        let (ours, theirs) = duplex(64 * 1024);
        let mut held: Option<Value> = None;
        spawn_peer(theirs, move |msg| {
            let id = msg.get("id").cloned().unwrap_or(Value::Null);
            match msg["method"].as_str().unwrap_or_default() {
                "tools/call" if msg["params"]["name"] == "slow" => {
                    held = Some(id);
                    Vec::new()
                }
                "tools/call" => {
                    // Answer the fast call, then the held slow one
                    let mut out = vec![ok(&id, json!({"content": [{"type": "text", "text": "fast"}]}))];
                    if let Some(slow) = held.take() {
                        out.push(ok(&slow, json!({"content": [{"type": "text", "text": "slow"}]})));
                    }
                    out
                }
                _ => standard_peer(msg),
            }
        });
        let (r, w) = tokio::io::split(ours);
        let session = Arc::new(
            McpSession::connect_with("fake", r, w, Duration::from_secs(5))
                .await
                .unwrap(),
        );

        let slow = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.call_tool("slow", json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let fast = session.call_tool("fast", json!({})).await.unwrap();
        let slow = slow.await.unwrap().unwrap();

        assert_eq!(fast.joined_text(), "fast");
        assert_eq!(slow.joined_text(), "slow");
    }

    #[tokio::test]
    async fn test_timeout_is_transport_fault() {
        let (ours, theirs) = duplex(64 * 1024);
        spawn_peer(theirs, |msg| match msg["method"].as_str() {
            Some("tools/call") => Vec::new(),
            _ => standard_peer(msg),
        });
        let (r, w) = tokio::io::split(ours);
        let session = McpSession::connect_with("fake", r, w, Duration::from_millis(200))
            .await
            .unwrap();

        let err = session.call_tool("search", json!({})).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_handshake_failure_is_connect_error() {
        let (ours, theirs) = duplex(1024);
        spawn_peer(theirs, |msg| {
            let id = msg.get("id").cloned().unwrap_or(Value::Null);
            vec![err(&id, -32600, "bad version")]
        });
        let (r, w) = tokio::io::split(ours);
        let result = McpSession::connect_with("fake", r, w, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(SessionError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_disconnect_twice_then_calls_fail() {
        let session = connected(standard_peer).await;

        session.disconnect().await;
        session.disconnect().await;

        assert!(!session.is_alive());
        assert!(matches!(
            session.call_tool("search", json!({})).await,
            Err(SessionError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_read_resource() {
        let (ours, theirs) = duplex(64 * 1024);
        spawn_peer(theirs, |msg| {
            let id = msg.get("id").cloned().unwrap_or(Value::Null);
            match msg["method"].as_str() {
                Some("initialize") => vec![ok(&id, json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}, "resources": {}},
                    "serverInfo": {"name": "fake", "version": "0.1"}
                }))],
                Some("resources/list") => vec![ok(&id, json!({"resources": [
                    {"uri": "file:///briefing.md", "name": "briefing", "mimeType": "text/markdown"}
                ]}))],
                Some("resources/read") if msg["params"]["uri"] == "file:///briefing.md" => {
                    vec![ok(&id, json!({"contents": [{"uri": "file:///briefing.md", "text": "# Ops"}]}))]
                }
                Some("resources/read") => vec![err(&id, -32002, "Resource not found")],
                _ => standard_peer(msg),
            }
        });
        let (r, w) = tokio::io::split(ours);
        let session = McpSession::connect_with("fake", r, w, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(session.resources()[0].uri, "file:///briefing.md");
        assert!(session.capabilities().resources.is_some());

        let found = session.read_resource("file:///briefing.md").await.unwrap();
        assert!(found.success);
        assert_eq!(found.contents.len(), 1);

        let missing = session.read_resource("file:///nope").await.unwrap();
        assert!(!missing.success);
        assert_eq!(missing.error.as_deref(), Some("Resource not found"));

        session.disconnect().await;
        assert!(session.read_resource("file:///briefing.md").await.is_err());
    }

    #[tokio::test]
    async fn test_resources_skipped_when_not_advertised() {
        let listings = Arc::new(AtomicUsize::new(0));
        let (ours, theirs) = duplex(64 * 1024);
        let seen = Arc::clone(&listings);
        spawn_peer(theirs, move |msg| {
            if msg["method"] == "resources/list" {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            standard_peer(msg)
        });
        let (r, w) = tokio::io::split(ours);
        let session = McpSession::connect_with("fake", r, w, Duration::from_secs(5))
            .await
            .unwrap();

        session.refresh_capabilities().await.unwrap();
        assert!(session.resources().is_empty());
        assert!(session.capabilities().resources.is_none());
        assert_eq!(listings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_interleaved_notification_and_ping_during_call() {
        let replies = Arc::new(parking_lot::Mutex::new(Vec::<Value>::new()));
        let (ours, theirs) = duplex(64 * 1024);
        let seen = Arc::clone(&replies);
        spawn_peer(theirs, move |msg| {
            let id = msg.get("id").cloned().unwrap_or(Value::Null);
            if msg.get("method").is_none() {
                // Our answer to the peer's ping
                seen.lock().push(msg.clone());
                return Vec::new();
            }
            match msg["method"].as_str() {
                Some("tools/call") => vec![
                    json!({"jsonrpc": "2.0", "method": "notifications/message",
                           "params": {"level": "info", "data": "searching"}})
                    .to_string(),
                    json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"}).to_string(),
                    json!({"jsonrpc": "2.0", "id": "srv-2", "method": "sampling/createMessage"})
                        .to_string(),
                    ok(&id, json!({"content": [{"type": "text", "text": "hit"}]})),
                ],
                _ => standard_peer(msg),
            }
        });
        let (r, w) = tokio::io::split(ours);
        let session = McpSession::connect_with("fake", r, w, Duration::from_secs(5))
            .await
            .unwrap();

        let result = session.call_tool("search", json!({"q": "x"})).await.unwrap();
        assert_eq!(result.joined_text(), "hit");
        assert!(session.is_alive());

        for _ in 0..100 {
            if replies.lock().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let replies = replies.lock().clone();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], "srv-1");
        assert_eq!(replies[0]["result"], json!({}));
        assert_eq!(replies[1]["id"], "srv-2");
        assert_eq!(replies[1]["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_non_utf8_chatter_keeps_session_alive() {
        let (ours, theirs) = duplex(64 * 1024);
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(theirs);
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(msg) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                if msg["method"] == "tools/call" {
                    let _ = write_half.write_all(b"caf\xe9 log line\n").await;
                }
                for out in standard_peer(&msg) {
                    let _ = write_half.write_all(out.as_bytes()).await;
                    let _ = write_half.write_all(b"\n").await;
                }
            }
        });
        let (r, w) = tokio::io::split(ours);
        let session = McpSession::connect_with("fake", r, w, Duration::from_secs(5))
            .await
            .unwrap();

        let first = session.call_tool("search", json!({"q": "a"})).await.unwrap();
        let second = session.call_tool("search", json!({"q": "b"})).await.unwrap();

        assert_eq!(first.joined_text(), "found \"a\"");
        assert_eq!(second.joined_text(), "found \"b\"");
        assert!(session.is_alive());
    }
}
