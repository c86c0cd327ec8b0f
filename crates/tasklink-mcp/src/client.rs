//! MCP client: drives one server session.
//!
//! Handles the MCP protocol handshake (initialize + initialized notification),
//! tool discovery (tools/list), and tool invocation (tools/call). Tool calls
//! are refused until the handshake has completed.

use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::transport::StdioTransport;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use tokio::sync::Mutex;

/// MCP protocol version we support.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Name and version of a protocol participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for Implementation {
    fn default() -> Self {
        Self::new("tasklink", env!("CARGO_PKG_VERSION"))
    }
}

/// The server's reply to `initialize`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default)]
    pub server_info: Option<Implementation>,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Information about a tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Typed view of a `tools/call` result.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Decode the raw value returned by [`McpClient::call_tool`].
    pub fn from_value(value: serde_json::Value) -> Result<Self, McpError> {
        serde_json::from_value(value)
            .map_err(|e| McpError::Decode(format!("Failed to parse tools/call result: {e}")))
    }

    /// The text of every text content item, in order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|c| match c {
            ToolContent::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// A content item in a tool result.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(other)]
    Other,
}

/// Deserialization helpers for MCP protocol messages.
#[derive(Deserialize)]
struct ToolsListResult {
    tools: Vec<ToolEntry>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Client for a single MCP server.
pub struct McpClient {
    transport: StdioTransport,
    handshake: Mutex<()>,
    server: OnceLock<InitializeResult>,
}

impl McpClient {
    /// Spawn the server process. The session starts connected but not yet
    /// initialized; call [`Self::initialize`] before using tools.
    pub fn connect(name: impl Into<String>, config: &McpServerConfig) -> Result<Self, McpError> {
        Ok(Self::with_transport(StdioTransport::spawn(name, config)?))
    }

    /// Wrap an existing transport.
    pub fn with_transport(transport: StdioTransport) -> Self {
        Self {
            transport,
            handshake: Mutex::new(()),
            server: OnceLock::new(),
        }
    }

    /// Perform the handshake: `initialize` request, then the
    /// `notifications/initialized` notification once the reply is in.
    ///
    /// Calling this again after success returns the cached server reply.
    pub async fn initialize(&self, client_info: &Implementation) -> Result<InitializeResult, McpError> {
        let _handshake = self.handshake.lock().await;
        if let Some(info) = self.server.get() {
            return Ok(info.clone());
        }

        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": client_info,
        });
        let result = self
            .transport
            .send_request("initialize", Some(params))
            .await?;
        let info: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::Decode(format!("Failed to parse initialize result: {e}")))?;

        if info.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                server = %self.name(),
                requested = PROTOCOL_VERSION,
                offered = %info.protocol_version,
                "MCP server answered with a different protocol version"
            );
        }

        self.transport
            .send_notification("notifications/initialized", None)
            .await?;

        let server_name = info
            .server_info
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or("unknown");
        tracing::info!(
            server = %self.name(),
            server_name,
            protocol = %info.protocol_version,
            "MCP session initialized"
        );

        Ok(self.server.get_or_init(|| info).clone())
    }

    /// Discover the tools the server exposes, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.ensure_initialized()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();
        loop {
            let params = cursor
                .take()
                .map(|c| serde_json::json!({ "cursor": c }));
            let result = self.transport.send_request("tools/list", params).await?;
            let page: ToolsListResult = serde_json::from_value(result).map_err(|e| {
                McpError::Decode(format!("Failed to parse tools/list response: {e}"))
            })?;
            tools.extend(page.tools.into_iter().map(|t| ToolDescriptor {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            }));
            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(McpError::Decode(format!(
                            "tools/list repeated cursor {next:?}"
                        )));
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        tracing::debug!(server = %self.name(), count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    /// Call a tool and return the raw `result` object.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        self.ensure_initialized()?;

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        self.transport.send_request("tools/call", Some(params)).await
    }

    /// Whether the server process is still attached.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Whether the handshake has completed on a live session.
    pub fn is_initialized(&self) -> bool {
        self.server.get().is_some() && self.transport.is_connected()
    }

    /// The server's `initialize` reply, once the handshake has completed.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server.get()
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        self.transport.name()
    }

    /// Shut down the server connection. Safe to call more than once.
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
    }

    fn ensure_initialized(&self) -> Result<(), McpError> {
        if self.server.get().is_none() {
            return Err(McpError::NotInitialized);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::{Frame, LineReader};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    type Received = Arc<std::sync::Mutex<Vec<serde_json::Value>>>;
    type Reply = Option<Result<serde_json::Value, (i64, &'static str)>>;

    /// Client wired to an in-memory server. `handler` answers each request
    /// by method; `None` means never reply. Every message the server sees is
    /// recorded.
    fn fake_client<F>(handler: F) -> (McpClient, Received)
    where
        F: Fn(&str, &serde_json::Value) -> Reply + Send + 'static,
    {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);
        let received: Received = Arc::default();

        let log = Arc::clone(&received);
        tokio::spawn(async move {
            let mut reader = LineReader::new(server_read);
            while let Ok(Some(Frame::Line(line))) = reader.read_line().await {
                let msg: serde_json::Value = serde_json::from_str(&line).unwrap();
                log.lock().unwrap().push(msg.clone());
                let Some(id) = msg.get("id") else { continue };
                let method = msg["method"].as_str().unwrap_or_default();
                let params = msg.get("params").cloned().unwrap_or_default();
                let response = match handler(method, &params) {
                    None => continue,
                    Some(Ok(result)) => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result}),
                    Some(Err((code, message))) => serde_json::json!({
                        "jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}
                    }),
                };
                let mut bytes = serde_json::to_vec(&response).unwrap();
                bytes.push(b'\n');
                if server_write.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        });

        let transport = StdioTransport::from_streams("fake", client_read, client_write, 2000);
        (McpClient::with_transport(transport), received)
    }

    fn init_result() -> serde_json::Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "task-server", "version": "1.2.0"}
        })
    }

    fn standard_handler(method: &str, _params: &serde_json::Value) -> Reply {
        match method {
            "initialize" => Some(Ok(init_result())),
            "tools/list" => Some(Ok(serde_json::json!({
                "tools": [
                    {"name": "get_assigned_tasks", "description": "List tasks", "inputSchema": {"type": "object"}},
                    {"name": "update_task", "inputSchema": {"type": "object"}}
                ]
            }))),
            "tools/call" => Some(Ok(serde_json::json!({
                "content": [{"type": "text", "text": "done"}],
                "isError": false
            }))),
            _ => Some(Err((-32601, "Method not found"))),
        }
    }

    fn methods(received: &Received) -> Vec<String> {
        received
            .lock()
            .unwrap()
            .iter()
            .map(|m| m["method"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn handshake_sends_initialize_then_notification() {
        let (client, received) = fake_client(standard_handler);
        assert!(!client.is_initialized());

        let info = client.initialize(&Implementation::default()).await.unwrap();
        assert_eq!(info.protocol_version, PROTOCOL_VERSION);
        assert_eq!(info.server_info.unwrap().name, "task-server");
        assert!(client.is_initialized());

        // Round-trip something so the notification has surely been read
        client.list_tools().await.unwrap();
        assert_eq!(
            methods(&received),
            vec!["initialize", "notifications/initialized", "tools/list"]
        );

        let log = received.lock().unwrap();
        assert_eq!(log[0]["params"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(log[0]["params"]["clientInfo"]["name"], "tasklink");
        assert!(log[1].get("id").is_none());
    }

    #[tokio::test]
    async fn notification_waits_for_initialize_reply() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, mut server_write) = tokio::io::split(server_io);
        let client = McpClient::with_transport(StdioTransport::from_streams(
            "slow-init",
            client_read,
            client_write,
            2000,
        ));

        let server = tokio::spawn(async move {
            let mut reader = LineReader::new(server_read);
            let Some(Frame::Line(line)) = reader.read_line().await.unwrap() else {
                panic!("expected initialize");
            };
            let init: serde_json::Value = serde_json::from_str(&line).unwrap();
            assert_eq!(init["method"], "initialize");

            // Nothing else may arrive while initialize is unanswered
            let early = tokio::time::timeout(Duration::from_millis(100), reader.read_line()).await;
            assert!(early.is_err(), "client sent something before the reply");

            let reply = serde_json::json!({"jsonrpc": "2.0", "id": init["id"], "result": init_result()});
            server_write
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .unwrap();

            let Some(Frame::Line(line)) = reader.read_line().await.unwrap() else {
                panic!("expected notification");
            };
            let notif: serde_json::Value = serde_json::from_str(&line).unwrap();
            assert_eq!(notif["method"], "notifications/initialized");
            (reader, server_write)
        });

        client.initialize(&Implementation::default()).await.unwrap();
        let _peer = server.await.unwrap();
    }

    #[tokio::test]
    async fn tools_require_initialization() {
        let (client, received) = fake_client(standard_handler);

        assert!(matches!(
            client.list_tools().await,
            Err(McpError::NotInitialized)
        ));
        assert!(matches!(
            client.call_tool("update_task", serde_json::json!({})).await,
            Err(McpError::NotInitialized)
        ));
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_initialize_skips_notification() {
        let (client, received) = fake_client(|method, _| match method {
            "initialize" => Some(Err((-32602, "Unsupported protocol version"))),
            _ => Some(Ok(serde_json::json!({}))),
        });

        match client.initialize(&Implementation::default()).await {
            Err(McpError::Rpc { code, .. }) => assert_eq!(code, -32602),
            other => panic!("Expected Rpc, got: {other:?}"),
        }
        assert!(!client.is_initialized());
        assert!(matches!(
            client.list_tools().await,
            Err(McpError::NotInitialized)
        ));
        assert_eq!(methods(&received), vec!["initialize"]);
    }

    #[tokio::test]
    async fn second_initialize_reuses_handshake() {
        let (client, received) = fake_client(standard_handler);
        client.initialize(&Implementation::default()).await.unwrap();
        let again = client.initialize(&Implementation::default()).await.unwrap();
        assert_eq!(again.server_info.unwrap().version, "1.2.0");
        client.list_tools().await.unwrap();
        assert_eq!(
            methods(&received)
                .iter()
                .filter(|m| *m == "initialize")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn list_tools_decodes_descriptors() {
        let (client, _) = fake_client(standard_handler);
        client.initialize(&Implementation::default()).await.unwrap();

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "get_assigned_tasks");
        assert_eq!(tools[0].description, "List tasks");
        assert_eq!(tools[1].description, "");
    }

    #[tokio::test]
    async fn list_tools_follows_cursor() {
        let (client, received) = fake_client(|method, params| match method {
            "initialize" => Some(Ok(init_result())),
            "tools/list" => match params.get("cursor").and_then(|c| c.as_str()) {
                None => Some(Ok(serde_json::json!({
                    "tools": [{"name": "a"}],
                    "nextCursor": "page-2"
                }))),
                Some("page-2") => Some(Ok(serde_json::json!({"tools": [{"name": "b"}]}))),
                Some(_) => Some(Err((-32602, "bad cursor"))),
            },
            _ => None,
        });
        client.initialize(&Implementation::default()).await.unwrap();

        let names: Vec<_> = client
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(received.lock().unwrap()[3]["params"]["cursor"], "page-2");
    }

    #[tokio::test]
    async fn list_tools_stops_on_repeated_cursor() {
        let (client, received) = fake_client(|method, _| match method {
            "initialize" => Some(Ok(init_result())),
            _ => Some(Ok(serde_json::json!({
                "tools": [{"name": "a"}],
                "nextCursor": "same"
            }))),
        });
        client.initialize(&Implementation::default()).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), client.list_tools())
            .await
            .expect("list_tools must not page forever");
        match result {
            Err(McpError::Decode(msg)) => assert!(msg.contains("same")),
            other => panic!("Expected Decode, got: {other:?}"),
        }
        let pages = methods(&received)
            .iter()
            .filter(|m| *m == "tools/list")
            .count();
        assert_eq!(pages, 2);
    }

    #[tokio::test]
    async fn malformed_tools_list_is_decode_error() {
        let (client, _) = fake_client(|method, _| match method {
            "initialize" => Some(Ok(init_result())),
            _ => Some(Ok(serde_json::json!({"tools": "nope"}))),
        });
        client.initialize(&Implementation::default()).await.unwrap();
        assert!(matches!(client.list_tools().await, Err(McpError::Decode(_))));
    }

    #[tokio::test]
    async fn call_tool_sends_name_and_arguments() {
        let (client, received) = fake_client(standard_handler);
        client.initialize(&Implementation::default()).await.unwrap();

        let raw = client
            .call_tool("update_task", serde_json::json!({"task_id": 7}))
            .await
            .unwrap();
        let result = ToolCallResult::from_value(raw).unwrap();
        assert_eq!(result.texts().collect::<Vec<_>>(), vec!["done"]);
        assert!(!result.is_error);

        let log = received.lock().unwrap();
        let call = log.last().unwrap();
        assert_eq!(call["method"], "tools/call");
        assert_eq!(call["params"]["name"], "update_task");
        assert_eq!(call["params"]["arguments"]["task_id"], 7);
    }

    #[tokio::test]
    async fn disconnect_ends_initialized_state() {
        let (client, _) = fake_client(standard_handler);
        client.initialize(&Implementation::default()).await.unwrap();
        client.disconnect().await;
        client.disconnect().await;

        assert!(!client.is_connected());
        assert!(!client.is_initialized());
        assert!(matches!(
            client.call_tool("x", serde_json::json!({})).await,
            Err(McpError::ConnectionClosed)
        ));
    }

    #[test]
    fn deserialize_tool_entry_without_description() {
        let json = r#"{"name": "list", "inputSchema": {"type": "object"}}"#;
        let entry: ToolEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.name, "list");
        assert!(entry.description.is_none());
    }

    #[test]
    fn tool_entry_defaults_schema() {
        let entry: ToolEntry = serde_json::from_str(r#"{"name": "bare"}"#).unwrap();
        assert_eq!(entry.input_schema["type"], "object");
    }

    #[test]
    fn deserialize_tool_call_result_mixed_content() {
        let json = serde_json::json!({
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "image", "data": "base64data", "mimeType": "image/png"},
                {"type": "resource", "resource": {"uri": "file:///x"}}
            ],
            "isError": true
        });
        let result = ToolCallResult::from_value(json).unwrap();
        assert!(result.is_error);
        assert_eq!(result.content.len(), 3);
        match &result.content[1] {
            ToolContent::Image { data, mime_type } => {
                assert_eq!(data, "base64data");
                assert_eq!(mime_type, "image/png");
            }
            other => panic!("Expected image content, got: {other:?}"),
        }
        assert!(matches!(result.content[2], ToolContent::Other));
        assert_eq!(result.texts().collect::<Vec<_>>(), vec!["hello"]);
    }

    #[test]
    fn initialize_result_tolerates_missing_fields() {
        let info: InitializeResult = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(info.protocol_version.is_empty());
        assert!(info.server_info.is_none());
        assert!(info.instructions.is_none());
    }
}
