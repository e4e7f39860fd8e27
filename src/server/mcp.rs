use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::tools::{ToolRegistry, ToolRequest};

/// Longest request line accepted from a client.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// JSON-RPC 2.0 Request format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

/// JSON-RPC 2.0 Response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    fn invalid_params(message: impl Into<String>) -> Self {
        JsonRpcError {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        JsonRpcError {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }
}

impl JsonRpcResponse {
    /// Reply for a line that is not a JSON-RPC request at all.
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::bare_error(-32700, "Parse error", detail)
    }

    /// Reply for a line longer than the server accepts.
    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::bare_error(-32600, "Invalid Request", detail)
    }

    fn bare_error(code: i32, message: &str, detail: impl Into<String>) -> Self {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
                data: Some(Value::String(detail.into())),
            }),
            id: Value::Null,
        }
    }
}

/// Tool host speaking line-delimited JSON-RPC
#[derive(Clone)]
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    max_line_bytes: usize,
}

impl McpServer {
    pub fn new(registry: ToolRegistry) -> Self {
        McpServer {
            registry: Arc::new(registry),
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Serve one client: one JSON-RPC request per line in, one response per
    /// line out, until the peer closes its side.
    ///
    /// A line longer than the limit is answered with `-32600` and skipped
    /// without buffering the rest of it.
    pub async fn serve_connection<S>(&self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let limit = self.max_line_bytes as u64 + 1;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = (&mut reader).take(limit).read_until(b'\n', &mut buf).await?;
            if read == 0 {
                break;
            }

            let response = if buf.last() != Some(&b'\n') && buf.len() > self.max_line_bytes {
                warn!("Dropping request line over {} bytes", self.max_line_bytes);
                skip_line(&mut reader).await?;
                JsonRpcResponse::invalid_request(format!(
                    "Request line exceeds {} bytes",
                    self.max_line_bytes
                ))
            } else {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                self.handle_line(line).await
            };

            let mut encoded = serde_json::to_vec(&response).map_err(io::Error::other)?;
            encoded.push(b'\n');
            writer.write_all(&encoded).await?;
            writer.flush().await?;
        }

        Ok(())
    }

    async fn handle_line(&self, line: &str) -> JsonRpcResponse {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => {
                info!("Received request: {} (id: {})", request.method, request.id);
                self.handle_request(request).await
            }
            Err(e) => {
                error!("Failed to parse JSON-RPC request: {}", e);
                JsonRpcResponse::parse_error(e.to_string())
            }
        }
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!(
            "Handling request: {} with params: {:?}",
            request.method, request.params
        );

        let response = match request.method.as_str() {
            "tools/list" => self.handle_tools_list(&request.params),
            "tools/call" => self.handle_tool_call(&request.params).await,
            "ping" => Ok(json!({"status": "ok"})),
            _ => Err(JsonRpcError {
                code: -32601,
                message: format!("Method not found: {}", request.method),
                data: None,
            }),
        };

        match response {
            Ok(result) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: Some(result),
                error: None,
                id: request.id,
            },
            Err(err) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: None,
                error: Some(err),
                id: request.id,
            },
        }
    }

    fn handle_tools_list(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let group = match params.get("group") {
            None | Some(Value::Null) => None,
            Some(Value::String(group)) => Some(group.as_str()),
            Some(_) => return Err(JsonRpcError::invalid_params("'group' must be a string")),
        };

        let tools = self.registry.definitions(group);
        serde_json::to_value(&tools)
            .map(|tools| json!({ "tools": tools }))
            .map_err(|e| JsonRpcError::internal(format!("Internal error: {}", e)))
    }

    async fn handle_tool_call(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let request: ToolRequest = serde_json::from_value(params.clone())
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid tool call: {}", e)))?;

        // tool failures are results, not protocol errors
        let response = self.registry.call(&request.name, request.arguments).await;
        serde_json::to_value(&response)
            .map_err(|e| JsonRpcError::internal(format!("Internal error: {}", e)))
    }
}

/// Discard input up to and including the next newline.
async fn skip_line<R>(reader: &mut R) -> io::Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        let (consumed, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(consumed);
        if done {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolResponse};
    use async_trait::async_trait;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase a word"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {"word": {"type": "string"}}})
        }

        async fn execute(&self, arguments: Value) -> ToolResponse {
            match arguments.get("word").and_then(Value::as_str) {
                Some(word) => ToolResponse::success(json!(word.to_uppercase())),
                None => ToolResponse::failure(
                    "A word is required",
                    &crate::error::ToolError::InvalidArguments("word".to_string()),
                ),
            }
        }
    }

    fn server() -> McpServer {
        let mut registry = ToolRegistry::new();
        registry.register("general", Arc::new(Upper));
        McpServer::new(registry)
    }

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: json!(1),
        }
    }

    #[test]
    fn test_jsonrpc_request_defaults() {
        let request: JsonRpcRequest =
            serde_json::from_str("{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}").unwrap();
        assert_eq!(request.params, Value::Null);
        assert_eq!(request.id, Value::Null);
    }

    #[tokio::test]
    async fn test_tools_list() {
        let response = server()
            .handle_request(request("tools/list", json!({"group": "aptos"})))
            .await;
        let tools = &response.result.unwrap()["tools"];
        assert_eq!(tools[0]["name"], json!("upper"));

        let response = server()
            .handle_request(request("tools/list", json!({"group": 7})))
            .await;
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_tool_call_success_and_failure_are_results() {
        let server = server();

        let response = server
            .handle_request(request(
                "tools/call",
                json!({"name": "upper", "arguments": {"word": "sei"}}),
            ))
            .await;
        assert_eq!(response.result.unwrap(), json!({"success": true, "data": "SEI"}));

        let response = server
            .handle_request(request("tools/call", json!({"name": "upper"})))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["success"], json!(false));
        assert_eq!(result["kind"], json!("invalid_arguments"));
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let server = server();

        let response = server
            .handle_request(request("tools/call", json!({"arguments": {}})))
            .await;
        assert_eq!(response.error.unwrap().code, -32602);

        let response = server.handle_request(request("resources/list", json!({}))).await;
        assert_eq!(response.error.unwrap().code, -32601);

        let response = server.handle_request(request("ping", Value::Null)).await;
        assert_eq!(response.result.unwrap(), json!({"status": "ok"}));
        assert_eq!(response.id, json!(1));
    }

    #[tokio::test]
    async fn test_serve_connection_line_protocol() {
        let (client, server_side) = tokio::io::duplex(4096);
        let server = server();
        let handle = tokio::spawn(async move { server.serve_connection(server_side).await });

        let (reader, mut writer) = tokio::io::split(client);
        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":7}\n\nnot json\n")
            .await
            .unwrap();
        writer.shutdown().await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();

        assert_eq!(first, json!({"jsonrpc": "2.0", "result": {"status": "ok"}, "id": 7}));
        assert_eq!(second["error"]["code"], json!(-32700));
        assert_eq!(second["id"], Value::Null);

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_overlong_line_is_rejected_and_connection_continues() {
        let (client, server_side) = tokio::io::duplex(1024);
        let server = server().with_max_line_bytes(64);
        let handle = tokio::spawn(async move { server.serve_connection(server_side).await });

        let (reader, mut writer) = tokio::io::split(client);
        let writing = tokio::spawn(async move {
            let mut payload = vec![b'x'; 10_000];
            payload.push(b'\n');
            payload.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":2}\n");
            writer.write_all(&payload).await.unwrap();
            writer.shutdown().await.unwrap();
        });

        let mut lines = BufReader::new(reader).lines();
        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();

        assert_eq!(first["error"]["code"], json!(-32600));
        assert_eq!(second["result"], json!({"status": "ok"}));
        assert_eq!(second["id"], json!(2));

        writing.await.unwrap();
        handle.await.unwrap().unwrap();
    }
}
