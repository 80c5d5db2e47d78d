//! MCP wire messages.
//!
//! MCP speaks JSON-RPC 2.0. Anything with an `id` is a request and gets
//! exactly one reply (a result or an error); anything without one is a
//! notification and gets none. Ids are integers or strings; `null` is
//! rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::ContentItem;

/// Protocol revision spoken by this server.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "modular-tools-mcp";

/// Identifier correlating a request with its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A client request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol marker, `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id.
    pub id: RequestId,
    /// Method name, e.g. `tools/call`.
    pub method: String,
    /// Method parameters, if any.
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Checks the envelope. Returns the reason it is unusable, if any.
    #[must_use]
    pub fn validate(&self) -> Option<&'static str> {
        if self.jsonrpc != "2.0" {
            Some("jsonrpc must be \"2.0\"")
        } else if self.method.is_empty() {
            Some("method must not be empty")
        } else {
            None
        }
    }

    /// Deserialises the request parameters.
    ///
    /// # Errors
    ///
    /// Returns an invalid-params error naming `what` if the parameters are
    /// missing or have the wrong shape.
    pub fn params<T: serde::de::DeserializeOwned>(&self, what: &str) -> Result<T, JsonRpcError> {
        let params = self.params.clone().ok_or_else(|| {
            JsonRpcError::invalid_params(self.id.clone(), format!("Missing {what} params"))
        })?;
        serde_json::from_value(params).map_err(|e| {
            JsonRpcError::invalid_params(self.id.clone(), format!("Invalid {what} params: {e}"))
        })
    }
}

/// A client notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol marker, `"2.0"`.
    pub jsonrpc: String,
    /// Notification name.
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// A server-initiated notification.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingNotification {
    jsonrpc: &'static str,
    /// Notification name.
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl OutgoingNotification {
    /// Tells the client to fetch `tools/list` again.
    #[must_use]
    pub fn tools_list_changed() -> Self {
        Self {
            jsonrpc: "2.0",
            method: "notifications/tools/list_changed".to_string(),
            params: None,
        }
    }
}

/// A result reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: &'static str,
    /// Id of the request being answered.
    pub id: RequestId,
    /// Method result.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Answers request `id` with `result`.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result,
        }
    }
}

/// Error codes used by this server.
///
/// The first five are reserved by JSON-RPC; `UnsupportedOperation` is in the
/// implementation-defined server range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Input was not JSON.
    ParseError = -32700,
    /// Input was JSON but not a usable message, or arrived out of order.
    InvalidRequest = -32600,
    /// No such method.
    MethodNotFound = -32601,
    /// Parameters missing or of the wrong shape.
    InvalidParams = -32602,
    /// The server failed while building a reply.
    InternalError = -32603,
    /// The method exists in the protocol but nothing here provides it.
    UnsupportedOperation = -32001,
}

impl ErrorCode {
    /// Numeric wire value.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// The `error` member of an error reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    /// Numeric code, see [`ErrorCode`].
    pub code: i32,
    /// One-line summary.
    pub message: String,
    /// Extra detail, e.g. the JSON parser's complaint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An error reply.
///
/// `id` is `null` on the wire when the request id could not be read.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    jsonrpc: &'static str,
    /// Id of the request being answered, if known.
    pub id: Option<RequestId>,
    /// Code and message.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    fn build(id: Option<RequestId>, code: ErrorCode, message: String, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            error: JsonRpcErrorData {
                code: code.code(),
                message,
                data,
            },
        }
    }

    /// The input line was not JSON; `detail` is kept as error data.
    #[must_use]
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::build(
            None,
            ErrorCode::ParseError,
            "Parse error".to_string(),
            Some(Value::String(detail.into())),
        )
    }

    /// The message was not a usable request.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self::build(id, ErrorCode::InvalidRequest, message.into(), None)
    }

    /// Rejects a request that arrived before the handshake.
    #[must_use]
    pub fn not_initialised(id: RequestId) -> Self {
        Self::invalid_request(Some(id), "Server not initialised")
    }

    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::build(
            Some(id),
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
            None,
        )
    }

    #[must_use]
    pub fn invalid_params(id: RequestId, message: impl Into<String>) -> Self {
        Self::build(Some(id), ErrorCode::InvalidParams, message.into(), None)
    }

    #[must_use]
    pub fn internal_error(id: RequestId, message: impl Into<String>) -> Self {
        Self::build(Some(id), ErrorCode::InternalError, message.into(), None)
    }

    /// Rejects a protocol method that has no provider.
    #[must_use]
    pub fn unsupported(id: RequestId, method: &str) -> Self {
        Self::build(
            Some(id),
            ErrorCode::UnsupportedOperation,
            format!("Unsupported operation: {method}"),
            None,
        )
    }
}

/// A parsed line from the client.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Needs a reply.
    Request(JsonRpcRequest),
    /// Fire and forget.
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// Method or notification name.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Request(req) => &req.method,
            Self::Notification(notif) => &notif.method,
        }
    }

    /// Request id; `None` for notifications.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Notification(_) => None,
        }
    }
}

/// Anything the server writes to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    /// A success response.
    Response(JsonRpcResponse),
    /// An error response.
    Error(JsonRpcError),
    /// A server-initiated notification.
    Notification(OutgoingNotification),
}

impl From<Result<JsonRpcResponse, JsonRpcError>> for OutgoingMessage {
    fn from(reply: Result<JsonRpcResponse, JsonRpcError>) -> Self {
        match reply {
            Ok(response) => Self::Response(response),
            Err(error) => Self::Error(error),
        }
    }
}

impl From<JsonRpcError> for OutgoingMessage {
    fn from(error: JsonRpcError) -> Self {
        Self::Error(error)
    }
}

impl From<OutgoingNotification> for OutgoingMessage {
    fn from(notification: OutgoingNotification) -> Self {
        Self::Notification(notification)
    }
}

/// The `capabilities` block of the `initialize` result.
///
/// Resources and prompts are advertised so clients may list them; both
/// lists are always empty.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    pub tools: ListCapability,
    pub resources: ListCapability,
    pub prompts: ListCapability,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: ListCapability { list_changed: true },
            resources: ListCapability::default(),
            prompts: ListCapability::default(),
        }
    }
}

/// A capability whose list may change during the session.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ListCapability {
    /// Whether the server sends `list_changed` notifications.
    #[serde(rename = "listChanged", skip_serializing_if = "std::ops::Not::not")]
    pub list_changed: bool,
}

/// The `serverInfo` block of the `initialize` result.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The `clientInfo` block of `initialize` params.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// `initialize` params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Revision the client asked for.
    pub protocol_version: String,
    /// Client capabilities; accepted and not inspected.
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// `tools/call` params.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Registered tool name.
    pub name: String,
    /// Tool arguments; absent means none.
    #[serde(default)]
    pub arguments: Value,
}

/// `tools/call` result.
///
/// A failing tool still produces a result, flagged with `isError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<ContentItem>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Wraps the content a handler returned.
    #[must_use]
    pub const fn success(content: Vec<ContentItem>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// A single text item describing a failure.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(message)],
            is_error: true,
        }
    }
}

/// Parses one line of input into an incoming message.
///
/// # Errors
///
/// Returns the error response to send back when the line is not JSON or not
/// a JSON-RPC 2.0 message.
pub fn parse_message(line: &str) -> Result<IncomingMessage, JsonRpcError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| JsonRpcError::parse_error(e.to_string()))?;

    let Some(fields) = value.as_object() else {
        return Err(JsonRpcError::invalid_request(None, "message must be a JSON object"));
    };
    if fields.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(JsonRpcError::invalid_request(None, "jsonrpc must be \"2.0\""));
    }
    let is_request = fields.contains_key("id");

    let malformed = |e: serde_json::Error| JsonRpcError::invalid_request(None, e.to_string());
    if !is_request {
        return serde_json::from_value(value)
            .map(IncomingMessage::Notification)
            .map_err(malformed);
    }

    let request: JsonRpcRequest = serde_json::from_value(value).map_err(malformed)?;
    match request.validate() {
        Some(reason) => Err(JsonRpcError::invalid_request(Some(request.id), reason)),
        None => Ok(IncomingMessage::Request(request)),
    }
}
