//! Shared helpers for driving a server over an in-memory connection.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;

use modular_tools_mcp::browser::memory::MemoryDriver;
use modular_tools_mcp::config::Config;
use modular_tools_mcp::discovery::Discovery;
use modular_tools_mcp::mcp::{
    ControlEvent, McpServer, Transport, TransportError, MCP_PROTOCOL_VERSION,
};
use modular_tools_mcp::tools::ToolContext;

/// Writes unit manifests into `dir`.
pub fn write_units(dir: &Path, units: &[(&str, &str)]) {
    std::fs::create_dir_all(dir).unwrap();
    for (name, manifest) in units {
        std::fs::write(dir.join(format!("{name}.json")), manifest).unwrap();
    }
}

/// Test configuration: short new-page watch and tool timeout.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.browser.new_page_watch_ms = 200;
    config.server.tool_timeout_secs = 10;
    config
}

/// A tool context backed by the in-memory browser driver.
pub fn context(driver: &MemoryDriver) -> ToolContext {
    ToolContext::with_driver(
        Arc::new(test_config()),
        reqwest::Client::new(),
        Arc::new(driver.clone()),
    )
}

/// A server over `tools_dir` backed by the in-memory browser driver.
pub fn server(tools_dir: &Path, driver: &MemoryDriver) -> McpServer {
    McpServer::from_parts(context(driver), Discovery::new(tools_dir))
}

/// Serves one connection while `script` plays the client.
pub async fn session<F, Fut>(server: &mut McpServer, script: F) -> Result<(), TransportError>
where
    F: FnOnce(Client) -> Fut,
    Fut: Future<Output = ()>,
{
    let (client, transport) = connect();
    let (result, ()) = tokio::join!(server.serve(transport), script(client));
    result
}

/// Like [`session`], but the script also gets a sender of control events.
pub async fn session_with_events<F, Fut>(
    server: &mut McpServer,
    script: F,
) -> Result<(), TransportError>
where
    F: FnOnce(Client, mpsc::Sender<ControlEvent>) -> Fut,
    Fut: Future<Output = ()>,
{
    let (client, transport) = connect();
    let (events, rx) = mpsc::channel(4);
    let (result, ()) = tokio::join!(
        server.serve_with_events(transport, rx),
        script(client, events)
    );
    result
}

type ServerTransport = Transport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

fn connect() -> (Client, ServerTransport) {
    let (client_io, server_io) = tokio::io::duplex(256 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let (client_read, client_write) = tokio::io::split(client_io);
    let client = Client {
        lines: BufReader::new(client_read).lines(),
        writer: client_write,
        next_id: 1,
    };
    (client, Transport::new(server_read, server_write))
}

/// The client end of a connection.
pub struct Client {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    next_id: i64,
}

impl Client {
    /// Sends one raw line.
    pub async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Sends a notification.
    pub async fn notify(&mut self, method: &str) {
        let message = json!({"jsonrpc": "2.0", "method": method});
        self.send_line(&message.to_string()).await;
    }

    /// Sends a request without waiting for the reply. Returns its id.
    pub async fn send_request(&mut self, method: &str, params: Value) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        let message = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        self.send_line(&message.to_string()).await;
        id
    }

    /// Sends a `tools/call` request without waiting for the reply.
    pub async fn send_call(&mut self, name: &str, arguments: Value) -> i64 {
        self.send_request("tools/call", json!({"name": name, "arguments": arguments}))
            .await
    }

    /// Reads the next message, or `None` once the server closed the
    /// connection.
    pub async fn recv(&mut self) -> Option<Value> {
        let line = self.lines.next_line().await.unwrap()?;
        Some(serde_json::from_str(&line).unwrap())
    }

    /// Reads messages until the reply to `id`, skipping notifications.
    pub async fn reply_to(&mut self, id: i64) -> Value {
        loop {
            let message = self.recv().await.expect("connection closed before reply");
            if message["id"] == id {
                return message;
            }
            assert!(
                message.get("id").is_none(),
                "unexpected reply while waiting for {id}: {message}"
            );
        }
    }

    /// Sends a request and waits for its reply.
    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.send_request(method, params).await;
        self.reply_to(id).await
    }

    /// Performs the handshake and returns the `initialize` result.
    pub async fn initialize(&mut self) -> Value {
        let reply = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "test-client", "version": "1.0.0"}
                }),
            )
            .await;
        self.notify("notifications/initialized").await;
        reply["result"].clone()
    }

    /// Calls a tool and returns the `tools/call` result.
    pub async fn call(&mut self, name: &str, arguments: Value) -> Value {
        let id = self.send_call(name, arguments).await;
        self.reply_to(id).await["result"].clone()
    }

    /// Stops sending. The server sees end of input.
    pub async fn close(&mut self) {
        self.writer.shutdown().await.unwrap();
    }
}

/// The text of the first content item of a tool result.
pub fn first_text(result: &Value) -> &str {
    result["content"][0]["text"].as_str().unwrap_or_default()
}

/// Whether a tool result reports a failure.
pub fn is_error(result: &Value) -> bool {
    result["isError"].as_bool().unwrap_or(false)
}
