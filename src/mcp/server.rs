//! MCP server lifecycle and request routing.
//!
//! 1. **Initialising**: a client connected; discovery builds the registry
//!    once, then the server waits for the `initialize` handshake
//! 2. **Ready**: requests are routed to the dispatcher; `tools/call` runs as
//!    a spawned task so independent calls overlap
//! 3. **Shutdown**: on EOF, a malformed message or a signal the server stops
//!    reading, drains in-flight calls, flushes the writer and closes the
//!    browser session
//!
//! On Unix, `SIGHUP` rebuilds the registry from the tools directory and,
//! once the handshake is done, notifies the client that the tool list changed.
//! Embedders can send the same [`ControlEvent`]s over a channel with
//! [`McpServer::serve_with_events`].

use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, RwLock};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::discovery::{error_chain, Discovery, DiscoveryReport};
use crate::error::ConfigError;
use crate::mcp::dispatch::ToolDispatcher;
use crate::mcp::protocol::{
    IncomingMessage, InitializeParams, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, OutgoingNotification, RequestId, ServerCapabilities,
    ServerInfo, ToolCallParams, ToolCallResult, MCP_PROTOCOL_VERSION,
};
use crate::mcp::transport::{MessageWriter, Transport, TransportError};
use crate::registry::CapabilityRegistry;
use crate::tools::ToolContext;

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No client has connected yet.
    Uninitialized,
    /// Connected; discovery done or in progress, handshake pending.
    Initializing,
    /// Handshake complete, serving requests.
    Ready,
    /// Draining in-flight calls.
    ShuttingDown,
    /// Connection finished.
    Closed,
}

type CallOutcome = (RequestId, ToolCallResult);

/// The MCP tool server.
pub struct McpServer {
    state: ServerState,
    dispatcher: ToolDispatcher,
    discovery: Discovery,
    context: ToolContext,
    /// Negotiated protocol version (set by the handshake).
    protocol_version: Option<String>,
    last_report: Option<DiscoveryReport>,
}

impl McpServer {
    /// Creates a server from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let discovery = Discovery::new(config.tools_dir());
        let context = ToolContext::from_config(Arc::new(config))?;
        Ok(Self::from_parts(context, discovery))
    }

    /// Creates a server from an existing tool context and discovery.
    #[must_use]
    pub fn from_parts(context: ToolContext, discovery: Discovery) -> Self {
        let registry = Arc::new(RwLock::new(CapabilityRegistry::new()));
        let dispatcher = ToolDispatcher::new(registry, context.config.server.tool_timeout());
        Self {
            state: ServerState::Uninitialized,
            dispatcher,
            discovery,
            context,
            protocol_version: None,
            last_report: None,
        }
    }

    /// Returns the current server state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// The protocol version agreed in the handshake.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// The dispatcher serving `tools/list` and `tools/call`.
    #[must_use]
    pub const fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// The tool context handed to tool modules.
    #[must_use]
    pub const fn context(&self) -> &ToolContext {
        &self.context
    }

    /// The report of the most recent discovery run.
    #[must_use]
    pub const fn last_report(&self) -> Option<&DiscoveryReport> {
        self.last_report.as_ref()
    }

    /// Serves the stdio transport until EOF or a shutdown signal.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed or the
    /// connection fails.
    pub async fn run(&mut self) -> Result<(), TransportError> {
        let signals = Signals {
            os: OsSignals::install()?,
            events: None,
        };
        self.serve_with(Transport::stdio(), signals).await
    }

    /// Serves one connection until it closes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Malformed`] after answering a malformed
    /// message, or an I/O error if the connection breaks.
    pub async fn serve<R, W>(&mut self, transport: Transport<R, W>) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.serve_with(transport, Signals::default()).await
    }

    /// Serves one connection, also reacting to events sent on `events`.
    ///
    /// [`ControlEvent::Rediscover`] rebuilds the registry and, once the
    /// handshake is done, sends `notifications/tools/list_changed`.
    /// [`ControlEvent::Shutdown`] stops reading and drains in-flight calls.
    /// Dropping every sender leaves the connection running.
    ///
    /// # Errors
    ///
    /// Same as [`McpServer::serve`].
    pub async fn serve_with_events<R, W>(
        &mut self,
        transport: Transport<R, W>,
        events: mpsc::Receiver<ControlEvent>,
    ) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let signals = Signals {
            os: OsSignals::default(),
            events: Some(events),
        };
        self.serve_with(transport, signals).await
    }

    /// Rebuilds the registry from the tools directory.
    ///
    /// Takes the registry write lock, so it waits for in-flight tool calls
    /// and holds off new ones until the rebuild is done.
    pub async fn rediscover(&mut self) -> DiscoveryReport {
        let report = {
            let mut registry = self.dispatcher.registry().write().await;
            self.discovery.discover(&mut registry, &self.context)
        };
        self.last_report = Some(report.clone());
        report
    }

    async fn serve_with<R, W>(
        &mut self,
        transport: Transport<R, W>,
        mut signals: Signals,
    ) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = transport.into_split();
        self.state = ServerState::Initializing;
        self.protocol_version = None;
        self.rediscover().await;

        let mut calls: JoinSet<CallOutcome> = JoinSet::new();
        let outcome = loop {
            tokio::select! {
                incoming = reader.next_message() => match incoming {
                    Ok(Some(msg)) => {
                        if let Err(e) = self.handle_message(msg, &mut writer, &mut calls).await {
                            break Err(e);
                        }
                    }
                    Ok(None) => {
                        info!("Client closed the connection");
                        break Ok(());
                    }
                    Err(TransportError::Malformed { response }) => {
                        warn!(error = %response.error.message, "Malformed message, closing connection");
                        if let Err(e) = writer.send(&response.clone().into()).await {
                            break Err(e);
                        }
                        break Err(TransportError::Malformed { response });
                    }
                    Err(e) => break Err(e),
                },

                Some(done) = calls.join_next(), if !calls.is_empty() => {
                    if let Err(e) = Self::finish_call(done, &mut writer).await {
                        break Err(e);
                    }
                }

                event = signals.recv() => match event {
                    ControlEvent::Shutdown(source) => {
                        info!(source, "Shutdown requested, initiating graceful shutdown");
                        break Ok(());
                    }
                    ControlEvent::Rediscover => {
                        info!("Rebuilding tool registry");
                        if let Err(e) = self.rediscover_and_notify(&mut writer).await {
                            break Err(e);
                        }
                    }
                },
            }
        };

        self.shutdown(&mut writer, calls).await;
        outcome
    }

    async fn rediscover_and_notify<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut MessageWriter<W>,
    ) -> Result<(), TransportError> {
        self.rediscover().await;
        if self.state == ServerState::Ready {
            writer
                .send(&OutgoingNotification::tools_list_changed().into())
                .await?;
        }
        Ok(())
    }

    async fn shutdown<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut MessageWriter<W>,
        mut calls: JoinSet<CallOutcome>,
    ) {
        self.state = ServerState::ShuttingDown;
        if !calls.is_empty() {
            info!(in_flight = calls.len(), "Waiting for in-flight tool calls");
        }
        while let Some(done) = calls.join_next().await {
            if let Err(e) = Self::finish_call(done, writer).await {
                debug!(error = %error_chain(&e), "Dropped tool result during shutdown");
            }
        }
        if let Err(e) = writer.close().await {
            debug!(error = %error_chain(&e), "Failed to close the writer");
        }
        match self.context.sessions.close().await {
            Ok(true) => info!("Closed browser session"),
            Ok(false) => {}
            Err(e) => warn!(error = %error_chain(&e), "Failed to close browser session"),
        }
        self.state = ServerState::Closed;
    }

    async fn finish_call<W: AsyncWrite + Unpin>(
        done: Result<CallOutcome, JoinError>,
        writer: &mut MessageWriter<W>,
    ) -> Result<(), TransportError> {
        let (id, result) = match done {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Tool call task failed");
                return Ok(());
            }
        };

        let reply = serde_json::to_value(&result)
            .map(|value| JsonRpcResponse::success(id.clone(), value))
            .map_err(|e| {
                error!(error = %e, "Failed to serialise tool call result");
                JsonRpcError::internal_error(id, "Internal error: failed to serialise result")
            });
        writer.send(&reply.into()).await
    }

    async fn handle_message<W: AsyncWrite + Unpin>(
        &mut self,
        msg: IncomingMessage,
        writer: &mut MessageWriter<W>,
        calls: &mut JoinSet<CallOutcome>,
    ) -> Result<(), TransportError> {
        match msg {
            IncomingMessage::Request(req) => self.handle_request(req, writer, calls).await,
            IncomingMessage::Notification(ref notif) => {
                Self::handle_notification(notif);
                Ok(())
            }
        }
    }

    async fn handle_request<W: AsyncWrite + Unpin>(
        &mut self,
        req: JsonRpcRequest,
        writer: &mut MessageWriter<W>,
        calls: &mut JoinSet<CallOutcome>,
    ) -> Result<(), TransportError> {
        debug!(id = %req.id, method = %req.method, "Request");

        let reply = match req.method.as_str() {
            "initialize" => self.handle_initialize(&req),
            "ping" => Ok(JsonRpcResponse::success(req.id.clone(), json!({}))),
            _ if self.state != ServerState::Ready => Err(JsonRpcError::not_initialised(req.id.clone())),
            "tools/list" => Ok(self.handle_tools_list(&req).await),
            "tools/call" => match self.spawn_tool_call(&req, calls) {
                Ok(()) => return Ok(()),
                Err(e) => Err(e),
            },
            "resources/list" => Ok(JsonRpcResponse::success(
                req.id.clone(),
                json!({"resources": []}),
            )),
            "prompts/list" => Ok(JsonRpcResponse::success(
                req.id.clone(),
                json!({"prompts": []}),
            )),
            "resources/read" | "prompts/get" => {
                Err(JsonRpcError::unsupported(req.id.clone(), &req.method))
            }
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        };

        writer.send(&reply.into()).await
    }

    fn handle_notification(notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => debug!("Client finished initialisation"),
            "notifications/cancelled" => {
                debug!(params = ?notif.params, "Ignoring cancellation notification");
            }
            other => debug!(method = %other, "Ignoring unknown notification"),
        }
    }

    fn handle_initialize(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        if self.state != ServerState::Initializing {
            return Err(JsonRpcError::invalid_request(
                Some(req.id.clone()),
                "Server already initialised",
            ));
        }

        let params: InitializeParams = req.params("initialize")?;
        if let Some(client) = &params.client_info {
            info!(
                client = %client.name,
                version = client.version.as_deref().unwrap_or("unknown"),
                requested = %params.protocol_version,
                "Client connected"
            );
        }

        let negotiated_version = MCP_PROTOCOL_VERSION.to_string();
        self.protocol_version = Some(negotiated_version.clone());
        self.state = ServerState::Ready;

        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({
                "protocolVersion": negotiated_version,
                "capabilities": ServerCapabilities::default(),
                "serverInfo": ServerInfo::default(),
            }),
        ))
    }

    async fn handle_tools_list(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        let tools = self.dispatcher.list_tools().await;
        JsonRpcResponse::success(req.id.clone(), json!({ "tools": tools }))
    }

    fn spawn_tool_call(
        &self,
        req: &JsonRpcRequest,
        calls: &mut JoinSet<CallOutcome>,
    ) -> Result<(), JsonRpcError> {
        let params: ToolCallParams = req.params("tool call")?;
        let dispatcher = self.dispatcher.clone();
        let id = req.id.clone();

        calls.spawn(async move {
            let result = match dispatcher.call_tool(&params.name, params.arguments).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %params.name, "Call to unknown tool");
                    ToolCallResult::error(e.to_string())
                }
            };
            (id, result)
        });
        Ok(())
    }
}

/// An out-of-band request to a serving connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Stop serving. Names what asked for it, e.g. `"SIGTERM"`.
    Shutdown(&'static str),
    /// Rebuild the registry and tell the client its tool list changed.
    Rediscover,
}

/// Where control events come from.
#[derive(Default)]
struct Signals {
    os: OsSignals,
    events: Option<mpsc::Receiver<ControlEvent>>,
}

impl Signals {
    async fn recv(&mut self) -> ControlEvent {
        let Self { os, events } = self;
        tokio::select! {
            Some(event) = next_event(events) => event,
            event = os.recv() => event,
        }
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<ControlEvent>>) -> Option<ControlEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Process signals the server reacts to. The default listens for nothing.
#[derive(Default)]
struct OsSignals {
    #[cfg(unix)]
    unix: Option<UnixSignals>,
    #[cfg(not(unix))]
    ctrl_c: bool,
}

#[cfg(unix)]
struct UnixSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

impl OsSignals {
    #[cfg(unix)]
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            unix: Some(UnixSignals {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
            }),
        })
    }

    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)] // matches the Unix signature
    fn install() -> std::io::Result<Self> {
        Ok(Self { ctrl_c: true })
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> ControlEvent {
        let Some(signals) = self.unix.as_mut() else {
            return std::future::pending().await;
        };
        tokio::select! {
            _ = signals.interrupt.recv() => ControlEvent::Shutdown("SIGINT"),
            _ = signals.terminate.recv() => ControlEvent::Shutdown("SIGTERM"),
            _ = signals.hangup.recv() => ControlEvent::Rediscover,
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> ControlEvent {
        if !self.ctrl_c {
            return std::future::pending().await;
        }
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler failed");
            return std::future::pending().await;
        }
        ControlEvent::Shutdown("Ctrl+C")
    }
}
