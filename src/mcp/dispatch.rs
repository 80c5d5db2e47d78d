//! Tool dispatch.
//!
//! [`ToolDispatcher::call_tool`] is the failure boundary between the protocol
//! loop and handler code. Each invocation runs in its own task under the
//! configured tool timeout, and an error, panic or timeout comes back as an
//! `isError` text result. Only an unknown tool name is reported as
//! [`DispatchError`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::discovery::{error_chain, panic_message};
use crate::mcp::protocol::ToolCallResult;
use crate::registry::{Arguments, CapabilityRegistry, ToolDescriptor};

/// Errors raised before a handler is reached.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// No tool is registered under this name.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

/// Routes tool calls to registered handlers.
///
/// Calls hold a read lock on the registry until their handler finishes, so
/// discovery (which takes the write lock) never rebuilds the registry while a
/// call is in flight.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<RwLock<CapabilityRegistry>>,
    timeout: Duration,
}

impl ToolDispatcher {
    /// Creates a dispatcher over `registry`.
    #[must_use]
    pub const fn new(registry: Arc<RwLock<CapabilityRegistry>>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// The registry this dispatcher reads.
    #[must_use]
    pub const fn registry(&self) -> &Arc<RwLock<CapabilityRegistry>> {
        &self.registry
    }

    /// Registered descriptors, in registration order.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.registry.read().await.list().cloned().collect()
    }

    /// Invokes the handler registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownTool`] if no complete registration
    /// exists for `name`. No handler is invoked in that case.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, DispatchError> {
        let registry = Arc::clone(&self.registry).read_owned().await;
        let Some((_, bound)) = registry.lookup(name) else {
            return Err(DispatchError::UnknownTool(name.to_string()));
        };
        let handler = Arc::clone(&bound.handler);
        let stateful = handler.is_stateful();
        debug!(tool = %name, unit = %bound.origin, stateful, "Calling tool");

        let tool = name.to_string();
        let arguments = Arguments::from(arguments);
        let mut task = tokio::spawn(async move {
            let _registry = registry;
            handler.handle(&tool, &arguments).await
        });

        let result = match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(Ok(content))) => ToolCallResult::success(content),
            Ok(Ok(Err(e))) => {
                let message = error_chain(&e);
                warn!(tool = %name, error = %message, "Tool failed");
                ToolCallResult::error(format!("Error executing tool {name}: {message}"))
            }
            Ok(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    panic_message(&*join_error.into_panic())
                } else {
                    "task was cancelled".to_string()
                };
                warn!(tool = %name, error = %message, "Tool panicked");
                ToolCallResult::error(format!("Error executing tool {name}: {message}"))
            }
            Err(_) => {
                task.abort();
                warn!(tool = %name, timeout = ?self.timeout, stateful, "Tool timed out");
                let mut message = format!(
                    "Error executing tool {name}: timed out after {:?}",
                    self.timeout
                );
                if stateful {
                    message.push_str("; the shared browser session may be left mid-operation");
                }
                ToolCallResult::error(message)
            }
        };
        Ok(result)
    }
}
