//! Error types for modular-tools-mcp.
//!
//! Configuration errors are fatal at startup. Tool errors never are: the
//! dispatcher turns every [`ToolError`] into a text content item so the
//! serving loop survives handler failures.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::browser::BrowserError;
use crate::session::SessionError;

/// Why the configuration could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading the file failed.
    #[error("cannot read config {path}")]
    ReadError {
        /// File that was read.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("cannot parse config {path}")]
    ParseError {
        /// File that was parsed.
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An explicitly named file does not exist.
    #[error("config file {path} does not exist")]
    NotFound {
        /// The missing file.
        path: PathBuf,
    },

    /// A setting is out of range.
    #[error("invalid configuration: {message}")]
    ValidationError {
        /// Which setting, and why.
        message: String,
    },

    /// The shared HTTP client could not be built from the configuration.
    #[error("failed to build HTTP client")]
    HttpClient {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

/// Errors raised by a tool handler while serving a call.
#[derive(Error, Debug)]
pub enum ToolError {
    /// A required argument was not supplied.
    #[error("missing required argument '{name}'")]
    MissingArgument {
        /// Argument name.
        name: String,
    },

    /// An argument was supplied with the wrong shape.
    #[error("invalid argument '{name}': {message}")]
    InvalidArgument {
        /// Argument name.
        name: String,
        /// What was wrong with it.
        message: String,
    },

    /// The browser session could not serve the operation.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The browser driver reported a failure.
    #[error(transparent)]
    Browser(#[from] BrowserError),

    /// An outbound HTTP request failed.
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// A filesystem operation failed.
    #[error("{context}")]
    Io {
        /// What was being attempted.
        context: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// An operation did not finish within its time budget.
    #[error("{operation} timed out after {}s", .after.as_secs_f32())]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The budget that was exceeded.
        after: Duration,
    },

    /// The tool ran but could not produce a result.
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    /// Creates an [`ToolError::InvalidArgument`].
    #[must_use]
    pub fn invalid(name: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// Creates an [`ToolError::Io`] with context.
    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
