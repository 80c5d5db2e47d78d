//! Newline-delimited JSON-RPC transport.
//!
//! - Messages are UTF-8 encoded JSON-RPC, one per line
//! - Outgoing messages never contain embedded newlines
//! - Blank input lines are ignored
//!
//! [`Transport::stdio`] is the MCP stdio transport (stdin in, stdout out,
//! stderr left to logging). Any other async byte stream works the same way,
//! which is how the server is driven over in-memory pipes in tests.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

use crate::mcp::protocol::{parse_message, IncomingMessage, JsonRpcError, OutgoingMessage};

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Reading or writing the underlying stream failed.
    #[error("transport I/O failed")]
    Io(#[from] io::Error),

    /// A line was not a JSON-RPC 2.0 message. Carries the error response
    /// to send back before closing.
    #[error("malformed message: {}", .response.error.message)]
    Malformed {
        /// The error response for the client.
        response: JsonRpcError,
    },

    /// An outgoing message could not be serialised.
    #[error("failed to serialise outgoing message")]
    Serialise(#[source] serde_json::Error),
}

/// Reads JSON-RPC messages, one per line.
pub struct MessageReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wraps a byte stream.
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Reads the next message.
    ///
    /// Returns `None` at end of stream. Cancel-safe: a message is either
    /// returned whole or left unread.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Malformed`] for a line that is not a
    /// JSON-RPC 2.0 message and [`TransportError::Io`] if reading fails.
    pub async fn next_message(&mut self) -> Result<Option<IncomingMessage>, TransportError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            return parse_message(line)
                .map(Some)
                .map_err(|response| TransportError::Malformed { response });
        }
    }
}

/// Writes JSON-RPC messages, one per line.
pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    /// Wraps a byte sink.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialises and writes one message, then flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn send(&mut self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let json = serde_json::to_string(message).map_err(TransportError::Serialise)?;

        // serde_json escapes newlines inside strings; compact output has none.
        debug_assert!(
            !json.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flushes and closes the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink cannot be shut down.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// A bidirectional connection to one client.
pub struct Transport<R, W> {
    reader: MessageReader<R>,
    writer: MessageWriter<W>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Transport<R, W> {
    /// Creates a transport over a reader and a writer.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: MessageReader::new(reader),
            writer: MessageWriter::new(writer),
        }
    }

    /// Splits the transport so both halves can be used independently.
    pub fn into_split(self) -> (MessageReader<R>, MessageWriter<W>) {
        (self.reader, self.writer)
    }
}

impl Transport<tokio::io::Stdin, tokio::io::Stdout> {
    /// The MCP stdio transport.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}
