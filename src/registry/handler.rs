//! The tool handler contract and the content it produces.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::registry::InputSchema;

/// A concrete tool implementation.
///
/// Handlers are registered through [`crate::discovery::Registrar`] and invoked
/// by the dispatcher. Errors returned from [`ToolHandler::handle`] are turned
/// into text content by the dispatcher, never into protocol errors.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Schema for the tool's arguments.
    fn input_schema(&self) -> InputSchema;

    /// Whether the tool operates on the shared browser session.
    ///
    /// The handler does its own session locking. The dispatcher only logs the
    /// flag and, when such a call times out, warns that the session may have
    /// been left mid-operation.
    fn is_stateful(&self) -> bool {
        false
    }

    /// Serves one call.
    async fn handle(&self, name: &str, arguments: &Arguments)
        -> Result<Vec<ContentItem>, ToolError>;
}

/// One unit of tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Base64-encoded image data.
    Image {
        /// Base64 payload.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// A resource embedded inline.
    #[serde(rename = "resource")]
    EmbeddedResource {
        /// The resource contents.
        resource: ResourceContents,
    },
}

impl ContentItem {
    /// Creates a text item.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Creates a PNG image item from raw bytes.
    #[must_use]
    pub fn png(bytes: &[u8]) -> Self {
        Self::Image {
            data: BASE64_STANDARD.encode(bytes),
            mime_type: "image/png".to_string(),
        }
    }

    /// Returns the text if this is a text item.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Contents of an embedded resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// Resource URI.
    pub uri: String,
    /// MIME type, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Text payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Tool call arguments.
///
/// A missing or `null` argument object is treated as empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Map<String, Value>);

impl From<Value> for Arguments {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

impl Arguments {
    /// Returns the raw value of an argument.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    /// A required string argument.
    ///
    /// # Errors
    ///
    /// Fails if the argument is absent or not a string.
    pub fn require_str(&self, name: &str) -> Result<&str, ToolError> {
        self.optional_str(name)?
            .ok_or_else(|| ToolError::MissingArgument {
                name: name.to_string(),
            })
    }

    /// An optional string argument.
    ///
    /// # Errors
    ///
    /// Fails if the argument is present but not a string.
    pub fn optional_str(&self, name: &str) -> Result<Option<&str>, ToolError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(ToolError::invalid(name, "expected a string")),
        }
    }

    /// A required number; numeric strings are accepted.
    ///
    /// # Errors
    ///
    /// Fails if the argument is absent or not numeric.
    pub fn require_f64(&self, name: &str) -> Result<f64, ToolError> {
        self.optional_f64(name)?
            .ok_or_else(|| ToolError::MissingArgument {
                name: name.to_string(),
            })
    }

    /// An optional number; numeric strings are accepted.
    ///
    /// # Errors
    ///
    /// Fails if the argument is present but not numeric.
    pub fn optional_f64(&self, name: &str) -> Result<Option<f64>, ToolError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| ToolError::invalid(name, "expected a number")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| ToolError::invalid(name, "expected a number")),
            Some(_) => Err(ToolError::invalid(name, "expected a number")),
        }
    }

    /// An optional non-negative integer; integral floats and numeric strings
    /// are accepted.
    ///
    /// # Errors
    ///
    /// Fails if the argument is present but not a non-negative integer.
    pub fn optional_u64(&self, name: &str) -> Result<Option<u64>, ToolError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) if n.as_u64().is_some() => Ok(n.as_u64()),
            Some(Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| ToolError::invalid(name, "expected a non-negative integer")),
            Some(Value::Number(n)) => match n.as_f64() {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // range-checked above
                Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= 9.0e15 => Ok(Some(f as u64)),
                _ => Err(ToolError::invalid(name, "expected a non-negative integer")),
            },
            Some(_) => Err(ToolError::invalid(name, "expected a non-negative integer")),
        }
    }

    /// An optional boolean.
    ///
    /// # Errors
    ///
    /// Fails if the argument is present but not a boolean.
    pub fn optional_bool(&self, name: &str) -> Result<Option<bool>, ToolError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(ToolError::invalid(name, "expected a boolean")),
        }
    }

    /// An optional list of strings.
    ///
    /// # Errors
    ///
    /// Fails if the argument is present but not an array of strings.
    pub fn optional_str_list(&self, name: &str) -> Result<Option<Vec<String>>, ToolError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ToolError::invalid(name, "expected an array of strings"))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(ToolError::invalid(name, "expected an array of strings")),
        }
    }
}
