//! Wire-facing tool descriptors.

use indexmap::IndexMap;
use serde::Serialize;

/// The static, wire-facing view of a tool.
///
/// Serialises to the `tools/list` entry shape:
/// `{"name", "description", "inputSchema"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Object schema for the tool's arguments.
    pub input_schema: InputSchema,
}

impl ToolDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A JSON-Schema-like object schema.
///
/// Properties keep declaration order; required names keep insertion order and
/// never repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    kind: &'static str,
    properties: IndexMap<String, PropertySchema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    required: Vec<String>,
}

impl Default for InputSchema {
    fn default() -> Self {
        Self::object()
    }
}

impl InputSchema {
    /// An object schema with no properties.
    #[must_use]
    pub fn object() -> Self {
        Self {
            kind: "object",
            properties: IndexMap::new(),
            required: Vec::new(),
        }
    }

    /// Adds a required scalar property.
    #[must_use]
    pub fn required(mut self, name: &str, kind: &str, description: &str) -> Self {
        self.properties
            .insert(name.to_string(), PropertySchema::new(kind, description));
        if !self.required.iter().any(|r| r == name) {
            self.required.push(name.to_string());
        }
        self
    }

    /// Adds an optional scalar property.
    #[must_use]
    pub fn optional(mut self, name: &str, kind: &str, description: &str) -> Self {
        self.properties
            .insert(name.to_string(), PropertySchema::new(kind, description));
        self
    }

    /// Adds an optional array property whose items are of `item_kind`.
    #[must_use]
    pub fn optional_array(mut self, name: &str, item_kind: &str, description: &str) -> Self {
        let mut property = PropertySchema::new("array", description);
        property.items = Some(Box::new(PropertySchema {
            kind: item_kind.to_string(),
            description: None,
            items: None,
        }));
        self.properties.insert(name.to_string(), property);
        self
    }

    /// Property schemas in declaration order.
    #[must_use]
    pub const fn properties(&self) -> &IndexMap<String, PropertySchema> {
        &self.properties
    }

    /// Required property names in declaration order.
    #[must_use]
    pub fn required_names(&self) -> &[String] {
        &self.required
    }
}

/// Schema for one property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertySchema {
    /// JSON type name (`string`, `number`, `integer`, `boolean`, `array`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Item schema for arrays.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
}

impl PropertySchema {
    fn new(kind: &str, description: &str) -> Self {
        Self {
            kind: kind.to_string(),
            description: Some(description.to_string()),
            items: None,
        }
    }
}
