//! Capability registry: the source of truth for `tools/list` and the lookup
//! table for `tools/call`.
//!
//! Descriptors and handlers are kept in two tables keyed by name so that a
//! descriptor registered under a name its handler does not answer to shows up
//! as an orphan on both sides instead of being served.
//!
//! Registration is first-wins: a second registration under an existing name is
//! reported as [`RegisterOutcome::Duplicate`] and changes nothing.

mod descriptor;
mod handler;

pub use descriptor::{InputSchema, PropertySchema, ToolDescriptor};
pub use handler::{Arguments, ContentItem, ResourceContents, ToolHandler};

use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

/// Errors that reject a registration outright.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The descriptor or handler name was empty.
    #[error("tool name must not be empty")]
    EmptyName,
}

/// What happened to a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The tool is now registered.
    Registered,
    /// A tool with this name already exists; the earlier one was kept.
    Duplicate {
        /// Unit that owns the retained registration.
        retained_origin: String,
    },
}

/// A handler together with the discovery unit that registered it.
#[derive(Clone)]
pub struct BoundHandler {
    /// The handler.
    pub handler: Arc<dyn ToolHandler>,
    /// Name of the unit that registered it.
    pub origin: String,
}

impl std::fmt::Debug for BoundHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundHandler")
            .field("name", &self.handler.name())
            .field("origin", &self.origin)
            .finish()
    }
}

/// Names present on only one side of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Descriptors with no handler bound under the same name.
    pub orphan_descriptors: Vec<String>,
    /// Handlers with no descriptor under the same name.
    pub orphan_handlers: Vec<String>,
}

impl ConsistencyReport {
    /// Returns `true` when every descriptor has exactly one handler.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.orphan_descriptors.is_empty() && self.orphan_handlers.is_empty()
    }
}

/// Ordered mapping from tool name to descriptor and handler.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    descriptors: IndexMap<String, ToolDescriptor>,
    handlers: IndexMap<String, BoundHandler>,
}

impl CapabilityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor and its handler.
    ///
    /// The descriptor is keyed by its own name and the handler by
    /// [`ToolHandler::name`]. If either name is already taken nothing is
    /// inserted and the owner of the existing entry is reported.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EmptyName`] if either name is empty.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
        origin: &str,
    ) -> Result<RegisterOutcome, RegistryError> {
        let handler_name = handler.name().to_string();
        if descriptor.name.is_empty() || handler_name.is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let retained = self
            .owner_of(&descriptor.name)
            .or_else(|| self.owner_of(&handler_name));
        if let Some(retained_origin) = retained {
            return Ok(RegisterOutcome::Duplicate { retained_origin });
        }

        self.descriptors.insert(descriptor.name.clone(), descriptor);
        self.handlers.insert(
            handler_name,
            BoundHandler {
                handler,
                origin: origin.to_string(),
            },
        );
        Ok(RegisterOutcome::Registered)
    }

    fn owner_of(&self, name: &str) -> Option<String> {
        if let Some(bound) = self.handlers.get(name) {
            return Some(bound.origin.clone());
        }
        self.descriptors
            .contains_key(name)
            .then(|| "<unbound descriptor>".to_string())
    }

    /// Looks up a tool that has both a descriptor and a handler.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<(&ToolDescriptor, &BoundHandler)> {
        Some((self.descriptors.get(name)?, self.handlers.get(name)?))
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.descriptors.values()
    }

    /// Registered descriptor names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty() && self.handlers.is_empty()
    }

    /// Removes every entry. Only discovery calls this, under the registry
    /// write lock.
    pub fn clear(&mut self) {
        self.descriptors.clear();
        self.handlers.clear();
    }

    /// Finds descriptors without handlers and handlers without descriptors.
    #[must_use]
    pub fn consistency(&self) -> ConsistencyReport {
        ConsistencyReport {
            orphan_descriptors: self
                .descriptors
                .keys()
                .filter(|name| !self.handlers.contains_key(*name))
                .cloned()
                .collect(),
            orphan_handlers: self
                .handlers
                .keys()
                .filter(|name| !self.descriptors.contains_key(*name))
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl ToolHandler for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test handler"
        }

        fn input_schema(&self) -> InputSchema {
            InputSchema::object()
        }

        async fn handle(
            &self,
            _name: &str,
            _arguments: &Arguments,
        ) -> Result<Vec<ContentItem>, ToolError> {
            Ok(vec![ContentItem::text(self.0)])
        }
    }

    fn descriptor(name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor::new(name, description, InputSchema::object())
    }

    #[test]
    fn first_registration_wins() {
        let mut registry = CapabilityRegistry::new();
        let first = registry
            .register(descriptor("add", "first"), Arc::new(Named("add")), "alpha")
            .unwrap();
        let second = registry
            .register(descriptor("add", "second"), Arc::new(Named("add")), "beta")
            .unwrap();

        assert_eq!(first, RegisterOutcome::Registered);
        assert_eq!(
            second,
            RegisterOutcome::Duplicate {
                retained_origin: "alpha".to_string()
            }
        );
        assert_eq!(registry.len(), 1);

        let (desc, bound) = registry.lookup("add").unwrap();
        assert_eq!(desc.description, "first");
        assert_eq!(bound.origin, "alpha");
    }

    #[test]
    fn empty_names_are_rejected() {
        let mut registry = CapabilityRegistry::new();
        let err = registry
            .register(descriptor("", "nameless"), Arc::new(Named("x")), "alpha")
            .unwrap_err();
        assert_eq!(err, RegistryError::EmptyName);
        assert!(registry.is_empty());
    }

    #[test]
    fn list_follows_registration_order() {
        let mut registry = CapabilityRegistry::new();
        for name in ["navigate", "add", "click"] {
            let handler: Arc<dyn ToolHandler> = match name {
                "navigate" => Arc::new(Named("navigate")),
                "add" => Arc::new(Named("add")),
                _ => Arc::new(Named("click")),
            };
            registry
                .register(descriptor(name, name), handler, "unit")
                .unwrap();
        }
        let names: Vec<_> = registry.list().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["navigate", "add", "click"]);
    }

    #[test]
    fn mismatched_names_are_orphans_and_not_served() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                descriptor("alias", "wrong key"),
                Arc::new(Named("real")),
                "unit",
            )
            .unwrap();

        let report = registry.consistency();
        assert!(!report.is_consistent());
        assert_eq!(report.orphan_descriptors, ["alias".to_string()]);
        assert_eq!(report.orphan_handlers, ["real".to_string()]);
        assert!(registry.lookup("alias").is_none());
        assert!(registry.lookup("real").is_none());
    }

    #[test]
    fn clear_empties_both_tables() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(descriptor("add", "x"), Arc::new(Named("add")), "unit")
            .unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.consistency().is_consistent());
    }
}
