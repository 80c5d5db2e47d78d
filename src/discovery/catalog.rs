//! The closed set of tool modules a unit can load.

use std::sync::Arc;

use super::Registrar;
use crate::tools::browser::BrowserModule;
use crate::tools::calculator::CalculatorModule;
use crate::tools::files::FilesModule;
use crate::tools::vision::VisionModule;
use crate::tools::weather::WeatherModule;
use crate::tools::web_content::WebContentModule;
use crate::tools::ToolContext;

/// A loadable group of tools.
///
/// Loading is two-phase: discovery resolves the module from a unit manifest,
/// then calls [`ToolModule::register`] with a registrar bound to that unit.
/// Nothing registers itself.
pub trait ToolModule: Send + Sync {
    /// Module name, as written in unit manifests.
    fn name(&self) -> &'static str;

    /// Registers the module's handlers.
    fn register(&self, ctx: &ToolContext, registrar: &mut Registrar<'_>);
}

/// Modules available to discovery, by name.
#[derive(Clone, Default)]
pub struct Catalog {
    modules: Vec<Arc<dyn ToolModule>>,
}

impl Catalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in module.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new()
            .with(CalculatorModule)
            .with(FilesModule)
            .with(WeatherModule)
            .with(BrowserModule)
            .with(WebContentModule)
            .with(VisionModule)
    }

    /// Adds a module. A later module with the same name is never reached.
    #[must_use]
    pub fn with(mut self, module: impl ToolModule + 'static) -> Self {
        self.modules.push(Arc::new(module));
        self
    }

    /// Finds a module by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolModule>> {
        self.modules.iter().find(|m| m.name() == name)
    }

    /// Module names in catalog order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }
}
