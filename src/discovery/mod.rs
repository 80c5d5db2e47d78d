//! Tool discovery.
//!
//! [`Discovery::discover`] rebuilds a [`CapabilityRegistry`] from the unit
//! manifests in the tools directory. Each run clears the registry first, so
//! running it twice over an unchanged directory yields the same tool list.
//!
//! Nothing found on disk is fatal: a missing directory is created, a broken
//! unit is logged and skipped, duplicates and orphans are reported as
//! warnings.

mod catalog;
mod manifest;

pub use catalog::{Catalog, ToolModule};
pub use manifest::{ManifestError, UnitManifest};

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::registry::{CapabilityRegistry, RegisterOutcome, ToolDescriptor, ToolHandler};
use crate::tools::ToolContext;

/// Marker written into a freshly created tools directory.
pub const INDEX_MARKER: &str = "_index.json";

/// A name that was registered more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateRegistration {
    /// Tool name.
    pub name: String,
    /// Unit whose registration was rejected.
    pub rejected_unit: String,
    /// Unit that keeps the name.
    pub retained_unit: String,
}

/// A unit that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    /// Unit name.
    pub unit: String,
    /// Error with its source chain.
    pub error: String,
}

/// Outcome of one discovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Registered tool names in registration order.
    pub registered: Vec<String>,
    /// Rejected duplicate registrations.
    pub duplicates: Vec<DuplicateRegistration>,
    /// Units that failed to load.
    pub failures: Vec<UnitFailure>,
    /// Descriptors without a handler under the same name.
    pub orphan_descriptors: Vec<String>,
    /// Handlers without a descriptor under the same name.
    pub orphan_handlers: Vec<String>,
    /// Whether the tools directory had to be created.
    pub created_dir: bool,
}

/// Registration handle given to a [`ToolModule`] for one unit.
pub struct Registrar<'a> {
    unit: &'a str,
    manifest: &'a UnitManifest,
    registry: &'a mut CapabilityRegistry,
    duplicates: &'a mut Vec<DuplicateRegistration>,
    offered: Vec<String>,
}

impl Registrar<'_> {
    /// Registers a handler under the descriptor it describes.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let descriptor = ToolDescriptor::new(
            handler.name(),
            handler.description(),
            handler.input_schema(),
        );
        self.register_with(descriptor, handler);
    }

    /// Registers a handler under an explicit descriptor.
    ///
    /// Tools outside the unit's allow-list are skipped. A name that is
    /// already taken is recorded as a duplicate and the earlier registration
    /// stays.
    pub fn register_with(&mut self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) {
        self.offered.push(descriptor.name.clone());
        if !self.manifest.allows(&descriptor.name) {
            debug!(unit = %self.unit, tool = %descriptor.name, "Tool not in unit allow-list");
            return;
        }

        let name = descriptor.name.clone();
        match self.registry.register(descriptor, handler, self.unit) {
            Ok(RegisterOutcome::Registered) => {
                debug!(unit = %self.unit, tool = %name, "Registered tool");
            }
            Ok(RegisterOutcome::Duplicate { retained_origin }) => {
                warn!(
                    tool = %name,
                    unit = %self.unit,
                    retained = %retained_origin,
                    "Duplicate tool registration ignored"
                );
                self.duplicates.push(DuplicateRegistration {
                    name,
                    rejected_unit: self.unit.to_string(),
                    retained_unit: retained_origin,
                });
            }
            Err(e) => warn!(unit = %self.unit, error = %e, "Tool registration rejected"),
        }
    }
}

/// Scans the tools directory and populates the registry.
pub struct Discovery {
    dir: PathBuf,
    catalog: Catalog,
    loaded: HashSet<String>,
}

impl Discovery {
    /// Discovery over `dir` with the built-in catalog.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_catalog(dir, Catalog::builtin())
    }

    /// Discovery over `dir` with a custom catalog.
    #[must_use]
    pub fn with_catalog(dir: impl Into<PathBuf>, catalog: Catalog) -> Self {
        Self {
            dir: dir.into(),
            catalog,
            loaded: HashSet::new(),
        }
    }

    /// The tools directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rebuilds `registry` from the tools directory.
    pub fn discover(&mut self, registry: &mut CapabilityRegistry, ctx: &ToolContext) -> DiscoveryReport {
        registry.clear();
        let mut report = DiscoveryReport::default();

        if !self.dir.exists() {
            report.created_dir = true;
            match create_tools_dir(&self.dir) {
                Ok(()) => info!(dir = %self.dir.display(), "Created tools directory"),
                Err(e) => {
                    error!(dir = %self.dir.display(), error = %e, "Failed to create tools directory");
                }
            }
            log_summary(&report);
            return report;
        }

        for (unit, path) in self.units(&mut report) {
            if let Err(e) = self.load_unit(&unit, &path, registry, ctx, &mut report) {
                let chain = error_chain(&e);
                error!(unit = %unit, path = %path.display(), error = %chain, "Failed to load unit");
                report.failures.push(UnitFailure { unit, error: chain });
            }
        }

        report.registered = registry.names();
        let consistency = registry.consistency();
        report.orphan_descriptors = consistency.orphan_descriptors;
        report.orphan_handlers = consistency.orphan_handlers;
        log_summary(&report);
        report
    }

    /// Unit names and manifest paths in lexical order, private units removed.
    fn units(&self, report: &mut DiscoveryReport) -> Vec<(String, PathBuf)> {
        let pattern = Path::new(&glob::Pattern::escape(&self.dir.to_string_lossy()))
            .join("*.json")
            .to_string_lossy()
            .into_owned();

        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                report.failures.push(UnitFailure {
                    unit: self.dir.display().to_string(),
                    error: e.to_string(),
                });
                return Vec::new();
            }
        };

        let mut units: Vec<(String, PathBuf)> = paths
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "Unreadable entry in tools directory");
                    None
                }
            })
            .filter(|path| path.is_file())
            .filter_map(|path| {
                let unit = path.file_stem()?.to_string_lossy().into_owned();
                if unit.starts_with('_') {
                    return None;
                }
                Some((unit, path))
            })
            .collect();
        units.sort();
        units
    }

    fn load_unit(
        &mut self,
        unit: &str,
        path: &Path,
        registry: &mut CapabilityRegistry,
        ctx: &ToolContext,
        report: &mut DiscoveryReport,
    ) -> Result<(), ManifestError> {
        // Phase one: read the manifest from disk and resolve its module.
        let manifest = UnitManifest::load(path)?;
        if manifest.disabled {
            info!(unit, "Unit disabled");
            return Ok(());
        }

        let module_name = manifest.module_name(unit);
        let module = self
            .catalog
            .get(module_name)
            .cloned()
            .ok_or_else(|| ManifestError::UnknownModule {
                module: module_name.to_string(),
                available: self.catalog.names().join(", "),
            })?;

        if self.loaded.insert(unit.to_string()) {
            debug!(unit, module = module.name(), "Loading unit");
        } else {
            info!(unit, module = module.name(), "Reloading unit");
        }

        // Phase two: the module registers through a registrar bound to this unit.
        let mut registrar = Registrar {
            unit,
            manifest: &manifest,
            registry,
            duplicates: &mut report.duplicates,
            offered: Vec::new(),
        };
        catch_unwind(AssertUnwindSafe(|| module.register(ctx, &mut registrar))).map_err(
            |payload| ManifestError::RegistrationPanicked {
                module: module.name().to_string(),
                message: panic_message(payload.as_ref()),
            },
        )?;

        if let Some(tools) = &manifest.tools {
            for tool in tools.iter().filter(|t| !registrar.offered.contains(t)) {
                warn!(unit, tool = %tool, "Allow-listed tool is not provided by the module");
            }
        }
        Ok(())
    }
}

fn create_tools_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(INDEX_MARKER), "")
}

fn log_summary(report: &DiscoveryReport) {
    info!(
        count = report.registered.len(),
        tools = ?report.registered,
        "Discovery finished"
    );
    for name in &report.orphan_descriptors {
        warn!(tool = %name, "Descriptor has no bound handler");
    }
    for name in &report.orphan_handlers {
        warn!(tool = %name, "Handler has no descriptor");
    }
}

/// Renders an error followed by its sources, separated by `: `.
#[must_use]
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(e) = source {
        chain.push_str(": ");
        chain.push_str(&e.to_string());
        source = e.source();
    }
    chain
}

/// Extracts the message from a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
