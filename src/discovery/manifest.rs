//! Unit manifests.
//!
//! A unit is one `<unit>.json` file in the tools directory:
//!
//! ```json
//! {
//!   "module": "calculator",
//!   "tools": ["add", "multiply"],
//!   "disabled": false
//! }
//! ```
//!
//! Every field is optional and an empty file is an empty manifest, so
//! `touch tools/calculator.json` loads the whole calculator module.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading a unit.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest could not be read.
    #[error("failed to read unit manifest {path}")]
    Read {
        /// Manifest path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid JSON or has unknown fields.
    #[error("failed to parse unit manifest {path}")]
    Parse {
        /// Manifest path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The manifest names a module that is not in the catalog.
    #[error("unknown tool module '{module}' (available: {available})")]
    UnknownModule {
        /// The requested module.
        module: String,
        /// Comma-separated catalog module names.
        available: String,
    },

    /// The module's registration entry point panicked.
    #[error("module '{module}' panicked during registration: {message}")]
    RegistrationPanicked {
        /// The module.
        module: String,
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Parsed contents of a unit manifest.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitManifest {
    /// Catalog module to load; defaults to the unit name.
    #[serde(default)]
    pub module: Option<String>,

    /// Tools to register from the module; all of them when absent.
    #[serde(default)]
    pub tools: Option<Vec<String>>,

    /// Skip this unit entirely.
    #[serde(default)]
    pub disabled: bool,
}

impl UnitManifest {
    /// Reads and parses a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Read`] or [`ManifestError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses manifest text. Blank text is an empty manifest.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed input.
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(content)
    }

    /// The catalog module this unit loads.
    #[must_use]
    pub fn module_name<'a>(&'a self, unit: &'a str) -> &'a str {
        self.module.as_deref().unwrap_or(unit)
    }

    /// Whether the unit's allow-list admits `tool`.
    #[must_use]
    pub fn allows(&self, tool: &str) -> bool {
        self.tools
            .as_ref()
            .map_or(true, |tools| tools.iter().any(|t| t == tool))
    }
}
