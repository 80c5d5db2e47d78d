//! Server configuration.
//!
//! One JSON file, every section optional. Where it is looked up:
//!
//! 1. the `CONFIG_FILE` argument, which must exist;
//! 2. otherwise `config.json` in [`default_config_dir`]
//!    (`~/.modular-tools-mcp/` on Linux and macOS,
//!    `%USERPROFILE%\.modular-tools-mcp\` on Windows). A missing default file
//!    means built-in defaults.

mod settings;

pub use settings::{
    BrowserConfig, BrowserDriverKind, Config, FileConfig, HttpConfig, LoggingConfig,
    ServerConfig, VisionConfig, WeatherConfig,
};

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// `~/.modular-tools-mcp`, when a home directory is known.
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".modular-tools-mcp"))
}

/// `config.json` inside [`default_config_dir`].
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    Some(default_config_dir()?.join("config.json"))
}

/// Returns the default tool manifest directory.
///
/// Falls back to `./tools` when no home directory is known.
#[must_use]
pub fn default_tools_dir() -> PathBuf {
    default_config_dir().map_or_else(|| PathBuf::from("tools"), |p| p.join("tools"))
}

impl Config {
    /// Returns the configured tool manifest directory, or the default one.
    #[must_use]
    pub fn tools_dir(&self) -> PathBuf {
        self.tools_dir.clone().unwrap_or_else(default_tools_dir)
    }
}

/// Loads the configuration from `path`, or from the default location.
///
/// # Errors
///
/// Fails when an explicit `path` does not exist, or when the chosen file
/// cannot be read, is not valid JSON, or does not pass [`Config::validate`].
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(explicit) if !explicit.exists() => Err(ConfigError::NotFound {
            path: explicit.to_path_buf(),
        }),
        Some(explicit) => read_config_file(explicit),
        None => match default_config_path() {
            Some(default) if default.is_file() => read_config_file(&default),
            _ => Ok(Config::default()),
        },
    }
}

fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config =
        serde_json::from_str(&text).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_locations_live_under_the_home_directory() {
        let dir = default_config_dir().unwrap();
        assert!(dir.ends_with(".modular-tools-mcp"));
        assert_eq!(default_config_path().unwrap(), dir.join("config.json"));
        assert_eq!(default_tools_dir(), dir.join("tools"));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let err = load_config(Some(&missing)).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "tools_dir": "/opt/tools", "files": { "max_chars": 7 } }"#)
            .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.tools_dir(), PathBuf::from("/opt/tools"));
        assert_eq!(config.files.max_chars, 7);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn invalid_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "server": { "tool_timeout_secs": 0 } }"#).unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn example_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/example-config.json");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.browser.browser_name, "chrome");
        assert_eq!(config.weather.user_agent, "MCP Weather Tool/1.0");
    }
}
