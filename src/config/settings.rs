//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.
//! Every section is optional; an empty object is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Directory holding the tool unit manifests.
    #[serde(default)]
    pub tools_dir: Option<PathBuf>,

    /// Request-serving settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Browser automation settings.
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Shared outbound HTTP settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Weather API settings.
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Vision model settings.
    #[serde(default)]
    pub vision: VisionConfig,

    /// File tool settings.
    #[serde(default)]
    pub files: FileConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("server.tool_timeout_secs", self.server.tool_timeout_secs),
            (
                "browser.navigation_timeout_secs",
                self.browser.navigation_timeout_secs,
            ),
            ("browser.new_page_watch_ms", self.browser.new_page_watch_ms),
            ("http.timeout_secs", self.http.timeout_secs),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::ValidationError {
                    message: format!("'{field}' must be greater than zero"),
                });
            }
        }

        let endpoints = [
            ("browser.webdriver_url", &self.browser.webdriver_url),
            ("weather.api_base", &self.weather.api_base),
            ("vision.base_url", &self.vision.base_url),
        ];
        for (field, value) in endpoints {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                return Err(ConfigError::ValidationError {
                    message: format!("'{field}' must be an http(s) URL, got '{value}'"),
                });
            }
        }

        if !(0.0..=2.0).contains(&self.vision.temperature) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid vision temperature {}. Must be between 0 and 2",
                    self.vision.temperature
                ),
            });
        }

        if self.files.max_chars == 0 {
            return Err(ConfigError::ValidationError {
                message: "'files.max_chars' must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Request-serving configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Upper bound on a single tool call, in seconds.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

impl ServerConfig {
    /// Returns the tool call budget as a [`Duration`].
    #[must_use]
    pub const fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

const fn default_tool_timeout() -> u64 {
    120
}

/// Which browser driver backs the session manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserDriverKind {
    /// A W3C WebDriver endpoint (chromedriver, geckodriver, Selenium).
    #[default]
    WebDriver,
    /// The in-process scripted driver.
    Memory,
}

/// Browser automation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserConfig {
    /// Driver backend.
    #[serde(default)]
    pub driver: BrowserDriverKind,

    /// Base URL of the WebDriver server.
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    /// Browser requested from the WebDriver server.
    #[serde(default = "default_browser_name")]
    pub browser_name: String,

    /// Run the browser without a window.
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Page navigation budget in seconds.
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// How long a click waits for a new page to open, in milliseconds.
    #[serde(default = "default_new_page_watch")]
    pub new_page_watch_ms: u64,
}

impl BrowserConfig {
    /// Returns the navigation budget as a [`Duration`].
    #[must_use]
    pub const fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    /// Returns the new-page watch window as a [`Duration`].
    #[must_use]
    pub const fn new_page_watch(&self) -> Duration {
        Duration::from_millis(self.new_page_watch_ms)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            driver: BrowserDriverKind::default(),
            webdriver_url: default_webdriver_url(),
            browser_name: default_browser_name(),
            headless: default_true(),
            navigation_timeout_secs: default_navigation_timeout(),
            new_page_watch_ms: default_new_page_watch(),
        }
    }
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_browser_name() -> String {
    "chrome".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_navigation_timeout() -> u64 {
    30
}

const fn default_new_page_watch() -> u64 {
    3000
}

/// Shared outbound HTTP configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// User agent for requests that don't set their own.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl HttpConfig {
    /// Returns the per-request timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

const fn default_http_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("modular-tools-mcp/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Weather API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeatherConfig {
    /// Base URL of the National Weather Service API.
    #[serde(default = "default_weather_api")]
    pub api_base: String,

    /// User agent the API requires on every request.
    #[serde(default = "default_weather_agent")]
    pub user_agent: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_base: default_weather_api(),
            user_agent: default_weather_agent(),
        }
    }
}

fn default_weather_api() -> String {
    "https://api.weather.gov".to_string()
}

fn default_weather_agent() -> String {
    "MCP Weather Tool/1.0".to_string()
}

/// Vision model configuration (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisionConfig {
    /// Base URL up to and including the API version, e.g. `http://host:30000/v1`.
    #[serde(default = "default_vision_url")]
    pub base_url: String,

    /// Model name sent with each request.
    #[serde(default = "default_vision_model")]
    pub model: String,

    /// Optional bearer token.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Sampling temperature.
    #[serde(default = "default_vision_temperature")]
    pub temperature: f64,

    /// Completion length cap.
    #[serde(default = "default_vision_max_tokens")]
    pub max_tokens: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: default_vision_url(),
            model: default_vision_model(),
            api_key: None,
            temperature: default_vision_temperature(),
            max_tokens: default_vision_max_tokens(),
        }
    }
}

fn default_vision_url() -> String {
    "http://localhost:30000/v1".to_string()
}

fn default_vision_model() -> String {
    "qwen-vl".to_string()
}

const fn default_vision_temperature() -> f64 {
    0.1
}

const fn default_vision_max_tokens() -> u32 {
    1024
}

/// File tool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Characters returned by `read_file` before truncating.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

const fn default_max_chars() -> usize {
    10_000
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r"{}";
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.tools_dir.is_none());
        assert_eq!(config.browser.driver, BrowserDriverKind::WebDriver);
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "tools_dir": "/srv/tools",
            "server": { "tool_timeout_secs": 60 },
            "browser": {
                "driver": "memory",
                "webdriver_url": "http://127.0.0.1:9515",
                "browser_name": "firefox",
                "headless": false,
                "navigation_timeout_secs": 10,
                "new_page_watch_ms": 500
            },
            "http": { "timeout_secs": 5, "user_agent": "test-agent" },
            "weather": { "api_base": "http://localhost:8080", "user_agent": "wx" },
            "vision": {
                "base_url": "http://localhost:30000/v1",
                "model": "llava",
                "api_key": "secret",
                "temperature": 0.5,
                "max_tokens": 256
            },
            "files": { "max_chars": 42 },
            "logging": { "level": "debug" }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.tools_dir, Some(PathBuf::from("/srv/tools")));
        assert_eq!(config.server.tool_timeout(), Duration::from_secs(60));
        assert_eq!(config.browser.driver, BrowserDriverKind::Memory);
        assert!(!config.browser.headless);
        assert_eq!(config.browser.new_page_watch(), Duration::from_millis(500));
        assert_eq!(config.vision.model, "llava");
        assert_eq!(config.vision.api_key.as_deref(), Some("secret"));
        assert_eq!(config.files.max_chars, 42);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn browser_config_defaults() {
        let config = BrowserConfig::default();
        assert_eq!(config.webdriver_url, "http://localhost:4444");
        assert!(config.headless);
        assert_eq!(config.navigation_timeout(), Duration::from_secs(30));
        assert_eq!(config.new_page_watch(), Duration::from_secs(3));
    }

    #[test]
    fn http_and_file_defaults() {
        assert_eq!(HttpConfig::default().timeout_secs, 30);
        assert!(HttpConfig::default().user_agent.starts_with("modular-tools-mcp/"));
        assert_eq!(FileConfig::default().max_chars, 10_000);
        assert_eq!(WeatherConfig::default().api_base, "https://api.weather.gov");
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
    }

    #[test]
    fn reject_zero_timeout() {
        let json = r#"{ "http": { "timeout_secs": 0 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("http.timeout_secs"));
    }

    #[test]
    fn reject_non_http_endpoint() {
        let json = r#"{ "browser": { "webdriver_url": "localhost:4444" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_out_of_range_temperature() {
        let json = r#"{ "vision": { "temperature": 3.5 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{
            "unknown_field": "value"
        }"#;

        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn reject_unknown_driver() {
        let json = r#"{ "browser": { "driver": "selenium-grid" } }"#;
        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
