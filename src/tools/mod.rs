//! Built-in tool modules.
//!
//! Each module exposes a [`crate::discovery::ToolModule`] that registers its
//! handlers when a discovery unit names it. Handlers share collaborators
//! through [`ToolContext`].

pub mod browser;
pub mod calculator;
pub mod files;
pub mod html;
pub mod vision;
pub mod weather;
pub mod web_content;

use std::sync::Arc;

use crate::browser::{driver_from_config, BrowserDriver};
use crate::config::Config;
use crate::error::ConfigError;
use crate::session::SessionManager;

/// Collaborators handed to tool modules at registration time.
#[derive(Clone)]
pub struct ToolContext {
    /// The shared browser session.
    pub sessions: Arc<SessionManager>,
    /// Driver for short-lived browsers outside the shared session.
    pub browsers: Arc<dyn BrowserDriver>,
    /// Shared outbound HTTP client.
    pub http: reqwest::Client,
    /// Server configuration.
    pub config: Arc<Config>,
}

impl ToolContext {
    /// Builds the context described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HttpClient`] if the HTTP client cannot be built.
    pub fn from_config(config: Arc<Config>) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(config.http.timeout())
            .user_agent(config.http.user_agent.clone())
            .build()
            .map_err(|source| ConfigError::HttpClient { source })?;
        let browsers = driver_from_config(&config.browser, http.clone());
        Ok(Self::with_driver(config, http, browsers))
    }

    /// Builds a context around an existing browser driver.
    #[must_use]
    pub fn with_driver(
        config: Arc<Config>,
        http: reqwest::Client,
        browsers: Arc<dyn BrowserDriver>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&browsers),
            config.browser.new_page_watch(),
        ));
        Self {
            sessions,
            browsers,
            http,
            config,
        }
    }
}

/// Renders a number without a fractional part when it is integral.
#[must_use]
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_values_drop_the_fraction() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(format_number(f64::INFINITY), "inf");
    }

    #[test]
    fn context_uses_configured_driver() {
        let mut config = Config::default();
        config.browser.driver = crate::config::BrowserDriverKind::Memory;
        let ctx = ToolContext::from_config(Arc::new(config)).unwrap();
        assert_eq!(ctx.config.files.max_chars, 10_000);
    }
}
