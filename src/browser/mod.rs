//! Browser automation seam.
//!
//! The session manager and the browser tools only see these traits. Two
//! drivers implement them:
//!
//! - [`webdriver::WebDriverLauncher`] speaks the W3C WebDriver protocol to a
//!   chromedriver/geckodriver/Selenium endpoint over HTTP.
//! - [`memory::MemoryDriver`] is an in-process scripted browser used by the
//!   test suite and for dry runs without a real browser.

pub mod memory;
pub mod webdriver;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::{BrowserConfig, BrowserDriverKind};

/// Errors reported by a browser driver.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The driver endpoint could not be reached or answered garbage.
    #[error("browser driver request failed")]
    Http(#[from] reqwest::Error),

    /// The driver answered with a WebDriver error object.
    #[error("browser driver error '{error}': {message}")]
    Driver {
        /// WebDriver error code, e.g. `no such window`.
        error: String,
        /// Driver-supplied message.
        message: String,
    },

    /// No element matched the selector.
    #[error("no element matches '{selector}'")]
    ElementNotFound {
        /// The selector that was tried.
        selector: String,
    },

    /// The driver answered with an unexpected payload.
    #[error("unexpected browser driver response: {0}")]
    Protocol(String),

    /// Image data from the driver was not valid base64.
    #[error("invalid screenshot data")]
    Decode(#[from] base64::DecodeError),

    /// The browser has been closed.
    #[error("browser is closed")]
    Closed,
}

/// Resolves with the first page opened after a watch started.
pub type NewPageWatch = Pin<Box<dyn Future<Output = Result<Arc<dyn Page>, BrowserError>> + Send>>;

/// Launches browsers.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Starts a new browser.
    async fn launch(&self) -> Result<Arc<dyn Browser>, BrowserError>;
}

/// A running browser.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Opens a page. The first call may reuse the browser's initial window.
    async fn new_page(&self) -> Result<Arc<dyn Page>, BrowserError>;

    /// Starts watching for new pages.
    ///
    /// Pages opened after this call returns resolve the watch; the caller
    /// bounds it with a timeout.
    async fn watch_new_page(&self) -> Result<NewPageWatch, BrowserError>;

    /// Shuts the browser down.
    async fn close(&self) -> Result<(), BrowserError>;
}

/// One page (tab or window) of a browser.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigates to `url`.
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    /// Current URL.
    async fn url(&self) -> Result<String, BrowserError>;

    /// Document title.
    async fn title(&self) -> Result<String, BrowserError>;

    /// Serialised document HTML.
    async fn content(&self) -> Result<String, BrowserError>;

    /// Waits until the document has finished loading.
    async fn wait_for_load(&self) -> Result<(), BrowserError>;

    /// Waits until an element matches `selector`. Unbounded; callers apply a
    /// timeout.
    async fn wait_for_selector(&self, selector: &str) -> Result<(), BrowserError>;

    /// Clicks the first element matching a CSS selector.
    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    /// Clicks the innermost element whose text contains `text`.
    async fn click_text(&self, text: &str) -> Result<(), BrowserError>;

    /// Replaces the value of an input field.
    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError>;

    /// Evaluates a script. Function expressions are invoked.
    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError>;

    /// PNG screenshot of the page, or of one element.
    async fn screenshot(&self, selector: Option<&str>) -> Result<Vec<u8>, BrowserError>;

    /// PNG screenshots of up to `limit` elements matching `selector`.
    async fn element_screenshots(
        &self,
        selector: &str,
        limit: usize,
    ) -> Result<Vec<Vec<u8>>, BrowserError>;

    /// Inner HTML of the first element matching `selector`.
    async fn inner_html(&self, selector: &str) -> Result<String, BrowserError>;
}

/// Builds the driver selected by the configuration.
#[must_use]
pub fn driver_from_config(config: &BrowserConfig, http: reqwest::Client) -> Arc<dyn BrowserDriver> {
    match config.driver {
        BrowserDriverKind::WebDriver => Arc::new(webdriver::WebDriverLauncher::new(http, config)),
        BrowserDriverKind::Memory => Arc::new(memory::MemoryDriver::new()),
    }
}

/// Script that collects the distinct visible text of leaf-ish elements.
pub const VISIBLE_TEXT_SCRIPT: &str = r"() => {
    const uniqueTexts = new Set();
    for (const element of document.querySelectorAll('*')) {
        if (element.offsetWidth > 0 || element.offsetHeight > 0) {
            if (element.querySelectorAll('*').length <= 3) {
                const innerText = element.innerText ? element.innerText.trim() : '';
                if (innerText && innerText.length <= 1000) {
                    uniqueTexts.add(innerText);
                }
                const value = element.getAttribute('value');
                if (value) {
                    uniqueTexts.add(value);
                }
            }
        }
    }
    return Array.from(uniqueTexts);
}";

/// Runs [`VISIBLE_TEXT_SCRIPT`] and returns the texts.
///
/// # Errors
///
/// Propagates driver errors.
pub async fn visible_texts(page: &dyn Page) -> Result<Vec<String>, BrowserError> {
    let value = page.evaluate(VISIBLE_TEXT_SCRIPT).await?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Value::String(s) => vec![s],
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_selection_follows_config() {
        let config = BrowserConfig {
            driver: BrowserDriverKind::Memory,
            ..BrowserConfig::default()
        };
        // Only checks that construction does not touch the network.
        let _driver = driver_from_config(&config, reqwest::Client::new());
    }

    #[tokio::test]
    async fn visible_texts_reads_string_arrays() {
        let driver = memory::MemoryDriver::new();
        let browser = driver.launch().await.unwrap();
        let page = browser.new_page().await.unwrap();
        page.goto("https://example.com").await.unwrap();

        let texts = visible_texts(page.as_ref()).await.unwrap();
        assert_eq!(texts, ["Content of https://example.com"]);
    }

    #[test]
    fn element_not_found_display() {
        let error = BrowserError::ElementNotFound {
            selector: "#x".to_string(),
        };
        assert_eq!(error.to_string(), "no element matches '#x'");
    }
}
