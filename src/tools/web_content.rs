//! `get_dynamic_webpage`: renders a page in a throwaway browser and returns
//! its text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::browser::normalise_url;
use super::html::clean_html;
use super::ToolContext;
use crate::browser::{Browser, BrowserDriver};
use crate::discovery::{error_chain, Registrar, ToolModule};
use crate::error::ToolError;
use crate::registry::{Arguments, ContentItem, InputSchema, ToolHandler};

const SELECTOR_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WAIT: Duration = Duration::from_millis(3000);
const MAX_WAIT: Duration = Duration::from_secs(30);
const MAX_IMAGES: usize = 10;
const MAX_TEXT_CHARS: usize = 10_000;

/// The `web_content` tool module.
pub struct WebContentModule;

impl ToolModule for WebContentModule {
    fn name(&self) -> &'static str {
        "web_content"
    }

    fn register(&self, ctx: &ToolContext, registrar: &mut Registrar<'_>) {
        registrar.register(Arc::new(DynamicWebpageTool {
            browsers: Arc::clone(&ctx.browsers),
            navigation_timeout: ctx.config.browser.navigation_timeout(),
        }));
    }
}

/// Fetches a page through a browser so scripts run before the text is read.
pub struct DynamicWebpageTool {
    browsers: Arc<dyn BrowserDriver>,
    navigation_timeout: Duration,
}

struct FetchRequest<'a> {
    url: String,
    wait: Duration,
    selector: Option<&'a str>,
    include_images: bool,
}

#[async_trait]
impl ToolHandler for DynamicWebpageTool {
    fn name(&self) -> &'static str {
        "get_dynamic_webpage"
    }

    fn description(&self) -> &'static str {
        "Fetch a web page with a headless browser and return its rendered text"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::object()
            .required("url", "string", "URL of the page")
            .optional(
                "wait_time",
                "integer",
                "Milliseconds to wait after loading (default: 3000, at most 30000)",
            )
            .optional(
                "wait_for_selector",
                "string",
                "CSS selector to wait for before reading the page",
            )
            .optional(
                "include_images",
                "boolean",
                "Also return screenshots of the page's images (default: false)",
            )
    }

    async fn handle(&self, _name: &str, arguments: &Arguments) -> Result<Vec<ContentItem>, ToolError> {
        let request = FetchRequest {
            url: normalise_url(arguments.require_str("url")?),
            wait: requested_wait(arguments)?,
            selector: arguments.optional_str("wait_for_selector")?,
            include_images: arguments.optional_bool("include_images")?.unwrap_or(false),
        };

        let browser = self.browsers.launch().await?;
        let guard = CloseOnDrop(Some(Arc::clone(&browser)));
        let result = self.fetch(browser.as_ref(), &request).await;
        guard.close().await;
        result
    }
}

/// `wait_time` in milliseconds, capped at [`MAX_WAIT`].
fn requested_wait(arguments: &Arguments) -> Result<Duration, ToolError> {
    Ok(arguments
        .optional_u64("wait_time")?
        .map_or(DEFAULT_WAIT, Duration::from_millis)
        .min(MAX_WAIT))
}

/// Owns the page-fetch browser. If the call is dropped before
/// [`CloseOnDrop::close`] runs, the close is spawned instead.
struct CloseOnDrop(Option<Arc<dyn Browser>>);

impl CloseOnDrop {
    async fn close(mut self) {
        if let Some(browser) = self.0.take() {
            close_browser(browser).await;
        }
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let Some(browser) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!("Page fetch abandoned, closing its browser in the background");
                runtime.spawn(close_browser(browser));
            }
            Err(_) => tracing::warn!("Page fetch abandoned outside a runtime, browser left open"),
        }
    }
}

async fn close_browser(browser: Arc<dyn Browser>) {
    if let Err(e) = browser.close().await {
        tracing::warn!(error = %e, "Failed to close page-fetch browser");
    }
}

impl DynamicWebpageTool {
    async fn fetch(
        &self,
        browser: &dyn Browser,
        request: &FetchRequest<'_>,
    ) -> Result<Vec<ContentItem>, ToolError> {
        let url = &request.url;
        let page = browser.new_page().await?;
        tokio::time::timeout(self.navigation_timeout, page.goto(url))
            .await
            .map_err(|_| ToolError::Timeout {
                operation: format!("navigation to {url}"),
                after: self.navigation_timeout,
            })??;

        if !request.wait.is_zero() {
            tokio::time::sleep(request.wait).await;
        }

        let mut items = Vec::new();
        if let Some(selector) = request.selector {
            let found = tokio::time::timeout(SELECTOR_TIMEOUT, page.wait_for_selector(selector)).await;
            if !matches!(found, Ok(Ok(()))) {
                items.push(ContentItem::text(format!(
                    "Warning: selector '{selector}' was not found on the page; continuing with the available content"
                )));
            }
        }

        let html = page.content().await?;
        let title = page.title().await?;
        items.push(ContentItem::text(format!(
            "Page title: {title}\n\nURL: {url}\n\n"
        )));
        let text = clean_html(&html, MAX_TEXT_CHARS)
            .map_err(|e| ToolError::Failed(format!("could not clean page content: {e}")))?;
        items.push(ContentItem::text(text));

        if request.include_images {
            match page.element_screenshots("img", MAX_IMAGES).await {
                Ok(shots) => items.extend(shots.iter().map(|png| ContentItem::png(png))),
                Err(e) => items.push(ContentItem::text(format!(
                    "Failed to capture images: {}",
                    error_chain(&e)
                ))),
            }
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::memory::MemoryDriver;
    use serde_json::json;

    fn tool(driver: &MemoryDriver) -> DynamicWebpageTool {
        DynamicWebpageTool {
            browsers: Arc::new(driver.clone()),
            navigation_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn returns_title_and_cleaned_text_then_closes() {
        let driver = MemoryDriver::new();
        let out = tool(&driver)
            .handle(
                "get_dynamic_webpage",
                &Arguments::from(json!({"url": "https://example.com", "wait_time": 0})),
            )
            .await
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].as_text().unwrap(),
            "Page title: Title of https://example.com\n\nURL: https://example.com\n\n"
        );
        assert_eq!(
            out[1].as_text().unwrap(),
            "Heading\nContent of https://example.com"
        );
        assert_eq!(driver.launches(), 1);
        assert_eq!(driver.closed(), 1);
    }

    #[tokio::test]
    async fn includes_image_screenshots() {
        let driver = MemoryDriver::new();
        let out = tool(&driver)
            .handle(
                "get_dynamic_webpage",
                &Arguments::from(json!({
                    "url": "example.com",
                    "wait_time": 0,
                    "wait_for_selector": "main",
                    "include_images": true
                })),
            )
            .await
            .unwrap();

        let images = out
            .iter()
            .filter(|item| matches!(item, ContentItem::Image { .. }))
            .count();
        assert_eq!(images, 2);
    }

    #[tokio::test]
    async fn abandoned_fetch_still_closes_the_browser() {
        let driver = MemoryDriver::new();
        let tool = tool(&driver);
        let arguments = Arguments::from(json!({"url": "example.com", "wait_time": 5000}));

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), tool.handle("get_dynamic_webpage", &arguments))
                .await;
        assert!(abandoned.is_err());

        for _ in 0..100 {
            if driver.closed() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(driver.launches(), 1);
        assert_eq!(driver.closed(), 1);
    }

    #[test]
    fn wait_time_defaults_and_is_capped() {
        let wait = |arguments: serde_json::Value| requested_wait(&Arguments::from(arguments)).unwrap();
        assert_eq!(wait(json!({})), DEFAULT_WAIT);
        assert_eq!(wait(json!({"wait_time": 250})), Duration::from_millis(250));
        assert_eq!(wait(json!({"wait_time": 3_600_000})), MAX_WAIT);
    }
}
