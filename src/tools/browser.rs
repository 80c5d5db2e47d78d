//! Browser automation tools on the shared session.
//!
//! Every tool here holds the session guard for its whole run, so calls are
//! totally ordered against the single page. `navigate` is the only tool that
//! creates a session; the others fail with "No active browser session" until
//! one exists.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::ToolContext;
use crate::browser::visible_texts;
use crate::discovery::{Registrar, ToolModule};
use crate::error::ToolError;
use crate::registry::{Arguments, ContentItem, InputSchema, ToolHandler};
use crate::session::SessionManager;

/// Characters of page text shown after navigating.
const PREVIEW_CHARS: usize = 200;

/// The `browser` tool module.
pub struct BrowserModule;

impl ToolModule for BrowserModule {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn register(&self, ctx: &ToolContext, registrar: &mut Registrar<'_>) {
        for action in Action::ALL {
            registrar.register(Arc::new(BrowserTool {
                action,
                sessions: Arc::clone(&ctx.sessions),
                navigation_timeout: ctx.config.browser.navigation_timeout(),
            }));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Navigate,
    Click,
    ClickText,
    Fill,
    Evaluate,
    Screenshot,
    GetTextContent,
    GetHtmlContent,
    CloseBrowser,
}

impl Action {
    const ALL: [Self; 9] = [
        Self::Navigate,
        Self::Screenshot,
        Self::Click,
        Self::Fill,
        Self::Evaluate,
        Self::ClickText,
        Self::GetTextContent,
        Self::GetHtmlContent,
        Self::CloseBrowser,
    ];
}

/// One browser operation.
pub struct BrowserTool {
    action: Action,
    sessions: Arc<SessionManager>,
    navigation_timeout: Duration,
}

#[async_trait]
impl ToolHandler for BrowserTool {
    fn name(&self) -> &'static str {
        match self.action {
            Action::Navigate => "navigate",
            Action::Click => "click",
            Action::ClickText => "click_text",
            Action::Fill => "fill",
            Action::Evaluate => "evaluate",
            Action::Screenshot => "screenshot",
            Action::GetTextContent => "get_text_content",
            Action::GetHtmlContent => "get_html_content",
            Action::CloseBrowser => "close_browser",
        }
    }

    fn description(&self) -> &'static str {
        match self.action {
            Action::Navigate => "Navigate to a URL, opening a browser session if none is active",
            Action::Click => "Click the element matching a CSS selector",
            Action::ClickText => "Click the element containing the given text",
            Action::Fill => "Fill an input field",
            Action::Evaluate => "Run JavaScript in the page and return the result",
            Action::Screenshot => "Take a screenshot of the page or of one element",
            Action::GetTextContent => "Get the text of all visible elements on the page",
            Action::GetHtmlContent => "Get the inner HTML of an element",
            Action::CloseBrowser => "Close the browser session",
        }
    }

    fn input_schema(&self) -> InputSchema {
        let schema = InputSchema::object();
        match self.action {
            Action::Navigate => schema.required("url", "string", "URL to navigate to"),
            Action::Click => schema.required("selector", "string", "CSS selector of the element"),
            Action::ClickText => schema.required("text", "string", "Text of the element to click"),
            Action::Fill => schema
                .required("selector", "string", "CSS selector of the input field")
                .required("value", "string", "Value to fill in"),
            Action::Evaluate => schema.required("script", "string", "JavaScript to run"),
            Action::Screenshot => schema
                .required("name", "string", "Name for the screenshot")
                .optional(
                    "selector",
                    "string",
                    "CSS selector of an element to capture instead of the page",
                ),
            Action::GetHtmlContent => {
                schema.required("selector", "string", "CSS selector of the element")
            }
            Action::GetTextContent | Action::CloseBrowser => schema,
        }
    }

    fn is_stateful(&self) -> bool {
        true
    }

    async fn handle(&self, _name: &str, arguments: &Arguments) -> Result<Vec<ContentItem>, ToolError> {
        match self.action {
            Action::Navigate => self.navigate(arguments).await,
            Action::Click => {
                self.click(ClickTarget::Selector(arguments.require_str("selector")?))
                    .await
            }
            Action::ClickText => {
                self.click(ClickTarget::Text(arguments.require_str("text")?))
                    .await
            }
            Action::Fill => {
                let selector = arguments.require_str("selector")?;
                let value = arguments.require_str("value")?;
                let mut session = self.sessions.lock().await;
                session.current_page()?.fill(selector, value).await?;
                Ok(vec![ContentItem::text(format!(
                    "Filled {selector} with '{value}'"
                ))])
            }
            Action::Evaluate => {
                let script = arguments.require_str("script")?;
                let mut session = self.sessions.lock().await;
                let result = session.current_page()?.evaluate(script).await?;
                Ok(vec![ContentItem::text(format!("Script result: {result}"))])
            }
            Action::Screenshot => {
                let name = arguments.require_str("name")?;
                let selector = arguments.optional_str("selector")?;
                let mut session = self.sessions.lock().await;
                let png = session.current_page()?.screenshot(selector).await?;
                let target = selector.map_or_else(|| "page".to_string(), |s| format!("'{s}'"));
                Ok(vec![
                    ContentItem::text(format!("Screenshot '{name}' of {target}")),
                    ContentItem::png(&png),
                ])
            }
            Action::GetTextContent => {
                let mut session = self.sessions.lock().await;
                let page = session.current_page()?;
                let texts = visible_texts(page.as_ref()).await?;
                Ok(vec![ContentItem::text(format!(
                    "Visible text on the page:\n{}",
                    texts.join("\n")
                ))])
            }
            Action::GetHtmlContent => {
                let selector = arguments.require_str("selector")?;
                let mut session = self.sessions.lock().await;
                let html = session.current_page()?.inner_html(selector).await?;
                Ok(vec![ContentItem::text(format!("HTML of {selector}:\n{html}"))])
            }
            Action::CloseBrowser => {
                let closed = self.sessions.close().await?;
                Ok(vec![ContentItem::text(if closed {
                    "Browser session closed"
                } else {
                    "No active browser session to close"
                })])
            }
        }
    }
}

/// What a click aims at.
#[derive(Debug, Clone, Copy)]
enum ClickTarget<'a> {
    Selector(&'a str),
    Text(&'a str),
}

impl BrowserTool {
    async fn navigate(&self, arguments: &Arguments) -> Result<Vec<ContentItem>, ToolError> {
        let url = normalise_url(arguments.require_str("url")?);
        let mut session = self.sessions.lock().await;
        let page = session.ensure_session().await?;

        tokio::time::timeout(self.navigation_timeout, page.goto(&url))
            .await
            .map_err(|_| ToolError::Timeout {
                operation: format!("navigation to {url}"),
                after: self.navigation_timeout,
            })??;
        tracing::debug!(%url, "Navigated");

        let texts = visible_texts(page.as_ref()).await?.join("\n");
        let preview: String = texts.chars().take(PREVIEW_CHARS).collect();
        Ok(vec![ContentItem::text(format!(
            "Navigated to {url}\nPage preview:\n\n{preview}..."
        ))])
    }

    /// Clicks under the new-page watch.
    async fn click(&self, target: ClickTarget<'_>) -> Result<Vec<ContentItem>, ToolError> {
        let mut session = self.sessions.lock().await;
        let page = session.current_page()?;
        let action = async {
            match target {
                ClickTarget::Selector(selector) => page.click(selector).await,
                ClickTarget::Text(text) => page.click_text(text).await,
            }
        };
        let ((), switched) = session.with_new_page_watch(action).await?;

        let message = match target {
            ClickTarget::Selector(selector) => format!("Clicked element matching {selector}"),
            ClickTarget::Text(text) => format!("Clicked element containing '{text}'"),
        };
        if switched {
            let url = session.current_page()?.url().await?;
            return Ok(vec![ContentItem::text(format!(
                "{message}; switched to newly opened page {url}"
            ))]);
        }
        Ok(vec![ContentItem::text(message)])
    }
}

/// Prepends `https://` unless the URL already has an http(s) scheme.
#[must_use]
pub fn normalise_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}
