//! W3C WebDriver client.
//!
//! Each [`WebDriverBrowser`] is one WebDriver session; each [`WebDriverPage`]
//! is one window handle in it. WebDriver addresses a single "current" window
//! per session, so every page operation switches to its own window first.
//! Callers serialise operations (the session manager holds a mutex), which
//! keeps the switch and the command together.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde_json::{json, Value};

use super::{Browser, BrowserDriver, BrowserError, NewPageWatch, Page};
use crate::config::BrowserConfig;

/// Key under which WebDriver returns element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Interval between polls for window handles, readiness and selectors.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Evaluates `arguments[0]`; a function result is called.
const EVALUATE_WRAPPER: &str =
    "const result = eval(arguments[0]); return typeof result === 'function' ? result() : result;";

/// Launches WebDriver sessions.
pub struct WebDriverLauncher {
    http: reqwest::Client,
    endpoint: String,
    browser_name: String,
    headless: bool,
    page_load_timeout: Duration,
}

impl WebDriverLauncher {
    /// Creates a launcher for the configured endpoint.
    #[must_use]
    pub fn new(http: reqwest::Client, config: &BrowserConfig) -> Self {
        Self {
            http,
            endpoint: config.webdriver_url.trim_end_matches('/').to_string(),
            browser_name: config.browser_name.clone(),
            headless: config.headless,
            page_load_timeout: config.navigation_timeout(),
        }
    }

    /// New-session capabilities.
    fn capabilities(&self) -> Value {
        let page_load_ms = u64::try_from(self.page_load_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut always_match = json!({
            "browserName": self.browser_name,
            "timeouts": { "pageLoad": page_load_ms },
        });

        if self.headless {
            let (key, flag) = match self.browser_name.as_str() {
                "firefox" => ("moz:firefoxOptions", "-headless"),
                "MicrosoftEdge" | "msedge" => ("ms:edgeOptions", "--headless=new"),
                _ => ("goog:chromeOptions", "--headless=new"),
            };
            always_match[key] = json!({ "args": [flag] });
        }

        json!({ "capabilities": { "alwaysMatch": always_match } })
    }
}

#[async_trait]
impl BrowserDriver for WebDriverLauncher {
    async fn launch(&self) -> Result<Arc<dyn Browser>, BrowserError> {
        let value = send(
            self.http
                .post(format!("{}/session", self.endpoint))
                .json(&self.capabilities()),
        )
        .await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Protocol("new session has no sessionId".to_string()))?;

        tracing::debug!(session_id, "WebDriver session started");

        Ok(Arc::new(WebDriverBrowser {
            client: Arc::new(Client {
                http: self.http.clone(),
                base: format!("{}/session/{session_id}", self.endpoint),
            }),
            initial_window_claimed: AtomicBool::new(false),
        }))
    }
}

/// Sends a request and unwraps the WebDriver `value` envelope.
async fn send(request: reqwest::RequestBuilder) -> Result<Value, BrowserError> {
    let body: Value = request.send().await?.json().await?;
    let value = match body {
        Value::Object(mut map) => map.remove("value").unwrap_or(Value::Null),
        other => return Err(BrowserError::Protocol(format!("expected an object, got {other}"))),
    };

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(BrowserError::Driver {
            error: error.to_string(),
            message: message.to_string(),
        });
    }

    Ok(value)
}

fn into_string(value: Value, what: &str) -> Result<String, BrowserError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(BrowserError::Protocol(format!(
            "expected {what} as a string, got {other}"
        ))),
    }
}

/// Session-scoped HTTP client.
struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    async fn get(&self, path: &str) -> Result<Value, BrowserError> {
        send(self.http.get(format!("{}{path}", self.base))).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, BrowserError> {
        send(self.http.post(format!("{}{path}", self.base)).json(body)).await
    }

    async fn window_handles(&self) -> Result<Vec<String>, BrowserError> {
        match self.get("/window/handles").await? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| into_string(item, "window handle"))
                .collect(),
            other => Err(BrowserError::Protocol(format!(
                "expected window handles, got {other}"
            ))),
        }
    }
}

/// One WebDriver session.
pub struct WebDriverBrowser {
    client: Arc<Client>,
    initial_window_claimed: AtomicBool,
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn new_page(&self) -> Result<Arc<dyn Page>, BrowserError> {
        let handle = if self.initial_window_claimed.swap(true, Ordering::SeqCst) {
            let value = self.client.post("/window/new", &json!({ "type": "tab" })).await?;
            value
                .get("handle")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| BrowserError::Protocol("new window has no handle".to_string()))?
        } else {
            into_string(self.client.get("/window").await?, "window handle")?
        };

        Ok(Arc::new(WebDriverPage {
            client: Arc::clone(&self.client),
            handle,
        }))
    }

    async fn watch_new_page(&self) -> Result<NewPageWatch, BrowserError> {
        let known: HashSet<String> = self.client.window_handles().await?.into_iter().collect();
        let client = Arc::clone(&self.client);

        Ok(Box::pin(async move {
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                let opened = client
                    .window_handles()
                    .await?
                    .into_iter()
                    .find(|handle| !known.contains(handle));
                if let Some(handle) = opened {
                    return Ok(Arc::new(WebDriverPage { client, handle }) as Arc<dyn Page>);
                }
            }
        }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        send(self.client.http.delete(&self.client.base)).await?;
        Ok(())
    }
}

/// How an element is located.
enum Locator<'a> {
    Css(&'a str),
    XPath(String),
}

impl Locator<'_> {
    fn to_json(&self) -> Value {
        match self {
            Self::Css(selector) => json!({ "using": "css selector", "value": selector }),
            Self::XPath(path) => json!({ "using": "xpath", "value": path }),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Css(selector) => (*selector).to_string(),
            Self::XPath(path) => path.clone(),
        }
    }
}

/// Quotes `text` as an XPath string literal.
fn xpath_literal(text: &str) -> String {
    if !text.contains('"') {
        return format!("\"{text}\"");
    }
    if !text.contains('\'') {
        return format!("'{text}'");
    }
    let parts: Vec<String> = text.split('"').map(|part| format!("\"{part}\"")).collect();
    format!("concat({})", parts.join(", '\"', "))
}

/// XPath for the innermost elements whose text contains `text`.
fn text_xpath(text: &str) -> String {
    let literal = xpath_literal(text);
    format!(
        "//*[contains(normalize-space(.), {literal})][not(.//*[contains(normalize-space(.), {literal})])]"
    )
}

fn element_id(value: &Value) -> Result<String, BrowserError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BrowserError::Protocol("element reference missing".to_string()))
}

/// One window of a WebDriver session.
pub struct WebDriverPage {
    client: Arc<Client>,
    handle: String,
}

impl WebDriverPage {
    async fn focus(&self) -> Result<(), BrowserError> {
        self.client
            .post("/window", &json!({ "handle": self.handle }))
            .await
            .map(drop)
    }

    async fn find(&self, locator: &Locator<'_>) -> Result<String, BrowserError> {
        match self.client.post("/element", &locator.to_json()).await {
            Ok(value) => element_id(&value),
            Err(BrowserError::Driver { error, .. }) if error == "no such element" => {
                Err(BrowserError::ElementNotFound {
                    selector: locator.describe(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn find_all(&self, locator: &Locator<'_>) -> Result<Vec<String>, BrowserError> {
        match self.client.post("/elements", &locator.to_json()).await? {
            Value::Array(items) => items.iter().map(element_id).collect(),
            other => Err(BrowserError::Protocol(format!(
                "expected element list, got {other}"
            ))),
        }
    }

    async fn element_png(&self, element: &str) -> Result<Vec<u8>, BrowserError> {
        let data = into_string(
            self.client
                .get(&format!("/element/{element}/screenshot"))
                .await?,
            "screenshot",
        )?;
        Ok(BASE64_STANDARD.decode(data)?)
    }

    async fn execute(&self, script: &str, args: Value) -> Result<Value, BrowserError> {
        self.client
            .post("/execute/sync", &json!({ "script": script, "args": args }))
            .await
    }
}

#[async_trait]
impl Page for WebDriverPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.focus().await?;
        self.client.post("/url", &json!({ "url": url })).await.map(drop)
    }

    async fn url(&self) -> Result<String, BrowserError> {
        self.focus().await?;
        into_string(self.client.get("/url").await?, "url")
    }

    async fn title(&self) -> Result<String, BrowserError> {
        self.focus().await?;
        into_string(self.client.get("/title").await?, "title")
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.focus().await?;
        into_string(self.client.get("/source").await?, "page source")
    }

    async fn wait_for_load(&self) -> Result<(), BrowserError> {
        self.focus().await?;
        loop {
            let state = self
                .execute("return document.readyState;", json!([]))
                .await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), BrowserError> {
        self.focus().await?;
        loop {
            match self.find(&Locator::Css(selector)).await {
                Ok(_) => return Ok(()),
                Err(BrowserError::ElementNotFound { .. }) => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        self.focus().await?;
        let element = self.find(&Locator::Css(selector)).await?;
        self.client
            .post(&format!("/element/{element}/click"), &json!({}))
            .await
            .map(drop)
    }

    async fn click_text(&self, text: &str) -> Result<(), BrowserError> {
        self.focus().await?;
        let element = self.find(&Locator::XPath(text_xpath(text))).await?;
        self.client
            .post(&format!("/element/{element}/click"), &json!({}))
            .await
            .map(drop)
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        self.focus().await?;
        let element = self.find(&Locator::Css(selector)).await?;
        self.client
            .post(&format!("/element/{element}/clear"), &json!({}))
            .await?;
        self.client
            .post(&format!("/element/{element}/value"), &json!({ "text": value }))
            .await
            .map(drop)
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        self.focus().await?;
        self.execute(EVALUATE_WRAPPER, json!([script])).await
    }

    async fn screenshot(&self, selector: Option<&str>) -> Result<Vec<u8>, BrowserError> {
        self.focus().await?;
        if let Some(selector) = selector {
            let element = self.find(&Locator::Css(selector)).await?;
            return self.element_png(&element).await;
        }
        let data = into_string(self.client.get("/screenshot").await?, "screenshot")?;
        Ok(BASE64_STANDARD.decode(data)?)
    }

    async fn element_screenshots(
        &self,
        selector: &str,
        limit: usize,
    ) -> Result<Vec<Vec<u8>>, BrowserError> {
        self.focus().await?;
        let elements = self.find_all(&Locator::Css(selector)).await?;
        let mut shots = Vec::new();
        for element in elements.iter().take(limit) {
            match self.element_png(element).await {
                Ok(png) => shots.push(png),
                // Zero-sized or detached elements cannot be captured.
                Err(BrowserError::Driver { error, .. }) => {
                    tracing::debug!(%error, "Skipping element screenshot");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(shots)
    }

    async fn inner_html(&self, selector: &str) -> Result<String, BrowserError> {
        self.focus().await?;
        let element = self.find(&Locator::Css(selector)).await?;
        into_string(
            self.client
                .get(&format!("/element/{element}/property/innerHTML"))
                .await?,
            "innerHTML",
        )
    }
}
