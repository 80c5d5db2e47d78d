//! In-process scripted browser.
//!
//! Pages remember their URL and answer every query with deterministic content
//! derived from it. Each page operation is recorded in a shared log as a
//! `begin`/`end` pair around an optional delay, which lets tests observe
//! whether operations against one page ever interleave.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use super::{Browser, BrowserDriver, BrowserError, NewPageWatch, Page};

/// PNG file signature; screenshots start with it.
pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

#[derive(Default)]
struct MemoryState {
    launches: AtomicUsize,
    closed: AtomicUsize,
    step_delay: Duration,
    stall_loads: AtomicBool,
    popups: Mutex<HashMap<String, String>>,
    log: Mutex<Vec<String>>,
}

impl MemoryState {
    fn record(&self, entry: String) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

/// Launches [`MemoryBrowser`]s. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    state: Arc<MemoryState>,
}

impl MemoryDriver {
    /// Creates a driver with no delay between operation begin and end.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a driver whose page operations each take `delay`.
    #[must_use]
    pub fn with_step_delay(delay: Duration) -> Self {
        Self {
            state: Arc::new(MemoryState {
                step_delay: delay,
                ..MemoryState::default()
            }),
        }
    }

    /// Makes clicks on `selector` open a new page at `url`.
    pub fn open_on_click(&self, selector: &str, url: &str) {
        self.state
            .popups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(selector.to_string(), url.to_string());
    }

    /// Makes `wait_for_load` on every page pend forever.
    pub fn stall_page_loads(&self) {
        self.state.stall_loads.store(true, Ordering::SeqCst);
    }

    /// Number of browsers launched so far.
    #[must_use]
    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    /// Number of browsers closed so far.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Recorded page operations, oldest first.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        self.state
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BrowserDriver for MemoryDriver {
    async fn launch(&self) -> Result<Arc<dyn Browser>, BrowserError> {
        let index = self.state.launches.fetch_add(1, Ordering::SeqCst);
        let (events, _) = broadcast::channel(16);
        Ok(Arc::new(MemoryBrowser {
            inner: Arc::new(BrowserInner {
                index,
                state: Arc::clone(&self.state),
                events,
                next_page: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }))
    }
}

struct BrowserInner {
    index: usize,
    state: Arc<MemoryState>,
    events: broadcast::Sender<Arc<MemoryPage>>,
    next_page: AtomicUsize,
    closed: AtomicBool,
}

impl BrowserInner {
    fn open(self: &Arc<Self>, url: &str) -> Arc<MemoryPage> {
        let page = self.next_page.fetch_add(1, Ordering::SeqCst);
        Arc::new(MemoryPage {
            id: format!("b{}p{page}", self.index),
            url: Mutex::new(url.to_string()),
            browser: Arc::clone(self),
        })
    }

    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        Ok(())
    }
}

/// A scripted browser.
pub struct MemoryBrowser {
    inner: Arc<BrowserInner>,
}

#[async_trait]
impl Browser for MemoryBrowser {
    async fn new_page(&self) -> Result<Arc<dyn Page>, BrowserError> {
        self.inner.ensure_open()?;
        Ok(self.inner.open("about:blank"))
    }

    async fn watch_new_page(&self) -> Result<NewPageWatch, BrowserError> {
        self.inner.ensure_open()?;
        let mut events = self.inner.events.subscribe();
        Ok(Box::pin(async move {
            let page = events.recv().await.map_err(|_| BrowserError::Closed)?;
            Ok(page as Arc<dyn Page>)
        }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A scripted page.
pub struct MemoryPage {
    id: String,
    url: Mutex<String>,
    browser: Arc<BrowserInner>,
}

impl MemoryPage {
    fn current_url(&self) -> String {
        self.url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn step(&self, operation: &str) -> Result<(), BrowserError> {
        self.browser.ensure_open()?;
        let state = &self.browser.state;
        state.record(format!("begin {} {operation}", self.id));
        if !state.step_delay.is_zero() {
            tokio::time::sleep(state.step_delay).await;
        }
        state.record(format!("end {} {operation}", self.id));
        Ok(())
    }
}

#[async_trait]
impl Page for MemoryPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.step(&format!("goto {url}")).await?;
        *self.url.lock().unwrap_or_else(PoisonError::into_inner) = url.to_string();
        Ok(())
    }

    async fn url(&self) -> Result<String, BrowserError> {
        self.browser.ensure_open()?;
        Ok(self.current_url())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        self.browser.ensure_open()?;
        Ok(format!("Title of {}", self.current_url()))
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.step("content").await?;
        let url = self.current_url();
        Ok(format!(
            "<html><head><title>Title of {url}</title><script>var x = 1;</script></head>\
             <body><h1>Heading</h1><p>Content of {url}</p><img src=\"/a.png\"></body></html>"
        ))
    }

    async fn wait_for_load(&self) -> Result<(), BrowserError> {
        self.browser.ensure_open()?;
        if self.browser.state.stall_loads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), BrowserError> {
        self.step(&format!("wait {selector}")).await
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        self.step(&format!("click {selector}")).await?;
        let popup = self
            .browser
            .state
            .popups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(selector)
            .cloned();
        if let Some(url) = popup {
            let page = self.browser.open(&url);
            // No receiver just means nobody is watching.
            let _ = self.browser.events.send(page);
        }
        Ok(())
    }

    async fn click_text(&self, text: &str) -> Result<(), BrowserError> {
        self.step(&format!("click_text {text}")).await
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        self.step(&format!("fill {selector}={value}")).await
    }

    async fn evaluate(&self, _script: &str) -> Result<Value, BrowserError> {
        self.step("evaluate").await?;
        Ok(json!([format!("Content of {}", self.current_url())]))
    }

    async fn screenshot(&self, selector: Option<&str>) -> Result<Vec<u8>, BrowserError> {
        self.step(&format!("screenshot {}", selector.unwrap_or("page")))
            .await?;
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(self.current_url().as_bytes());
        Ok(bytes)
    }

    async fn element_screenshots(
        &self,
        selector: &str,
        limit: usize,
    ) -> Result<Vec<Vec<u8>>, BrowserError> {
        self.step(&format!("screenshots {selector}")).await?;
        Ok(std::iter::repeat_with(|| PNG_SIGNATURE.to_vec())
            .take(limit.min(2))
            .collect())
    }

    async fn inner_html(&self, selector: &str) -> Result<String, BrowserError> {
        self.step(&format!("inner_html {selector}")).await?;
        Ok(format!("<span>{selector}</span>"))
    }
}
