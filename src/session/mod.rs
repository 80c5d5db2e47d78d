//! The shared browser session.
//!
//! [`SessionManager`] owns a single current-session slot. Every stateful tool
//! call takes the slot's mutex through [`SessionManager::lock`] and holds the
//! returned [`SessionGuard`] for the whole operation, so driver calls from two
//! concurrent tool calls never interleave against the same page.
//!
//! Sessions are created lazily by the first navigation and live until
//! [`SessionManager::close`] (the `close_browser` tool, or server shutdown).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::browser::{Browser, BrowserDriver, BrowserError, Page};

/// Errors raised by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A page operation was attempted before any navigation.
    #[error("No active browser session. Navigate to a URL first.")]
    NoActiveSession,

    /// The browser driver failed.
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// A live browser with its active page.
pub struct Session {
    id: Uuid,
    browser: Arc<dyn Browser>,
    page: Arc<dyn Page>,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
}

impl Session {
    fn touch(&mut self) {
        self.last_used_at = Utc::now();
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }
}

/// Identity and timestamps of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: Uuid,
    /// When the browser was launched.
    pub created_at: DateTime<Utc>,
    /// When the session was last used by a tool.
    pub last_used_at: DateTime<Utc>,
}

/// Owns zero or one browser session.
pub struct SessionManager {
    driver: Arc<dyn BrowserDriver>,
    current: Mutex<Option<Session>>,
    new_page_watch: Duration,
}

impl SessionManager {
    /// Creates a manager that launches browsers through `driver`.
    ///
    /// `new_page_watch` bounds how long [`SessionGuard::with_new_page_watch`]
    /// waits for an action to open a page, and then for that page to load.
    #[must_use]
    pub fn new(driver: Arc<dyn BrowserDriver>, new_page_watch: Duration) -> Self {
        Self {
            driver,
            current: Mutex::new(None),
            new_page_watch,
        }
    }

    /// Takes exclusive access to the session slot.
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            slot: self.current.lock().await,
            driver: self.driver.as_ref(),
            new_page_watch: self.new_page_watch,
        }
    }

    /// Releases the current session, if any.
    ///
    /// Returns `true` if a session was closed. The slot is cleared even when
    /// the browser fails to shut down cleanly.
    ///
    /// # Errors
    ///
    /// Returns the driver error from closing the browser.
    pub async fn close(&self) -> Result<bool, SessionError> {
        self.lock().await.close().await
    }

    /// Snapshot of the current session.
    pub async fn info(&self) -> Option<SessionInfo> {
        self.current.lock().await.as_ref().map(Session::info)
    }
}

/// Exclusive access to the session slot.
pub struct SessionGuard<'a> {
    slot: MutexGuard<'a, Option<Session>>,
    driver: &'a dyn BrowserDriver,
    new_page_watch: Duration,
}

impl SessionGuard<'_> {
    /// Returns the current page, launching a browser first if there is no
    /// session.
    ///
    /// # Errors
    ///
    /// Returns the driver error if the browser cannot be launched.
    pub async fn ensure_session(&mut self) -> Result<Arc<dyn Page>, SessionError> {
        if self.slot.is_none() {
            let browser = self.driver.launch().await?;
            let page = match browser.new_page().await {
                Ok(page) => page,
                Err(e) => {
                    if let Err(close_err) = browser.close().await {
                        tracing::debug!(error = %close_err, "Failed to close half-started browser");
                    }
                    return Err(e.into());
                }
            };
            let now = Utc::now();
            let session = Session {
                id: Uuid::new_v4(),
                browser,
                page,
                created_at: now,
                last_used_at: now,
            };
            tracing::info!(session = %session.id, "Browser session created");
            *self.slot = Some(session);
        }
        self.current_page()
    }

    /// Returns the page bound to the current session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoActiveSession`] if there is no session.
    pub fn current_page(&mut self) -> Result<Arc<dyn Page>, SessionError> {
        let session = self.slot.as_mut().ok_or(SessionError::NoActiveSession)?;
        session.touch();
        Ok(Arc::clone(&session.page))
    }

    /// Current session identity, if any.
    #[must_use]
    pub fn info(&self) -> Option<SessionInfo> {
        self.slot.as_ref().map(Session::info)
    }

    /// Runs `action` while watching for a page it may open.
    ///
    /// The action and a bounded new-page watch run concurrently and are joined
    /// before returning. If a page opens inside the watch window it becomes
    /// the session's page and the second tuple element is `true`; otherwise
    /// the current page stands. The opened page gets one more window to
    /// finish loading; it is switched to even if it does not.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoActiveSession`] without running the action
    /// if there is no session, or the action's own error.
    pub async fn with_new_page_watch<T, F>(&mut self, action: F) -> Result<(T, bool), SessionError>
    where
        F: Future<Output = Result<T, BrowserError>> + Send,
    {
        let session = self.slot.as_mut().ok_or(SessionError::NoActiveSession)?;
        let watch = session.browser.watch_new_page().await?;

        let (outcome, opened) = tokio::join!(action, tokio::time::timeout(self.new_page_watch, watch));
        let value = outcome?;

        let replaced = match opened {
            Ok(Ok(page)) => {
                match tokio::time::timeout(self.new_page_watch, page.wait_for_load()).await {
                    Ok(loaded) => loaded?,
                    Err(_elapsed) => tracing::warn!(
                        session = %session.id,
                        after = ?self.new_page_watch,
                        "Newly opened page is still loading, switching anyway"
                    ),
                }
                session.page = page;
                tracing::debug!(session = %session.id, "Switched to newly opened page");
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "New-page watch failed");
                false
            }
            Err(_elapsed) => false,
        };
        session.touch();
        Ok((value, replaced))
    }

    /// Closes the current session, if any.
    ///
    /// # Errors
    ///
    /// Returns the driver error from closing the browser; the slot is cleared
    /// regardless.
    pub async fn close(&mut self) -> Result<bool, SessionError> {
        let Some(session) = self.slot.take() else {
            return Ok(false);
        };
        tracing::info!(session = %session.id, "Closing browser session");
        session.browser.close().await?;
        Ok(true)
    }
}
