//! Browsing-session capability traits.
//!
//! The acquisition pipeline never talks to a browser driver directly; it is
//! handed a [`BrowserProvider`] that opens fresh [`BrowserSession`]s, one per
//! attempt. The chromiumoxide-backed implementation lives in
//! [`crate::browser`]; tests substitute mocks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A cookie observed in the browsing session.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub secure: bool,
}

/// A localStorage entry observed in the browsing session.
#[derive(Debug, Clone)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

/// HTTP method for an in-page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    Get,
    Post,
}

/// An authenticated JSON request executed from inside the page, so session
/// cookies ride along.
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub method: FetchMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl JsonRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: FetchMethod::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: FetchMethod::Post,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Full URL with the query string appended.
    #[must_use]
    pub fn url_with_query(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let qs: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        format!("{}?{}", self.url, qs.join("&"))
    }
}

/// Opens an independently owned browsing session per acquisition attempt.
///
/// Attempts never share a session: stale challenge/token state is a likely
/// cause of verification failure, so the orchestrator discards the whole
/// session on any attempt failure and asks for a new one.
#[async_trait]
pub trait BrowserProvider: Send + Sync {
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>>;
}

/// One live page in a headless browser.
///
/// All waiting is done by the caller through [`tokio::time::timeout`] except
/// where a wait is inherent to the operation, in which case the method takes
/// its own timeout.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate the page and wait for the navigation to settle.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Whether a captcha dialog is currently presented on the page.
    async fn challenge_present(&self) -> Result<bool>;

    /// Snapshot of the session's cookies.
    async fn cookies(&self) -> Result<Vec<Cookie>>;

    /// Snapshot of the page origin's localStorage.
    async fn local_storage(&self) -> Result<Vec<StorageEntry>>;

    /// Execute a JSON request from inside the page.
    async fn fetch_json(&self, request: &JsonRequest) -> Result<Value>;

    /// Reload the page and capture the body of the first response whose URL
    /// contains `url_fragment`, parsed as JSON.
    async fn capture_payload(&self, url_fragment: &str, timeout: Duration) -> Result<Value>;

    /// Capture the raw body of the first response whose URL contains
    /// `url_fragment`, triggering a reload to provoke the request.
    async fn capture_response_body(
        &self,
        url_fragment: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>>;

    /// The `src` attribute of the page's first `<video>` element.
    async fn video_source_url(&self) -> Result<String>;

    /// Trigger the UI's native save action and wait for the completed file
    /// to appear under `dest_dir`. Returns the downloaded file's path.
    async fn trigger_native_save(&self, dest_dir: &Path, timeout: Duration) -> Result<PathBuf>;

    /// Tear the session down. Best effort; errors are logged by callers.
    async fn close(self: Box<Self>);
}
