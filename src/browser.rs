//! Chromiumoxide-backed implementation of the browsing-session capability.
//!
//! Each [`ChromiumProvider::new_session`] launches its own headless browser
//! so attempts never share cookie or storage state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::{
    BrowserProvider, BrowserSession, Cookie, FetchMethod, JsonRequest, StorageEntry,
};

/// Default viewport, a common phone size; TikTok serves the mobile layout.
const VIEWPORT_WIDTH: u32 = 430;
const VIEWPORT_HEIGHT: u32 = 932;

/// Browser launch options.
#[derive(Debug, Clone)]
pub struct ChromiumOptions {
    /// Path to the Chrome/Chromium executable (None for auto-detection).
    pub chrome_path: Option<String>,
    pub request_timeout: Duration,
}

impl Default for ChromiumOptions {
    fn default() -> Self {
        Self {
            chrome_path: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Launches one fresh headless browser per session.
pub struct ChromiumProvider {
    options: ChromiumOptions,
}

impl ChromiumProvider {
    #[must_use]
    pub fn new(options: ChromiumOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl BrowserProvider for ChromiumProvider {
    async fn new_session(&self) -> Result<Box<dyn BrowserSession>> {
        let mut config_builder = BrowserConfig::builder()
            .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
            .request_timeout(self.options.request_timeout)
            .no_sandbox()
            .disable_default_args()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-extensions")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--mute-audio")
            .arg("--hide-scrollbars");

        if let Some(ref chrome_path) = self.options.chrome_path {
            config_builder = config_builder.chrome_executable(chrome_path);
        }

        let browser_config = config_builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("failed to launch browser")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler error: {e}");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to create page")?;
        page.execute(NetworkEnableParams::default())
            .await
            .context("failed to enable network events")?;

        debug!("fresh browser session launched");
        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task,
        }))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl ChromiumSession {
    async fn evaluate_value(&self, expression: String) -> Result<Value> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| anyhow!("failed to build evaluate params: {e}"))?;
        let result = self
            .page
            .evaluate(params)
            .await
            .context("script evaluation failed")?;
        Ok(result.into_value().unwrap_or(Value::Null))
    }

    /// Reload the page and capture the first response whose URL contains
    /// `fragment`.
    async fn capture_body(&self, fragment: &str, timeout: Duration) -> Result<Vec<u8>> {
        let mut events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("failed to register response listener")?;

        self.page.reload().await.context("reload failed")?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| anyhow!("no response matching {fragment} within {timeout:?}"))?;

            let event = tokio::time::timeout(remaining, events.next())
                .await
                .map_err(|_| anyhow!("no response matching {fragment} within {timeout:?}"))?
                .ok_or_else(|| anyhow!("event stream closed while waiting for {fragment}"))?;

            if !event.response.url.contains(fragment) {
                continue;
            }
            debug!(url = %event.response.url, "captured matching response");

            // The body may not be available the instant the headers arrive.
            let mut last_err = None;
            for _ in 0..5 {
                match self
                    .page
                    .execute(GetResponseBodyParams::new(event.request_id.clone()))
                    .await
                {
                    Ok(body) => {
                        return if body.base64_encoded {
                            base64::engine::general_purpose::STANDARD
                                .decode(&body.body)
                                .context("response body is not valid base64")
                        } else {
                            Ok(body.body.clone().into_bytes())
                        };
                    }
                    Err(e) => {
                        last_err = Some(e);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                }
            }
            bail!(
                "response body for {fragment} never became available: {:?}",
                last_err
            );
        }
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("navigation to {url} failed"))?;
        self.page
            .wait_for_navigation()
            .await
            .context("navigation did not settle")?;
        Ok(())
    }

    async fn challenge_present(&self) -> Result<bool> {
        let value = self
            .evaluate_value(
                "document.querySelector('#captcha_container, .captcha_verify_container, \
                 div[class*=\"captcha\"]') !== null"
                    .to_string(),
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .context("failed to read cookies")?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                secure: c.secure,
            })
            .collect())
    }

    async fn local_storage(&self) -> Result<Vec<StorageEntry>> {
        let value = self
            .evaluate_value("Object.entries(localStorage)".to_string())
            .await?;
        let entries: Vec<(String, String)> =
            serde_json::from_value(value).context("unexpected localStorage shape")?;
        Ok(entries
            .into_iter()
            .map(|(name, value)| StorageEntry { name, value })
            .collect())
    }

    async fn fetch_json(&self, request: &JsonRequest) -> Result<Value> {
        let url = serde_json::to_string(&request.url_with_query())?;
        let method = match request.method {
            FetchMethod::Get => "GET",
            FetchMethod::Post => "POST",
        };
        let headers = serde_json::to_string(&serde_json::Map::from_iter(
            request
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone()))),
        ))?;
        let body_part = match &request.body {
            Some(body) => format!(", body: JSON.stringify({body})"),
            None => String::new(),
        };

        let expression = format!(
            "(async () => {{\
                const response = await fetch({url}, {{\
                    method: '{method}', headers: {headers}{body_part}\
                }});\
                return await response.json();\
            }})()"
        );
        self.evaluate_value(expression).await
    }

    async fn capture_payload(&self, url_fragment: &str, timeout: Duration) -> Result<Value> {
        let body = self.capture_body(url_fragment, timeout).await?;
        serde_json::from_slice(&body).context("captured payload is not JSON")
    }

    async fn capture_response_body(
        &self,
        url_fragment: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.capture_body(url_fragment, timeout).await
    }

    async fn video_source_url(&self) -> Result<String> {
        let value = self
            .evaluate_value("document.querySelector('video')?.src ?? ''".to_string())
            .await?;
        match value.as_str() {
            Some(src) if !src.is_empty() => Ok(src.to_string()),
            _ => bail!("page has no <video> element with a source"),
        }
    }

    async fn trigger_native_save(&self, dest_dir: &Path, timeout: Duration) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .context("failed to create download dir")?;

        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dest_dir.display().to_string())
            .build()
            .map_err(|e| anyhow!("failed to build download behavior: {e}"))?;
        self.page
            .execute(behavior)
            .await
            .context("failed to set download behavior")?;

        let before = list_files(dest_dir).await?;

        // Native save lives in the video's context menu.
        self.evaluate_value(
            "(async () => {\
                const video = document.querySelector('video');\
                if (!video) throw new Error('no video element');\
                video.dispatchEvent(new MouseEvent('contextmenu', {bubbles: true}));\
                await new Promise(r => setTimeout(r, 300));\
                const items = [...document.querySelectorAll('li, [role=\"menuitem\"]')];\
                const download = items.find(i => /download/i.test(i.textContent));\
                if (!download) throw new Error('no download menu item');\
                download.click();\
            })()"
                .to_string(),
        )
        .await?;

        // Wait for a new, fully written file to appear.
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for path in list_files(dest_dir).await? {
                let in_progress = path
                    .extension()
                    .is_some_and(|e| e == "crdownload" || e == "tmp");
                if !before.contains(&path) && !in_progress {
                    return Ok(path);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("native save did not complete within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn close(self: Box<Self>) {
        let mut this = *self;
        if let Err(e) = this.page.close().await {
            debug!("failed to close page: {e}");
        }
        if let Err(e) = this.browser.close().await {
            warn!("failed to close browser: {e}");
        }
        this.handler_task.abort();
    }
}

async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .context("failed to read download dir")?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}
