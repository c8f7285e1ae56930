//! Top-level acquisition orchestrator.
//!
//! One attempt runs NAVIGATE → (challenge? → VERIFY) → CAPTURE → PARSE →
//! (download? → ACQUIRE_MEDIA) over a single browsing session, each stage
//! under its own timeout. The retry loop around it opens a fresh session per
//! attempt; no challenge or token state survives a failed attempt.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::captcha;
use crate::config::Config;
use crate::download::{self, DownloadStrategy};
use crate::error::AcquireError;
use crate::parse;
use crate::post::Post;
use crate::session::{BrowserProvider, BrowserSession};
use crate::urls;

/// URL fragment identifying the post-detail API exchange.
const ITEM_DETAIL_FRAGMENT: &str = "/api/item/detail/";

/// Whether the retry loop retries every failure or only the transient kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Retry any failed attempt.
    #[default]
    All,
    /// Retry challenge/token/download/session failures; surface parse
    /// failures immediately, since a malformed payload will not improve
    /// across attempts.
    TransientOnly,
}

/// Per-call options for [`acquire`].
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    pub url: String,
    /// Fetch the media too, not just metadata.
    pub download: bool,
    /// Number of retries after the first attempt.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    pub retry_policy: RetryPolicy,

    pub navigation_timeout: Duration,
    pub challenge_timeout: Duration,
    pub capture_timeout: Duration,
    pub download_timeout: Duration,

    pub download_dir: PathBuf,
    pub strategy_override: Option<DownloadStrategy>,
}

impl AcquireOptions {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            download: true,
            retries: 3,
            retry_delay: Duration::from_millis(500),
            retry_policy: RetryPolicy::default(),
            navigation_timeout: Duration::from_secs(30),
            challenge_timeout: Duration::from_secs(60),
            capture_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(30),
            download_dir: PathBuf::from("."),
            strategy_override: None,
        }
    }
}

/// Acquire the canonical record (and optionally the media) for a post URL.
///
/// Runs up to `retries + 1` attempts, each over an independently owned
/// browsing session, and returns on the first success. Once attempts are
/// exhausted the last underlying cause is wrapped in
/// [`AcquireError::RetryExhausted`].
pub async fn acquire(
    provider: &dyn BrowserProvider,
    http: &reqwest::Client,
    config: &Config,
    options: &AcquireOptions,
) -> Result<Post, AcquireError> {
    let url = match urls::resolve_short_url(http, &options.url).await {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(url = %options.url, error = %format!("{e:#}"), "short URL resolution failed, continuing with the original URL");
            options.url.clone()
        }
    };
    let attempts = options.retries + 1;

    let mut last_error = None;
    for attempt in 1..=attempts {
        debug!(url = %url, attempt, attempts, "starting acquisition attempt");
        match attempt_acquire(provider, http, config, options, &url).await {
            Ok(post) => {
                info!(url = %url, attempt, post_id = %post.core().post_id, "acquisition succeeded");
                return Ok(post);
            }
            Err(e) => {
                warn!(url = %url, attempt, error = %e, "acquisition attempt failed");
                if options.retry_policy == RetryPolicy::TransientOnly && !e.is_transient() {
                    return Err(e);
                }
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(options.retry_delay).await;
                }
            }
        }
    }

    Err(AcquireError::RetryExhausted {
        url,
        attempts,
        // Loop ran at least once, so an error was recorded.
        source: Box::new(last_error.expect("at least one attempt ran")),
    })
}

/// One full attempt over a fresh session. Any failure tears the session
/// down; the only side effect that can survive is a file already flushed to
/// disk.
async fn attempt_acquire(
    provider: &dyn BrowserProvider,
    http: &reqwest::Client,
    config: &Config,
    options: &AcquireOptions,
    url: &str,
) -> Result<Post, AcquireError> {
    let session = provider.new_session().await?;
    let result = run_stages(session.as_ref(), http, config, options, url).await;
    session.close().await;
    result
}

async fn run_stages(
    session: &dyn BrowserSession,
    http: &reqwest::Client,
    config: &Config,
    options: &AcquireOptions,
    url: &str,
) -> Result<Post, AcquireError> {
    staged(
        "navigate",
        options.navigation_timeout,
        session.navigate(url),
    )
    .await?;

    let challenge_stage = async {
        if session.challenge_present().await? {
            debug!(url = %url, "captcha challenge observed");
            captcha::verify_session(session, http, config, url).await?;
        }
        Ok::<(), AcquireError>(())
    };
    match tokio::time::timeout(options.challenge_timeout, challenge_stage).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(AcquireError::Session(anyhow::anyhow!(
                "stage challenge timed out after {:?}",
                options.challenge_timeout
            )));
        }
    }

    // The item-detail exchange is provoked by the reload inside capture.
    let payload = session
        .capture_payload(ITEM_DETAIL_FRAGMENT, options.capture_timeout)
        .await?;

    let mut post = parse::parse_post(&payload, url)?;

    if options.download {
        tokio::fs::create_dir_all(&options.download_dir)
            .await
            .map_err(|e| AcquireError::DownloadFailed {
                url: url.to_string(),
                reason: format!("cannot create {}: {e}", options.download_dir.display()),
            })?;
        match &mut post {
            Post::Video(video) => {
                let strategy =
                    download::select_strategy(video.core.download_setting, options.strategy_override);
                download::download_video(
                    session,
                    video,
                    strategy,
                    &options.download_dir,
                    options.download_timeout,
                )
                .await?;
            }
            Post::Slideshow(slides) => {
                let url = slides.core.url.clone();
                tokio::time::timeout(
                    options.download_timeout,
                    download::download_slideshow(http, slides, &options.download_dir, config),
                )
                .await
                .map_err(|_| AcquireError::DownloadFailed {
                    url,
                    reason: format!(
                        "slideshow download timed out after {:?}",
                        options.download_timeout
                    ),
                })??;
            }
        }
    }

    Ok(post)
}

/// Bound a stage future with its timeout, mapping expiry to a session error
/// naming the stage.
async fn staged<T>(
    stage: &'static str,
    timeout: Duration,
    future: impl std::future::Future<Output = anyhow::Result<T>>,
) -> Result<T, AcquireError> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result.map_err(AcquireError::from),
        Err(_) => Err(AcquireError::Session(anyhow::anyhow!(
            "stage {stage} timed out after {timeout:?}"
        ))),
    }
}
