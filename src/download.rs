//! Media acquisition strategies.
//!
//! Videos have two routes: the UI's native save action (allowed when the
//! post's download-permission flag is 0) and capture of the underlying media
//! network exchange (works regardless of the flag, but is less reliable).
//! Slideshows never branch: each image is fetched directly over HTTP.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::AcquireError;
use crate::post::{SlideshowPost, VideoPost};
use crate::session::BrowserSession;

/// Which route to use for a video download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStrategy {
    /// Trigger the UI's native save action and wait for the file event.
    Native,
    /// Observe the media network exchange and stream its body to disk.
    Capture,
}

/// Pick the strategy for a video: an explicit override wins, otherwise the
/// platform's download-permission flag decides.
#[must_use]
pub fn select_strategy(
    download_setting: i64,
    strategy_override: Option<DownloadStrategy>,
) -> DownloadStrategy {
    strategy_override.unwrap_or(if download_setting == 0 {
        DownloadStrategy::Native
    } else {
        DownloadStrategy::Capture
    })
}

/// Download a video next to `<dir>/<post_id>.mp4` and record the local path
/// on the record.
pub async fn download_video(
    session: &dyn BrowserSession,
    post: &mut VideoPost,
    strategy: DownloadStrategy,
    dir: &Path,
    timeout: Duration,
) -> Result<(), AcquireError> {
    let target = dir.join(format!("{}.mp4", post.core.post_id));
    debug!(post_id = %post.core.post_id, ?strategy, "downloading video");

    match strategy {
        DownloadStrategy::Native => {
            let saved = session
                .trigger_native_save(dir, timeout)
                .await
                .map_err(|e| download_failure(&post.core.url, &e))?;
            if saved != target {
                tokio::fs::rename(&saved, &target)
                    .await
                    .map_err(|e| download_failure(&post.core.url, &e.into()))?;
            }
        }
        DownloadStrategy::Capture => {
            let source = session
                .video_source_url()
                .await
                .map_err(|e| download_failure(&post.core.url, &e))?;
            // Match on the base URL; the query string varies per request.
            let base = match url::Url::parse(&source) {
                Ok(mut parsed) => {
                    parsed.set_query(None);
                    parsed.set_fragment(None);
                    parsed.to_string()
                }
                Err(_) => source.clone(),
            };
            let body = session
                .capture_response_body(&base, timeout)
                .await
                .map_err(|e| download_failure(&post.core.url, &e))?;
            tokio::fs::write(&target, &body)
                .await
                .map_err(|e| download_failure(&post.core.url, &e.into()))?;
        }
    }

    info!(path = %target.display(), "video saved");
    post.file_path = Some(target);
    Ok(())
}

/// Download every slideshow image in source order to `<dir>/<1..N>.jpeg`,
/// replacing the record's image list in place with the local paths.
pub async fn download_slideshow(
    http: &reqwest::Client,
    post: &mut SlideshowPost,
    dir: &Path,
    config: &Config,
) -> Result<(), AcquireError> {
    let mut local_paths = Vec::with_capacity(post.images.len());

    for (idx, image_url) in post.images.iter().enumerate() {
        let target = dir.join(format!("{}.jpeg", idx + 1));
        let bytes = fetch_bytes(http, image_url, config)
            .await
            .map_err(|e| download_failure(&post.core.url, &e))?;
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| download_failure(&post.core.url, &e.into()))?;
        debug!(path = %target.display(), "slideshow image saved");
        local_paths.push(target.display().to_string());
    }

    info!(count = local_paths.len(), "slideshow saved");
    post.images = local_paths;
    Ok(())
}

async fn fetch_bytes(
    http: &reqwest::Client,
    url: &str,
    config: &Config,
) -> anyhow::Result<Vec<u8>> {
    use anyhow::Context;

    let response = http
        .get(url)
        .header("User-Agent", &config.user_agent)
        .send()
        .await
        .with_context(|| format!("failed to fetch {url}"))?
        .error_for_status()
        .with_context(|| format!("fetch rejected for {url}"))?;
    Ok(response.bytes().await.context("failed to read body")?.to_vec())
}

fn download_failure(url: &str, cause: &anyhow::Error) -> AcquireError {
    AcquireError::DownloadFailed {
        url: url.to_string(),
        reason: format!("{cause:#}"),
    }
}
