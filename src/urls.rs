//! TikTok URL recognition and normalization.

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::FETCH_USER_AGENT;

static POST_URL_PATTERNS: std::sync::LazyLock<Vec<Regex>> = std::sync::LazyLock::new(|| {
    vec![
        Regex::new(r"^https?://(www\.)?tiktok\.com/@[^/]+/(video|photo)/\d+").unwrap(),
        Regex::new(r"^https?://m\.tiktok\.com/@[^/]+/(video|photo)/\d+").unwrap(),
        Regex::new(r"^https?://vm\.tiktok\.com/\w+").unwrap(),
    ]
});

/// Check whether a URL looks like a shareable TikTok post link.
#[must_use]
pub fn is_post_url(url: &str) -> bool {
    POST_URL_PATTERNS.iter().any(|p| p.is_match(url))
}

/// Extract the numeric post id from a full post URL.
///
/// Handles both `/video/{id}` and `/photo/{id}` paths:
/// - `https://www.tiktok.com/@user/video/1234567890123456789`
/// - `https://www.tiktok.com/@user/photo/1234567890123456789`
#[must_use]
pub fn extract_post_id(url: &str) -> Option<String> {
    for marker in ["/video/", "/photo/"] {
        if let Some(idx) = url.find(marker) {
            let rest = &url[idx + marker.len()..];
            let post_id: String = rest.chars().take_while(char::is_ascii_digit).collect();
            if !post_id.is_empty() {
                return Some(post_id);
            }
        }
    }
    None
}

/// Canonical post URL for an author/id pair.
#[must_use]
pub fn canonical_post_url(author_username: &str, post_id: &str) -> String {
    format!("https://tiktok.com/@{author_username}/video/{post_id}")
}

/// Canonical author profile URL.
#[must_use]
pub fn author_url(author_username: &str) -> String {
    format!("https://tiktok.com/@{author_username}")
}

/// Resolve a `vm.tiktok.com` short URL to its full post URL by following
/// redirects. Returns the input unchanged for non-short URLs.
pub async fn resolve_short_url(http: &reqwest::Client, url: &str) -> Result<String> {
    if !url.contains("vm.tiktok.com") {
        return Ok(url.to_string());
    }

    let response = http
        .get(url)
        .header("User-Agent", FETCH_USER_AGENT)
        .send()
        .await
        .context("failed to resolve short URL")?;

    Ok(response.url().to_string())
}
