use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Fields shared by every TikTok post, regardless of media kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostCore {
    pub url: String,
    pub post_id: String,
    pub author_username: String,
    pub author_display_name: String,
    pub author_avatar: String,
    pub author_url: String,
    /// Platform download-permission flag; 0 means downloads are allowed
    /// through the native UI.
    pub download_setting: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub like_count: u64,
    pub share_count: u64,
    pub comment_count: u64,
    pub view_count: u64,
}

/// A post whose media is a single video.
#[derive(Debug, Clone, Serialize)]
pub struct VideoPost {
    pub core: PostCore,
    pub thumbnail: String,
    /// Direct playback URL when the payload carried one.
    pub media_url: Option<String>,
    /// Set only after a successful download.
    pub file_path: Option<PathBuf>,
}

/// A post whose media is an ordered image slideshow.
#[derive(Debug, Clone, Serialize)]
pub struct SlideshowPost {
    pub core: PostCore,
    /// Image sources in presentation order. Remote URLs after parsing;
    /// replaced in place with local paths after a download.
    pub images: Vec<String>,
}

/// Canonical post record, discriminated once at parse time.
///
/// Downstream code matches on the variant instead of re-inspecting the raw
/// payload structure.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Post {
    Video(VideoPost),
    Slideshow(SlideshowPost),
}

impl Post {
    #[must_use]
    pub fn core(&self) -> &PostCore {
        match self {
            Self::Video(v) => &v.core,
            Self::Slideshow(s) => &s.core,
        }
    }

    #[must_use]
    pub fn is_slideshow(&self) -> bool {
        matches!(self, Self::Slideshow(_))
    }
}
