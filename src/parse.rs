//! Canonical record construction from captured payloads.
//!
//! The upstream API has renamed and re-nested fields across versions, so the
//! payload shape is discriminated by structural probing, never by a version
//! flag. Three shapes are recognized:
//!
//! 1. item-detail API body: `itemInfo.itemStruct`
//! 2. `SIGI_STATE` page embed: `ItemModule.{post_id}`
//! 3. `__UNIVERSAL_DATA__` embed: `__DEFAULT_SCOPE__."webapp.video-detail".itemInfo.itemStruct`

use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::AcquireError;
use crate::post::{Post, PostCore, SlideshowPost, VideoPost};
use crate::urls;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemStruct {
    id: String,
    #[serde(default)]
    desc: String,
    create_time: EpochSeconds,
    author: Author,
    stats: Stats,
    image_post: Option<ImagePost>,
    video: Option<VideoInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Author {
    unique_id: String,
    nickname: String,
    avatar_larger: String,
    download_setting: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stats {
    digg_count: u64,
    share_count: u64,
    comment_count: u64,
    play_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagePost {
    images: Vec<ImageEntry>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    #[serde(rename = "imageURL")]
    image_url: ImageUrl,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageUrl {
    url_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoInfo {
    origin_cover: String,
    #[serde(default)]
    play_addr: Option<String>,
}

/// Creation timestamps arrive as integer epoch seconds, sometimes
/// stringified.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EpochSeconds {
    Num(i64),
    Str(String),
}

impl EpochSeconds {
    fn seconds(&self) -> Option<i64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Str(s) => s.parse().ok(),
        }
    }
}

/// Parse a captured payload into the canonical record.
///
/// The media variant is decided exactly once here, on the presence of the
/// image collection; downstream code matches on the resulting tag. Any
/// missing required key fails the whole parse; no partial record is ever
/// returned.
pub fn parse_post(raw: &Value, source_url: &str) -> Result<Post, AcquireError> {
    let item_value = probe_item_struct(raw, source_url).ok_or_else(|| AcquireError::ParseFailed {
        url: source_url.to_string(),
        reason: "payload matches no known schema".to_string(),
    })?;

    let item: ItemStruct =
        serde_json::from_value(item_value.clone()).map_err(|e| AcquireError::ParseFailed {
            url: source_url.to_string(),
            reason: e.to_string(),
        })?;

    let created_secs = item
        .create_time
        .seconds()
        .ok_or_else(|| parse_failure(source_url, "createTime is not an integer"))?;
    let created_at = Utc
        .timestamp_opt(created_secs, 0)
        .single()
        .ok_or_else(|| parse_failure(source_url, "createTime out of range"))?;

    let core = PostCore {
        url: urls::canonical_post_url(&item.author.unique_id, &item.id),
        post_id: item.id,
        author_username: item.author.unique_id.clone(),
        author_display_name: item.author.nickname,
        author_avatar: item.author.avatar_larger,
        author_url: urls::author_url(&item.author.unique_id),
        download_setting: item.author.download_setting,
        description: item.desc,
        created_at,
        like_count: item.stats.digg_count,
        share_count: item.stats.share_count,
        comment_count: item.stats.comment_count,
        view_count: item.stats.play_count,
    };

    if let Some(image_post) = item.image_post {
        let mut images = Vec::with_capacity(image_post.images.len());
        for entry in &image_post.images {
            // The last urlList entry is the highest-quality source.
            let url = entry
                .image_url
                .url_list
                .last()
                .ok_or_else(|| parse_failure(source_url, "image entry has empty urlList"))?;
            images.push(url.clone());
        }
        debug!(post_id = %core.post_id, count = images.len(), "parsed slideshow post");
        Ok(Post::Slideshow(SlideshowPost { core, images }))
    } else {
        let video = item
            .video
            .ok_or_else(|| parse_failure(source_url, "payload has neither imagePost nor video"))?;
        debug!(post_id = %core.post_id, "parsed video post");
        Ok(Post::Video(VideoPost {
            core,
            thumbnail: video.origin_cover,
            media_url: video.play_addr,
            file_path: None,
        }))
    }
}

fn parse_failure(url: &str, reason: &str) -> AcquireError {
    AcquireError::ParseFailed {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

/// Find the item structure in whichever known shape the payload uses.
fn probe_item_struct<'a>(raw: &'a Value, source_url: &str) -> Option<&'a Value> {
    if let Some(item) = raw.pointer("/itemInfo/itemStruct") {
        return Some(item);
    }

    if let Some(modules) = raw.get("ItemModule").and_then(Value::as_object) {
        // Keyed by post id; prefer the entry matching the source URL.
        if let Some(post_id) = urls::extract_post_id(source_url) {
            if let Some(item) = modules.get(&post_id) {
                return Some(item);
            }
        }
        return modules.values().next();
    }

    raw.pointer("/__DEFAULT_SCOPE__/webapp.video-detail/itemInfo/itemStruct")
}
