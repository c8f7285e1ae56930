//! Slider captcha handling: challenge fetch, solve, and verification.
//!
//! The verification endpoint serves a background image with a rectangular
//! gap and the matching cut-out piece. Solving means computing the piece's
//! offset ([`image::locate`]), synthesizing a human-like drag to that offset
//! ([`motion::synthesize`]), and submitting both identifiers with the path.

pub mod image;
pub mod motion;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AcquireError;
use crate::session::{BrowserSession, JsonRequest};
use crate::tokens::{self, SessionTokens};

use self::motion::MotionPath;

/// A slide challenge as issued by `/captcha/get`. Consumed once.
#[derive(Debug, Clone)]
pub struct ChallengeDescriptor {
    pub captcha_id: String,
    pub verify_id: String,
    pub mode: String,
    /// Background image (with the gap).
    pub background_url: String,
    /// Cut-out piece image.
    pub piece_url: String,
    /// Vertical coordinate of the slider tip row.
    pub tip_y: u32,
}

impl ChallengeDescriptor {
    /// Extract the descriptor from a raw `/captcha/get` response body.
    pub fn from_response(raw: &Value) -> Result<Self> {
        let data = raw
            .get("data")
            .ok_or_else(|| anyhow!("challenge response missing data"))?;
        let question = data
            .get("question")
            .ok_or_else(|| anyhow!("challenge response missing question"))?;

        let str_of = |v: &Value, key: &str| -> Result<String> {
            v.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| anyhow!("challenge response missing {key}"))
        };

        Ok(Self {
            captcha_id: str_of(data, "id")?,
            verify_id: str_of(data, "verify_id")?,
            mode: str_of(data, "mode")?,
            background_url: str_of(question, "url1")?,
            piece_url: str_of(question, "url2")?,
            tip_y: question
                .get("tip_y")
                .and_then(Value::as_u64)
                .ok_or_else(|| anyhow!("challenge response missing tip_y"))?
                as u32,
        })
    }
}

/// Submission shape expected by `/captcha/verify`.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeSubmission {
    pub modified_img_width: u32,
    pub id: String,
    pub mode: &'static str,
    pub reply: MotionPath,
    /// The verifier expects the path twice.
    pub reply2: MotionPath,
    pub verify_id: String,
    pub version: u32,
}

/// Request a challenge until one with mode `slide` arrives, bounded by the
/// configured request budget.
pub async fn fetch_challenge(
    session: &dyn BrowserSession,
    tokens: &SessionTokens,
    config: &Config,
) -> Result<ChallengeDescriptor> {
    let url = format!("https://{}/captcha/get", config.captcha_host);

    for attempt in 1..=config.challenge_max_requests {
        tokio::time::sleep(config.challenge_poll_interval).await;

        let request = JsonRequest::get(url.as_str())
            .query("did", tokens.device_id)
            .query("device_id", tokens.device_id)
            .query("os_type", config.os_type)
            .query("fp", &tokens.verify_fp)
            .query("type", "verify")
            .query("subtype", "slide")
            .query("msToken", &tokens.ms_token)
            .header("Accept", "application/json, text/plain, */*");

        let body = session
            .fetch_json(&request)
            .await
            .context("captcha/get request failed")?;

        // Non-slide challenges may omit the question block entirely, so the
        // mode is probed before the full descriptor is parsed.
        let mode = body.pointer("/data/mode").and_then(Value::as_str);
        if mode != Some("slide") {
            debug!(mode = mode.unwrap_or("<missing>"), attempt, "challenge is not a slide, re-requesting");
            continue;
        }

        let descriptor = ChallengeDescriptor::from_response(&body)?;
        debug!(captcha_id = %descriptor.captcha_id, attempt, "received slide challenge");
        return Ok(descriptor);
    }

    Err(anyhow!(
        "no slide challenge in {} requests",
        config.challenge_max_requests
    ))
}

/// Solve a challenge: fetch both images, locate the piece, synthesize the
/// drag, and package the submission. No internal retry; failures surface to
/// the caller.
pub async fn solve(
    http: &reqwest::Client,
    descriptor: &ChallengeDescriptor,
    config: &Config,
) -> Result<ChallengeSubmission> {
    let background_bytes = fetch_image(http, &descriptor.background_url, config).await?;
    let piece_bytes = fetch_image(http, &descriptor.piece_url, config).await?;

    let background = image::decode(&background_bytes)?;
    let piece = image::decode(&piece_bytes)?;

    // Work in the verifier's coordinate space: both images are scaled by the
    // same ratio so the reported offset matches the reference width.
    let ratio = f64::from(config.reference_image_width) / f64::from(background.width());
    let background = image::rescale(&background, ratio);
    let piece = image::rescale(&piece, ratio);

    let (x, y) = image::locate(&background, &piece)?;
    debug!(x, y, ratio, "located captcha piece");

    let path = motion::synthesize(x, descriptor.tip_y);

    Ok(ChallengeSubmission {
        modified_img_width: config.reference_image_width,
        id: descriptor.captcha_id.clone(),
        mode: "slide",
        reply: path.clone(),
        reply2: path,
        verify_id: descriptor.verify_id.clone(),
        version: config.captcha_version,
    })
}

async fn fetch_image(http: &reqwest::Client, url: &str, config: &Config) -> Result<Vec<u8>> {
    let response = http
        .get(url)
        .header("User-Agent", &config.user_agent)
        .send()
        .await
        .with_context(|| format!("failed to fetch captcha image {url}"))?
        .error_for_status()
        .with_context(|| format!("captcha image fetch rejected for {url}"))?;
    let bytes = response
        .bytes()
        .await
        .context("failed to read captcha image body")?;
    Ok(bytes.to_vec())
}

/// Complete the whole verification round-trip for the current session.
///
/// Resolves the session tokens, fetches a slide challenge, solves it, and
/// posts the submission. Succeeds only when the verifier acknowledges with
/// "Verification complete".
pub async fn verify_session(
    session: &dyn BrowserSession,
    http: &reqwest::Client,
    config: &Config,
    post_url: &str,
) -> Result<(), AcquireError> {
    let tokens = tokens::resolve(session, config).await?;

    let outcome = verify_once(session, http, config, &tokens).await;
    match outcome {
        Ok(true) => {
            info!(url = %post_url, "captcha verification complete");
            Ok(())
        }
        Ok(false) => {
            warn!(url = %post_url, "captcha verification rejected");
            Err(AcquireError::ChallengeFailed {
                url: post_url.to_string(),
            })
        }
        Err(e) => {
            warn!(url = %post_url, error = %format!("{e:#}"), "captcha verification errored");
            Err(AcquireError::ChallengeFailed {
                url: post_url.to_string(),
            })
        }
    }
}

async fn verify_once(
    session: &dyn BrowserSession,
    http: &reqwest::Client,
    config: &Config,
    tokens: &SessionTokens,
) -> Result<bool> {
    let descriptor = fetch_challenge(session, tokens, config).await?;
    let submission = solve(http, &descriptor, config).await?;

    let url = format!("https://{}/captcha/verify", config.captcha_host);
    let request = JsonRequest::post(url.as_str(), serde_json::to_value(&submission)?)
        .query("did", tokens.device_id)
        .query("device_id", tokens.device_id)
        .query("os_type", config.os_type)
        .query("fp", &tokens.verify_fp)
        .query("type", "verify")
        .query("subtype", "slide")
        .query("mode", "slide")
        .query("msToken", &tokens.ms_token)
        .query("challenge_code", config.challenge_code)
        .header("Accept", "application/json, text/plain, */*")
        .header("Content-Type", "application/json;charset=utf-8");

    let response = session
        .fetch_json(&request)
        .await
        .context("captcha/verify request failed")?;

    Ok(response.get("message").and_then(Value::as_str) == Some("Verification complete"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slide_response() -> Value {
        json!({
            "data": {
                "id": "captcha-123",
                "verify_id": "verify-456",
                "mode": "slide",
                "question": {
                    "url1": "https://p16.example.com/bg.jpeg",
                    "url2": "https://p16.example.com/piece.png",
                    "tip_y": 68
                }
            }
        })
    }

    #[test]
    fn test_descriptor_from_response() {
        let descriptor = ChallengeDescriptor::from_response(&slide_response()).unwrap();
        assert_eq!(descriptor.captcha_id, "captcha-123");
        assert_eq!(descriptor.verify_id, "verify-456");
        assert_eq!(descriptor.mode, "slide");
        assert_eq!(descriptor.tip_y, 68);
        assert!(descriptor.background_url.ends_with("bg.jpeg"));
        assert!(descriptor.piece_url.ends_with("piece.png"));
    }

    #[test]
    fn test_descriptor_missing_question_rejected() {
        let raw = json!({"data": {"id": "x", "verify_id": "y", "mode": "slide"}});
        assert!(ChallengeDescriptor::from_response(&raw).is_err());
    }

    #[test]
    fn test_submission_wire_shape() {
        let path = motion::synthesize(12, 68);
        let submission = ChallengeSubmission {
            modified_img_width: 340,
            id: "captcha-123".to_string(),
            mode: "slide",
            reply: path.clone(),
            reply2: path,
            verify_id: "verify-456".to_string(),
            version: 2,
        };
        let value = serde_json::to_value(&submission).unwrap();
        assert_eq!(value["modified_img_width"], 340);
        assert_eq!(value["mode"], "slide");
        assert_eq!(value["version"], 2);
        assert_eq!(value["reply"], value["reply2"]);
        assert!(value["reply"].as_array().is_some());
    }
}
