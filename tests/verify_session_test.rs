//! Full captcha verification round-trip over a mock session.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tiktok_post_archiver::captcha::verify_session;
use tiktok_post_archiver::session::{BrowserSession, Cookie, JsonRequest, StorageEntry};
use tiktok_post_archiver::{AcquireError, Config};

const POST_URL: &str = "https://www.tiktok.com/@someuser/video/7123";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

fn png_bytes(img: &DynamicImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

fn noisy_background(width: u32, height: u32) -> DynamicImage {
    let mut state: u32 = 0x0BAD_CAFE;
    let mut img = RgbImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let v = (state & 0xFF) as u8;
            img.put_pixel(x, y, image::Rgb([v, v.wrapping_add(90), v.wrapping_mul(7)]));
        }
    }
    DynamicImage::ImageRgb8(img)
}

/// Session with tokens in place and captcha endpoints simulated in-process.
struct CaptchaSession {
    /// Served in order by `/captcha/get`; the last entry repeats.
    challenge_responses: Vec<Value>,
    served: AtomicUsize,
    /// Requests seen by `fetch_json`, for wire-shape assertions.
    requests: Mutex<Vec<JsonRequest>>,
    accept_solution: bool,
}

impl CaptchaSession {
    fn new(challenge_responses: Vec<Value>, accept_solution: bool) -> Self {
        Self {
            challenge_responses,
            served: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            accept_solution,
        }
    }
}

#[async_trait]
impl BrowserSession for CaptchaSession {
    async fn navigate(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn challenge_present(&self) -> Result<bool> {
        Ok(true)
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        Ok(vec![
            Cookie {
                name: "s_v_web_id".to_string(),
                value: "verify_fp_fixture".to_string(),
                secure: false,
            },
            Cookie {
                name: "msToken".to_string(),
                value: "ms_token_fixture".to_string(),
                secure: true,
            },
        ])
    }

    async fn local_storage(&self) -> Result<Vec<StorageEntry>> {
        Ok(vec![StorageEntry {
            name: "__tea_cache_tokens_1988".to_string(),
            value: r#"{"user_unique_id":"7412345678901234567"}"#.to_string(),
        }])
    }

    async fn fetch_json(&self, request: &JsonRequest) -> Result<Value> {
        self.requests.lock().unwrap().push(request.clone());
        if request.url.contains("/captcha/get") {
            let idx = self.served.fetch_add(1, Ordering::SeqCst);
            let last = self.challenge_responses.len() - 1;
            Ok(self.challenge_responses[idx.min(last)].clone())
        } else if request.url.contains("/captcha/verify") {
            let message = if self.accept_solution {
                "Verification complete"
            } else {
                "Verification failed"
            };
            Ok(json!({"message": message}))
        } else {
            Err(anyhow!("unexpected fetch to {}", request.url))
        }
    }

    async fn capture_payload(&self, _f: &str, _t: Duration) -> Result<Value> {
        unimplemented!("not part of verification")
    }

    async fn capture_response_body(&self, _f: &str, _t: Duration) -> Result<Vec<u8>> {
        unimplemented!("not part of verification")
    }

    async fn video_source_url(&self) -> Result<String> {
        unimplemented!("not part of verification")
    }

    async fn trigger_native_save(&self, _d: &Path, _t: Duration) -> Result<PathBuf> {
        unimplemented!("not part of verification")
    }

    async fn close(self: Box<Self>) {}
}

async fn serve_challenge_images(server: &MockServer) {
    let background = noisy_background(340, 212);
    let piece = background.crop_imm(150, 60, 50, 50);

    Mock::given(method("GET"))
        .and(path("/bg.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(&background)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/piece.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(&piece)))
        .mount(server)
        .await;
}

fn challenge_response(server: &MockServer) -> Value {
    json!({
        "data": {
            "id": "captcha-abc",
            "verify_id": "verify-def",
            "mode": "slide",
            "question": {
                "url1": format!("{}/bg.png", server.uri()),
                "url2": format!("{}/piece.png", server.uri()),
                "tip_y": 64
            }
        }
    })
}

fn fast_config() -> Config {
    Config {
        token_timeout: Duration::from_secs(1),
        token_poll_interval: Duration::from_millis(10),
        challenge_poll_interval: Duration::from_millis(10),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_verification_round_trip_succeeds() {
    init_tracing();
    let server = MockServer::start().await;
    serve_challenge_images(&server).await;

    let session = CaptchaSession::new(vec![challenge_response(&server)], true);

    verify_session(&session, &reqwest::Client::new(), &fast_config(), POST_URL)
        .await
        .unwrap();

    let requests = session.requests.lock().unwrap();
    assert_eq!(requests.len(), 2, "one get, one verify");

    // The challenge request carries the resolved tokens.
    let get = &requests[0];
    assert!(get.url.contains("/captcha/get"));
    let query: Vec<&str> = get.query.iter().map(|(k, _)| k.as_str()).collect();
    assert!(query.contains(&"did"));
    assert!(query.contains(&"fp"));
    assert!(query.contains(&"msToken"));
    assert!(get
        .query
        .iter()
        .any(|(k, v)| k == "fp" && v == "verify_fp_fixture"));
    assert!(get
        .query
        .iter()
        .any(|(k, v)| k == "did" && v == "7412345678901234567"));

    // The submission carries both identifiers and the drag path.
    let verify = &requests[1];
    assert!(verify.url.contains("/captcha/verify"));
    let body = verify.body.as_ref().unwrap();
    assert_eq!(body["id"], "captcha-abc");
    assert_eq!(body["verify_id"], "verify-def");
    assert_eq!(body["mode"], "slide");
    assert!(!body["reply"].as_array().unwrap().is_empty());
    assert!(verify
        .query
        .iter()
        .any(|(k, v)| k == "challenge_code" && v == "99999"));
}

#[tokio::test]
async fn test_rejected_verification_is_challenge_failure() {
    init_tracing();
    let server = MockServer::start().await;
    serve_challenge_images(&server).await;

    let session = CaptchaSession::new(vec![challenge_response(&server)], false);

    let err = verify_session(&session, &reqwest::Client::new(), &fast_config(), POST_URL)
        .await
        .unwrap_err();
    match err {
        AcquireError::ChallengeFailed { url } => assert_eq!(url, POST_URL),
        other => panic!("expected ChallengeFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_non_slide_challenges_exhaust_request_budget() {
    init_tracing();
    // Non-slide modes carry no question block at all; only the mode may be
    // inspected before re-requesting.
    let session = CaptchaSession::new(
        vec![json!({
            "data": {"id": "captcha-abc", "verify_id": "verify-def", "mode": "whirl"}
        })],
        true,
    );

    let config = fast_config();
    let err = verify_session(&session, &reqwest::Client::new(), &config, POST_URL)
        .await
        .unwrap_err();
    assert!(matches!(err, AcquireError::ChallengeFailed { .. }));
    assert_eq!(
        session.requests.lock().unwrap().len() as u32,
        config.challenge_max_requests
    );
}

#[tokio::test]
async fn test_question_less_non_slide_is_reattempted() {
    init_tracing();
    let server = MockServer::start().await;
    serve_challenge_images(&server).await;

    // A whirl challenge without a question block first, then a real slide.
    let session = CaptchaSession::new(
        vec![
            json!({"data": {"id": "c1", "verify_id": "v1", "mode": "whirl"}}),
            challenge_response(&server),
        ],
        true,
    );

    verify_session(&session, &reqwest::Client::new(), &fast_config(), POST_URL)
        .await
        .unwrap();

    // Two challenge requests plus the verification submission.
    let requests = session.requests.lock().unwrap();
    let gets = requests.iter().filter(|r| r.url.contains("/captcha/get")).count();
    assert_eq!(gets, 2);
    assert!(requests.last().unwrap().url.contains("/captcha/verify"));
}
