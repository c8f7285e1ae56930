use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Reference width the captcha verifier expects both images to be scaled to.
pub const MODIFIED_IMAGE_WIDTH: u32 = 340;

/// Subdomain serving the slider captcha endpoints.
pub const CAPTCHA_HOST: &str = "verification-i18n.tiktok.com";

/// Protocol version sent with every captcha submission.
pub const CAPTCHA_VERSION: u32 = 2;

/// Magic challenge code expected by the verify endpoint.
pub const CHALLENGE_CODE: u32 = 99_999;

/// OS type identifier sent with captcha requests.
pub const OS_TYPE: u32 = 2;

/// localStorage key (substring match) holding the device id blob.
pub const DEVICE_ID_STORAGE_KEY: &str = "__tea_cache_tokens";

/// Cookie carrying the session fingerprint.
pub const VERIFY_FP_COOKIE: &str = "s_v_web_id";

/// Secure cookie carrying the short-lived session token.
pub const MS_TOKEN_COOKIE: &str = "msToken";

/// User agent for direct HTTP fetches (captcha images, slideshow images).
///
/// A realistic browser user agent so image requests blend in with normal
/// browser traffic.
pub const FETCH_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Immutable client configuration.
///
/// Protocol constants plus the pacing knobs for challenge and token polling.
/// Built once at startup and threaded through the components that need it.
#[derive(Debug, Clone)]
pub struct Config {
    pub captcha_host: String,
    pub reference_image_width: u32,
    pub captcha_version: u32,
    pub challenge_code: u32,
    pub os_type: u32,
    pub device_id_storage_key: String,
    pub user_agent: String,

    /// Delay between `/captcha/get` requests while waiting for a slide challenge.
    pub challenge_poll_interval: Duration,
    /// Maximum number of `/captcha/get` requests per verification.
    pub challenge_max_requests: u32,

    /// How long to wait for each session token to be set.
    pub token_timeout: Duration,
    /// Delay between cookie/storage snapshots while waiting for a token.
    pub token_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            captcha_host: CAPTCHA_HOST.to_string(),
            reference_image_width: MODIFIED_IMAGE_WIDTH,
            captcha_version: CAPTCHA_VERSION,
            challenge_code: CHALLENGE_CODE,
            os_type: OS_TYPE,
            device_id_storage_key: DEVICE_ID_STORAGE_KEY.to_string(),
            user_agent: FETCH_USER_AGENT.to_string(),
            challenge_poll_interval: Duration::from_millis(100),
            challenge_max_requests: 5,
            token_timeout: Duration::from_secs(30),
            token_poll_interval: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// protocol defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an override is present but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            captcha_host: env_or_default("TTPA_CAPTCHA_HOST", &defaults.captcha_host),
            challenge_poll_interval: Duration::from_millis(parse_env_u64(
                "TTPA_CHALLENGE_POLL_MS",
                100,
            )?),
            challenge_max_requests: parse_env_u32("TTPA_CHALLENGE_MAX_REQUESTS", 5)?,
            token_timeout: Duration::from_millis(parse_env_u64("TTPA_TOKEN_TIMEOUT_MS", 30_000)?),
            token_poll_interval: Duration::from_millis(parse_env_u64("TTPA_TOKEN_POLL_MS", 100)?),
            ..defaults
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.challenge_max_requests == 0 {
            return Err(ConfigError::InvalidValue {
                name: "TTPA_CHALLENGE_MAX_REQUESTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.captcha_host.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "TTPA_CAPTCHA_HOST".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.token_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "TTPA_TOKEN_POLL_MS".to_string(),
                message: "must be nonzero".to_string(),
            });
        }
        Ok(())
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}
