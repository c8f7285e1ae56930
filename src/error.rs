use thiserror::Error;

/// Failure taxonomy for a post acquisition.
///
/// Every stage reports its own kind; the retry loop in [`crate::acquire`]
/// wraps the terminal cause in [`AcquireError::RetryExhausted`] without
/// reclassifying it.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// The slider captcha could not be solved or verification rejected the
    /// submission within the attempt budget.
    #[error("captcha verification failed for {url}")]
    ChallengeFailed { url: String },

    /// A required session identifier never appeared within its timeout.
    #[error("session token {name} did not appear within {waited_ms}ms")]
    TokenTimeout { name: String, waited_ms: u64 },

    /// The captured payload did not match any known schema.
    #[error("unrecognized post payload from {url}: {reason}")]
    ParseFailed { url: String, reason: String },

    /// The chosen media-acquisition strategy did not complete.
    #[error("media download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The browsing-session capability itself failed (navigation, capture,
    /// script evaluation).
    #[error("browser session error: {0}")]
    Session(#[from] anyhow::Error),

    /// All attempts were spent; carries the last underlying cause.
    #[error("giving up on {url} after {attempts} attempts")]
    RetryExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: Box<AcquireError>,
    },
}

impl AcquireError {
    /// Whether this failure is plausibly transient across a fresh browser
    /// session. Parse failures are deterministic for a given payload shape
    /// and are not considered transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ChallengeFailed { .. }
            | Self::TokenTimeout { .. }
            | Self::DownloadFailed { .. }
            | Self::Session(_) => true,
            Self::ParseFailed { .. } | Self::RetryExhausted { .. } => false,
        }
    }
}
