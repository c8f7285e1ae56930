//! TikTok post archiver library.
//!
//! Retrieves the metadata and media of a single TikTok post from its
//! shareable URL through a headless browser, solving the slider captcha and
//! resolving the short-lived session tokens the platform sets client-side.
//!
//! ```no_run
//! use tiktok_post_archiver::{acquire, AcquireOptions, ChromiumOptions, ChromiumProvider, Config};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! config.validate()?;
//! let provider = ChromiumProvider::new(ChromiumOptions::default());
//! let http = reqwest::Client::new();
//!
//! let options = AcquireOptions::new("https://www.tiktok.com/@user/video/7123456789012345678");
//! let post = acquire(&provider, &http, &config, &options).await?;
//! println!("{} by @{}", post.core().post_id, post.core().author_username);
//! # Ok(())
//! # }
//! ```

pub mod acquire;
pub mod browser;
pub mod captcha;
pub mod config;
pub mod download;
pub mod error;
pub mod parse;
pub mod post;
pub mod session;
pub mod tokens;
pub mod urls;

pub use acquire::{acquire, AcquireOptions, RetryPolicy};
pub use browser::{ChromiumOptions, ChromiumProvider};
pub use config::{Config, ConfigError};
pub use download::DownloadStrategy;
pub use error::AcquireError;
pub use post::{Post, PostCore, SlideshowPost, VideoPost};
pub use session::{BrowserProvider, BrowserSession};
pub use tokens::SessionTokens;
