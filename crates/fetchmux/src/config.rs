use std::ops::Range;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::DownloadError;
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Default size of one ranged request window: 10 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 10_485_760;

/// Trim window on the media timeline, in seconds.
pub type TimeRange = Range<f64>;

/// Per-download behavior flags. Independently combinable and frozen once a
/// download is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Leave separately downloaded streams as the final artifacts instead of
    /// combining them.
    pub no_remux: bool,
    /// Never re-encode, even when the container/codec needs it.
    pub no_transcode: bool,
    /// Fetch via fixed-size ranged requests instead of one streaming request.
    pub chunked: bool,
    /// Caller hint that the download runs detached from an interactive
    /// session; carried on the download and logged, nothing more.
    pub background: bool,
}

/// Configurable options for the transfer layer.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Size of one byte-range window in chunked mode.
    pub chunk_size: u64,

    /// Bounded number of in-flight range requests per stream.
    pub range_window: usize,

    /// Retry behavior for a failed range request.
    pub retry: RetryPolicy,

    /// Connection timeout (time to establish initial connection).
    pub connect_timeout: Duration,

    /// Inactivity timeout: a read yielding no bytes for this long counts as
    /// a transient failure subject to retry.
    pub inactivity_timeout: Duration,

    /// Whether to follow redirects.
    pub follow_redirects: bool,

    /// User agent string.
    pub user_agent: String,

    /// Baseline headers sent with every request; per-format required
    /// headers are layered on top and take precedence.
    pub headers: HeaderMap,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            range_window: 3,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
        }
    }
}

impl DownloaderConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("*/*"),
        );

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        default_headers
    }
}

/// Build the shared HTTP client from a transfer configuration.
pub fn create_client(config: &DownloaderConfig) -> Result<reqwest::Client, DownloadError> {
    let redirect = if config.follow_redirects {
        reqwest::redirect::Policy::default()
    } else {
        reqwest::redirect::Policy::none()
    };

    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(config.headers.clone())
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.inactivity_timeout)
        .redirect(redirect)
        .build()?;

    Ok(client)
}
