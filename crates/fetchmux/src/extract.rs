//! Extraction engine boundary.
//!
//! Given a source URL, an extraction engine produces the list of available
//! formats and descriptive metadata. The engine itself (its discovery,
//! installation, scraping) is outside this crate; callers plug any
//! implementation in through [`MediaExtractor`]. The engine's loosely-typed
//! response is decoded into strict [`Format`]/[`MediaInfo`] records at this
//! boundary and carried as such through the rest of the pipeline.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::DownloadError;
use crate::format::{Format, MediaInfo};

/// Strictly-typed extraction result.
#[derive(Debug, Clone, Deserialize)]
pub struct Extraction {
    pub formats: Vec<Format>,
    #[serde(flatten)]
    pub info: MediaInfo,
}

impl Extraction {
    /// Decode an engine's JSON response (formats list plus descriptive
    /// fields at the top level, unknown fields ignored).
    pub fn from_json(url: &str, json: &str) -> Result<Self, DownloadError> {
        serde_json::from_str(json)
            .map_err(|e| DownloadError::extraction(url, format!("malformed engine response: {e}")))
    }
}

/// The metadata extraction engine, seen from the pipeline.
///
/// One blocking call per download, made before format selection. Failure
/// means the URL is unsupported or unreachable.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract(&self, url: &str, policy: &str) -> Result<Extraction, DownloadError>;
}
