//! Strictly-typed format and metadata records.
//!
//! The extraction engine reports available variants as loosely-typed JSON
//! with arbitrary optional fields. Everything the pipeline needs is decoded
//! here, once, at the boundary; downstream code only ever sees these types.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::DownloadError;

/// Codec sentinel used by the extraction engine for "this stream kind is absent".
pub const CODEC_NONE: &str = "none";

/// Codec family that the target mp4 container cannot carry without re-encoding.
const AV1_CODEC_PREFIX: &str = "av01.";

/// One independently downloadable encoded variant of a media asset.
///
/// Field names follow the extraction engine's wire format so the record
/// deserializes directly from its JSON. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    pub format_id: String,
    /// Container extension, e.g. `mp4`, `webm`, `m4a`.
    pub ext: String,
    #[serde(default = "codec_none")]
    pub vcodec: String,
    #[serde(default = "codec_none")]
    pub acodec: String,
    pub url: String,
    /// Required request headers (auth/signature); must be sent on every
    /// range request of this format.
    #[serde(default)]
    pub http_headers: HashMap<String, String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub fps: Option<f64>,
    /// Total bitrate in kbit/s.
    #[serde(default)]
    pub tbr: Option<f64>,
    /// Audio bitrate in kbit/s.
    #[serde(default)]
    pub abr: Option<f64>,
    /// Video bitrate in kbit/s.
    #[serde(default)]
    pub vbr: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub quality: Option<f64>,
    #[serde(default)]
    pub format_note: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
}

fn codec_none() -> String {
    CODEC_NONE.to_string()
}

impl Format {
    pub fn is_audio_only(&self) -> bool {
        self.vcodec == CODEC_NONE
    }

    pub fn is_video_only(&self) -> bool {
        self.acodec == CODEC_NONE
    }

    /// A muxed format carries both streams in one container.
    pub fn is_muxed(&self) -> bool {
        !self.is_audio_only() && !self.is_video_only()
    }

    /// True when this format is one of two separate streams that must be
    /// combined into a single container.
    pub fn is_remux_needed(&self) -> bool {
        self.is_audio_only() || self.is_video_only()
    }

    /// True when the stream cannot be delivered as-is: an mp4 carrying an
    /// AV1 family codec, or anything that is neither mp4 nor the target
    /// m4a audio container.
    pub fn is_transcode_needed(&self) -> bool {
        if self.ext == "mp4" {
            self.vcodec.starts_with(AV1_CODEC_PREFIX)
        } else {
            self.ext != "m4a"
        }
    }

    /// Build the validated header map sent with every request for this format.
    pub fn header_map(&self) -> Result<HeaderMap, DownloadError> {
        let mut headers = HeaderMap::with_capacity(self.http_headers.len());
        for (name, value) in &self.http_headers {
            let name = name.parse::<HeaderName>().map_err(|e| {
                DownloadError::invalid_format(&self.format_id, format!("header name `{name}`: {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                DownloadError::invalid_format(&self.format_id, format!("header value for `{name:?}`: {e}"))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Descriptive metadata returned by the extraction engine alongside the
/// format list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    /// Duration in seconds, when the engine knows it.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub upload_date: Option<String>,
}

impl MediaInfo {
    /// Title sanitized for filesystem use.
    pub fn safe_title(&self) -> String {
        sanitize_title(&self.title)
    }
}

/// Replace path-hostile characters so the title can name files.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect()
}
