//! Shared fixtures for unit tests.

use std::collections::HashMap;

use crate::format::{CODEC_NONE, Format, MediaInfo};

pub(crate) fn video_only(id: &str, height: u32, ext: &str, vcodec: &str, tbr: f64) -> Format {
    Format {
        format_id: id.to_string(),
        ext: ext.to_string(),
        vcodec: vcodec.to_string(),
        acodec: CODEC_NONE.to_string(),
        url: format!("http://media.test/{id}"),
        http_headers: HashMap::new(),
        height: Some(height),
        width: Some(height * 16 / 9),
        fps: Some(30.0),
        tbr: Some(tbr),
        abr: None,
        vbr: Some(tbr),
        filesize: None,
        quality: None,
        format_note: None,
        protocol: Some("https".to_string()),
        container: None,
    }
}

pub(crate) fn audio_only(id: &str, abr: f64) -> Format {
    Format {
        format_id: id.to_string(),
        ext: "m4a".to_string(),
        vcodec: CODEC_NONE.to_string(),
        acodec: "mp4a.40.2".to_string(),
        url: format!("http://media.test/{id}"),
        http_headers: HashMap::new(),
        height: None,
        width: None,
        fps: None,
        tbr: Some(abr),
        abr: Some(abr),
        vbr: None,
        filesize: None,
        quality: None,
        format_note: None,
        protocol: Some("https".to_string()),
        container: None,
    }
}

pub(crate) fn muxed(id: &str, height: u32, ext: &str) -> Format {
    Format {
        format_id: id.to_string(),
        ext: ext.to_string(),
        vcodec: "avc1.42001E".to_string(),
        acodec: "mp4a.40.2".to_string(),
        url: format!("http://media.test/{id}"),
        http_headers: HashMap::new(),
        height: Some(height),
        width: Some(height * 16 / 9),
        fps: Some(30.0),
        tbr: Some(500.0 + height as f64),
        abr: Some(96.0),
        vbr: Some(400.0 + height as f64),
        filesize: None,
        quality: None,
        format_note: None,
        protocol: Some("https".to_string()),
        container: None,
    }
}

pub(crate) fn info(title: &str) -> MediaInfo {
    MediaInfo {
        id: "test-id".to_string(),
        title: title.to_string(),
        duration: Some(60.0),
        uploader: None,
        webpage_url: None,
        thumbnail: None,
        description: None,
        upload_date: None,
    }
}
