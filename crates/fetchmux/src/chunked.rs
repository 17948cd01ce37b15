//! Chunked, resumable HTTP transfer of one format's byte stream.
//!
//! In chunked mode the remote resource is split into fixed-size byte ranges
//! requested with `Range` headers; a bounded window of ranges is in flight
//! at once and completed ranges are committed strictly in offset order, so
//! the resume record only ever advances contiguously. In unchunked mode a
//! single streaming request is used, with best-effort resume via a `Range`
//! header and restart-from-zero when the server does not support ranges.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use humansize::{BINARY, format_size};
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;
use tracing::{debug, info, instrument, warn};

use crate::config::DownloaderConfig;
use crate::error::DownloadError;
use crate::events::{DownloadEvent, EventChannel};
use crate::format::Format;
use crate::partial::PartialFile;
use crate::retry::retry_with_backoff;

/// One byte-range window to request.
#[derive(Debug, Clone, Copy)]
struct RangeSpec {
    start: u64,
    /// Inclusive end offset.
    end: u64,
}

impl RangeSpec {
    fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    fn expected(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Outcome of the first ranged request, which doubles as server capability
/// detection.
enum Probe {
    /// Server honored the range; carries the chunk body and the total size
    /// parsed from `Content-Range`, when reported.
    Ranged { bytes: Bytes, total: Option<u64> },
    /// Server ignored the range and replied 200 with the full body.
    Full(Box<Response>),
    /// Requested offset is past the end: everything is already on disk.
    Complete,
}

/// Downloads one format into its partial file. Owns nothing shared: the
/// partial file and resume record are written only by this instance.
pub struct ChunkedDownloader {
    client: Client,
    config: Arc<DownloaderConfig>,
    events: EventChannel,
    token: CancellationToken,
}

impl ChunkedDownloader {
    pub fn new(
        client: Client,
        config: Arc<DownloaderConfig>,
        events: EventChannel,
        token: CancellationToken,
    ) -> Self {
        Self {
            client,
            config,
            events,
            token,
        }
    }

    /// Fetch the format into `part`, resuming from its committed offset, and
    /// finalize it to the format's native extension on success.
    ///
    /// Byte-progress events are published after every commit. On failure the
    /// partial file is preserved for a later resume.
    #[instrument(skip(self, format, part), fields(format_id = %format.format_id), level = "debug")]
    pub async fn fetch(
        &self,
        format: &Format,
        mut part: PartialFile,
        chunked: bool,
    ) -> Result<PathBuf, DownloadError> {
        let url = format.url.parse::<Url>().map_err(|e| {
            DownloadError::invalid_format(&format.format_id, format!("url `{}`: {e}", format.url))
        })?;
        let headers = format.header_map()?;

        let result = if chunked {
            self.fetch_chunked(format, &url, &headers, &mut part).await
        } else {
            self.fetch_streamed(format, &url, &headers, &mut part).await
        };

        match result {
            Ok(()) => part.finalize().await,
            Err(DownloadError::Cancelled) => {
                info!(url = %url, offset = part.checkpointed(), "transfer cancelled, partial kept");
                Err(DownloadError::Cancelled)
            }
            Err(err) => {
                warn!(url = %url, offset = part.checkpointed(), error = %err, "transfer failed, partial kept");
                Err(DownloadError::transfer_failed(
                    &format.format_id,
                    part.checkpointed(),
                    err.to_string(),
                ))
            }
        }
    }

    async fn fetch_chunked(
        &self,
        format: &Format,
        url: &Url,
        headers: &HeaderMap,
        part: &mut PartialFile,
    ) -> Result<(), DownloadError> {
        let start = part.checkpointed();
        let probe_spec = RangeSpec {
            start,
            end: start + self.config.chunk_size - 1,
        };

        let probe = retry_with_backoff(&self.config.retry, &self.token, |_| {
            probe_range(
                &self.client,
                url,
                headers,
                probe_spec,
                self.config.inactivity_timeout,
                &self.token,
            )
        })
        .await?;

        match probe {
            Probe::Complete => {
                debug!(url = %url, offset = start, "nothing left to fetch");
                Ok(())
            }
            Probe::Full(response) => {
                // No range support after all: restart from zero and stream.
                if part.checkpointed() > 0 {
                    warn!(url = %url, "server ignored range request, restarting from byte 0");
                    part.restart().await?;
                }
                part.set_total(response.content_length());
                self.drain_response(format, *response, part).await
            }
            Probe::Ranged { bytes, total } => {
                part.set_total(total);
                if let Some(total) = total {
                    info!(
                        url = %url,
                        size = %format_size(total, BINARY),
                        offset = start,
                        "chunked download started"
                    );
                }
                self.commit(format, part, &bytes).await?;

                match part.total() {
                    Some(total) => self.fetch_remaining_windowed(format, url, headers, part, total).await,
                    None => self.fetch_remaining_sequential(format, url, headers, part).await,
                }
            }
        }
    }

    /// Fetch all ranges past the current offset with a bounded in-flight
    /// window, committing strictly in offset order.
    async fn fetch_remaining_windowed(
        &self,
        format: &Format,
        url: &Url,
        headers: &HeaderMap,
        part: &mut PartialFile,
        total: u64,
    ) -> Result<(), DownloadError> {
        let chunk_size = self.config.chunk_size;
        let mut offsets = Vec::new();
        let mut offset = part.checkpointed();
        while offset < total {
            offsets.push(RangeSpec {
                start: offset,
                end: (offset + chunk_size).min(total) - 1,
            });
            offset += chunk_size;
        }

        let mut chunks = futures::stream::iter(offsets.into_iter().map(|spec| {
            let client = self.client.clone();
            let url = url.clone();
            let headers = headers.clone();
            let config = Arc::clone(&self.config);
            let token = self.token.clone();
            async move {
                retry_with_backoff(&config.retry, &token, |_| {
                    attempt_range(
                        &client,
                        &url,
                        &headers,
                        spec,
                        config.inactivity_timeout,
                        &token,
                    )
                })
                .await
            }
        }))
        .buffered(self.config.range_window.max(1));

        loop {
            let chunk = tokio::select! {
                _ = self.token.cancelled() => return Err(DownloadError::Cancelled),
                chunk = chunks.next() => chunk,
            };
            match chunk {
                Some(bytes) => self.commit(format, part, &bytes?).await?,
                None => return Ok(()),
            }
        }
    }

    /// Fallback when the server honors ranges but never reports a total:
    /// request one window at a time until a short chunk marks the end.
    async fn fetch_remaining_sequential(
        &self,
        format: &Format,
        url: &Url,
        headers: &HeaderMap,
        part: &mut PartialFile,
    ) -> Result<(), DownloadError> {
        loop {
            if self.token.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let start = part.checkpointed();
            let spec = RangeSpec {
                start,
                end: start + self.config.chunk_size - 1,
            };
            let bytes = match retry_with_backoff(&self.config.retry, &self.token, |_| {
                attempt_range(
                    &self.client,
                    url,
                    headers,
                    spec,
                    self.config.inactivity_timeout,
                    &self.token,
                )
            })
            .await
            {
                Ok(bytes) => bytes,
                // The previous window ended exactly at EOF.
                Err(DownloadError::HttpStatus { status, .. })
                    if status == StatusCode::RANGE_NOT_SATISFIABLE =>
                {
                    return Ok(());
                }
                Err(err) => return Err(err),
            };
            let len = bytes.len() as u64;
            self.commit(format, part, &bytes).await?;
            if len < self.config.chunk_size {
                return Ok(());
            }
        }
    }

    /// Single-request mode: one GET, resuming with a `Range` header when a
    /// partial exists; a 200 response restarts from zero.
    async fn fetch_streamed(
        &self,
        format: &Format,
        url: &Url,
        headers: &HeaderMap,
        part: &mut PartialFile,
    ) -> Result<(), DownloadError> {
        let offset = part.checkpointed();

        let response = retry_with_backoff(&self.config.retry, &self.token, |_| {
            open_stream(&self.client, url, headers, offset, &self.token)
        })
        .await?;

        if response.status() == StatusCode::PARTIAL_CONTENT {
            part.set_total(parse_content_range_total(response.headers()));
        } else {
            if offset > 0 {
                warn!(url = %url, "server ignored range request, restarting from byte 0");
                part.restart().await?;
            }
            part.set_total(response.content_length());
        }

        if let Some(total) = part.total() {
            info!(url = %url, size = %format_size(total, BINARY), "download started");
        } else {
            debug!(url = %url, "content length not available");
        }

        self.drain_response(format, response, part).await
    }

    /// Stream a response body into the partial file, checkpointing and
    /// publishing progress about once per chunk-size worth of bytes.
    async fn drain_response(
        &self,
        format: &Format,
        response: Response,
        part: &mut PartialFile,
    ) -> Result<(), DownloadError> {
        let mut stream = response.bytes_stream();
        let mut since_checkpoint: u64 = 0;

        loop {
            let next = tokio::select! {
                _ = self.token.cancelled() => return Err(DownloadError::Cancelled),
                next = tokio::time::timeout(self.config.inactivity_timeout, stream.next()) => {
                    next.map_err(|_| {
                        DownloadError::timeout(format!(
                            "no bytes received within {:?}",
                            self.config.inactivity_timeout
                        ))
                    })?
                }
            };
            match next {
                Some(Ok(bytes)) => {
                    part.write(&bytes).await?;
                    since_checkpoint += bytes.len() as u64;
                    if since_checkpoint >= self.config.chunk_size {
                        self.commit(format, part, &[]).await?;
                        since_checkpoint = 0;
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }
        self.commit(format, part, &[]).await
    }

    /// Write pending bytes, checkpoint the resume record, and publish the
    /// byte-progress event for this format.
    async fn commit(
        &self,
        format: &Format,
        part: &mut PartialFile,
        bytes: &[u8],
    ) -> Result<(), DownloadError> {
        if !bytes.is_empty() {
            part.write(bytes).await?;
        }
        part.checkpoint().await?;
        self.events.publish(DownloadEvent::ByteProgress {
            format_id: format.format_id.clone(),
            bytes_written: part.checkpointed(),
            bytes_total: part.total(),
        });
        Ok(())
    }
}

/// Single streaming GET, with a `Range` header when resuming.
async fn open_stream(
    client: &Client,
    url: &Url,
    headers: &HeaderMap,
    offset: u64,
    token: &CancellationToken,
) -> Result<Response, DownloadError> {
    if token.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }
    let mut request = client.get(url.clone()).headers(headers.clone());
    if offset > 0 {
        request = request.header(header::RANGE, format!("bytes={offset}-"));
    }
    let response = request.send().await?;
    match response.status() {
        StatusCode::OK | StatusCode::PARTIAL_CONTENT => Ok(response),
        status => Err(DownloadError::http_status(status, url.as_str(), "download")),
    }
}

/// First ranged request: detects range support and the total size.
async fn probe_range(
    client: &Client,
    url: &Url,
    headers: &HeaderMap,
    spec: RangeSpec,
    inactivity: Duration,
    token: &CancellationToken,
) -> Result<Probe, DownloadError> {
    if token.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }
    let response = client
        .get(url.clone())
        .headers(headers.clone())
        .header(header::RANGE, spec.header_value())
        .send()
        .await?;

    match response.status() {
        StatusCode::PARTIAL_CONTENT => {
            let total = parse_content_range_total(response.headers());
            let bytes = collect_body(response, None, inactivity, token).await?;
            Ok(Probe::Ranged { bytes, total })
        }
        StatusCode::OK => Ok(Probe::Full(Box::new(response))),
        StatusCode::RANGE_NOT_SATISFIABLE => Ok(Probe::Complete),
        status => Err(DownloadError::http_status(
            status,
            url.as_str(),
            "range probe",
        )),
    }
}

/// Request one byte window; the body must match the window exactly.
async fn attempt_range(
    client: &Client,
    url: &Url,
    headers: &HeaderMap,
    spec: RangeSpec,
    inactivity: Duration,
    token: &CancellationToken,
) -> Result<Bytes, DownloadError> {
    if token.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }
    let response = client
        .get(url.clone())
        .headers(headers.clone())
        .header(header::RANGE, spec.header_value())
        .send()
        .await?;

    if response.status() != StatusCode::PARTIAL_CONTENT {
        return Err(DownloadError::http_status(
            response.status(),
            url.as_str(),
            "range request",
        ));
    }
    collect_body(response, Some(spec.expected()), inactivity, token).await
}

/// Read a response body to completion under an inactivity timeout.
async fn collect_body(
    response: Response,
    expected: Option<u64>,
    inactivity: Duration,
    token: &CancellationToken,
) -> Result<Bytes, DownloadError> {
    let mut stream = response.bytes_stream();
    let mut buf = BytesMut::new();

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            next = tokio::time::timeout(inactivity, stream.next()) => {
                next.map_err(|_| {
                    DownloadError::timeout(format!("no bytes received within {inactivity:?}"))
                })?
            }
        };
        match next {
            Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
            Some(Err(e)) => return Err(e.into()),
            None => break,
        }
    }

    if let Some(expected) = expected
        && buf.len() as u64 != expected
    {
        return Err(DownloadError::internal(format!(
            "short range body: got {} of {expected} bytes",
            buf.len()
        )));
    }
    Ok(buf.freeze())
}

/// Parse the total size out of a `Content-Range: bytes a-b/total` header.
fn parse_content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .parse::<u64>()
        .ok()
}
