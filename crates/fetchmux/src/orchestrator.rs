//! Download lifecycle orchestration.
//!
//! One [`Orchestrator`] drives any number of downloads. Each download runs
//! as an independent task owning its `Download` entity through the state
//! machine `Queued → Selecting → Downloading → (Remuxing) → (Transcoding) →
//! Completed`, with `Failed` and `Canceled` reachable from every
//! non-terminal state. All observation happens through the event channel;
//! nothing outside the task mutates the entity.

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::chunked::ChunkedDownloader;
use crate::config::{DownloadOptions, DownloaderConfig, TimeRange, create_client};
use crate::convert::{FfmpegConverter, Remuxer, Transcoder};
use crate::error::DownloadError;
use crate::events::{DownloadEvent, DownloadState, EventChannel};
use crate::format::{Format, sanitize_title};
use crate::partial::PartialFile;
use crate::selector::{SelectionPolicy, select};

/// Everything a caller supplies to start one download. The format list is
/// the full set reported by the extraction engine; selection happens inside
/// the pipeline.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub formats: Vec<Format>,
    pub policy: SelectionPolicy,
    pub directory: PathBuf,
    pub title: String,
    pub options: DownloadOptions,
    pub time_range: Option<TimeRange>,
    pub bit_rate: Option<f64>,
}

/// The orchestrated job. Owned and mutated exclusively by its runner task;
/// dropped after the terminal event.
#[derive(Debug)]
struct Download {
    id: Uuid,
    formats: Vec<Format>,
    directory: PathBuf,
    safe_title: String,
    options: DownloadOptions,
    time_range: Option<TimeRange>,
    bit_rate: Option<f64>,
    transcode_pending: bool,
}

/// Caller-facing handle for one download.
#[derive(Debug)]
pub struct DownloadHandle {
    id: Uuid,
    events: EventChannel,
    /// Receiver attached before the download task starts, so the first
    /// subscriber cannot lose early events.
    primary: Option<broadcast::Receiver<DownloadEvent>>,
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl DownloadHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Subscribe to the event stream. The first call returns a receiver
    /// that was attached before the download started and sees every event
    /// from `Selecting` onward; later calls only see events produced from
    /// now on.
    pub fn subscribe(&mut self) -> broadcast::Receiver<DownloadEvent> {
        self.primary
            .take()
            .unwrap_or_else(|| self.events.subscribe())
    }

    /// Request cooperative cancellation. The download unwinds at its next
    /// suspension point and emits exactly one `Canceled` event; partial
    /// files are preserved.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait until the download reaches a terminal state. The outcome itself
    /// is reported on the event channel.
    pub async fn wait(self) -> Result<(), DownloadError> {
        self.join
            .await
            .map_err(|e| DownloadError::internal(format!("download task failed: {e}")))
    }
}

/// Explicitly constructed engine front door: configuration and collaborators
/// are injected, no process-wide state.
pub struct Orchestrator {
    config: Arc<DownloaderConfig>,
    client: Client,
    remuxer: Arc<dyn Remuxer>,
    transcoder: Arc<dyn Transcoder>,
    keep_intermediates: bool,
}

impl Orchestrator {
    /// Orchestrator with the default ffmpeg-backed collaborators.
    pub fn new(config: DownloaderConfig) -> Result<Self, DownloadError> {
        let converter = Arc::new(FfmpegConverter::new());
        Self::with_collaborators(config, converter.clone(), converter)
    }

    pub fn with_collaborators(
        config: DownloaderConfig,
        remuxer: Arc<dyn Remuxer>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<Self, DownloadError> {
        let client = create_client(&config)?;
        Ok(Self {
            config: Arc::new(config),
            client,
            remuxer,
            transcoder,
            keep_intermediates: false,
        })
    }

    /// Keep pre-remux/pre-transcode intermediates on success, for diagnostics.
    pub fn keep_intermediates(mut self, keep: bool) -> Self {
        self.keep_intermediates = keep;
        self
    }

    /// Start one download. Returns immediately with a handle; progress and
    /// the terminal outcome are published on the handle's event channel.
    pub fn start(&self, request: DownloadRequest) -> DownloadHandle {
        let id = Uuid::new_v4();
        let events = EventChannel::new();
        // Attached before the task spawns; events cannot outrun the caller.
        let primary = events.subscribe();
        let token = CancellationToken::new();

        let runner = Runner {
            id,
            config: Arc::clone(&self.config),
            client: self.client.clone(),
            remuxer: Arc::clone(&self.remuxer),
            transcoder: Arc::clone(&self.transcoder),
            keep_intermediates: self.keep_intermediates,
            events: events.clone(),
            token: token.clone(),
        };
        let join = tokio::spawn(runner.run(request));

        DownloadHandle {
            id,
            events,
            primary: Some(primary),
            token,
            join,
        }
    }
}

async fn fetch_stream(
    downloader: &ChunkedDownloader,
    download: &Download,
    format: &Format,
) -> Result<PathBuf, DownloadError> {
    let part = PartialFile::open(&download.directory, &download.safe_title, format).await?;
    downloader.fetch(format, part, download.options.chunked).await
}

/// True when the selection needs re-encoding and the options allow it.
fn transcode_pending(selection: &[Format], options: &DownloadOptions) -> bool {
    !options.no_transcode && selection.iter().any(|f| f.is_transcode_needed())
}

struct Runner {
    id: Uuid,
    config: Arc<DownloaderConfig>,
    client: Client,
    remuxer: Arc<dyn Remuxer>,
    transcoder: Arc<dyn Transcoder>,
    keep_intermediates: bool,
    events: EventChannel,
    token: CancellationToken,
}

impl Runner {
    async fn run(self, request: DownloadRequest) {
        let outcome = self.drive(request).await;
        match outcome {
            Ok(path) => {
                info!(id = %self.id, path = %path.display(), "download completed");
                self.events
                    .publish(DownloadEvent::StateChanged(DownloadState::Completed));
                self.events.publish(DownloadEvent::Completed(path));
            }
            Err(err) if matches!(err, DownloadError::Cancelled) || self.token.is_cancelled() => {
                info!(id = %self.id, "download canceled");
                self.events
                    .publish(DownloadEvent::StateChanged(DownloadState::Canceled));
                self.events.publish(DownloadEvent::Canceled);
            }
            Err(err) => {
                warn!(id = %self.id, error = %err, "download failed");
                self.events
                    .publish(DownloadEvent::StateChanged(DownloadState::Failed));
                self.events.publish(DownloadEvent::Failed(Arc::new(err)));
            }
        }
    }

    #[instrument(skip(self, request), fields(id = %self.id), level = "debug")]
    async fn drive(&self, request: DownloadRequest) -> Result<PathBuf, DownloadError> {
        self.transition(DownloadState::Selecting)?;
        let selection = select(&request.formats, &request.policy)?;
        debug!(
            formats = ?selection.iter().map(|f| f.format_id.as_str()).collect::<Vec<_>>(),
            "formats selected"
        );

        let download = Download {
            id: self.id,
            transcode_pending: transcode_pending(&selection, &request.options),
            formats: selection,
            directory: request.directory,
            safe_title: sanitize_title(&request.title),
            options: request.options,
            time_range: request.time_range,
            bit_rate: request.bit_rate,
        };
        if download.options.background {
            debug!(id = %download.id, "download tagged background");
        }

        tokio::fs::create_dir_all(&download.directory).await?;
        self.transition(DownloadState::Downloading)?;
        let streams = self.download_streams(&download).await?;

        self.assemble(&download, streams).await
    }

    /// Fetch every selected format, two streams concurrently. The first
    /// failure cancels the sibling transfer; partial files stay on disk.
    async fn download_streams(&self, download: &Download) -> Result<Vec<PathBuf>, DownloadError> {
        let child = self.token.child_token();
        let downloader = ChunkedDownloader::new(
            self.client.clone(),
            Arc::clone(&self.config),
            self.events.clone(),
            child.clone(),
        );

        let result = match download.formats.as_slice() {
            [single] => fetch_stream(&downloader, download, single)
                .await
                .map(|path| vec![path]),
            [video, audio] => tokio::try_join!(
                fetch_stream(&downloader, download, video),
                fetch_stream(&downloader, download, audio)
            )
            .map(|(v, a)| vec![v, a]),
            other => Err(DownloadError::internal(format!(
                "selection must hold 1 or 2 formats, got {}",
                other.len()
            ))),
        };
        if result.is_err() {
            // Unwind the sibling transfer, if any is still running.
            child.cancel();
        }
        result
    }

    /// Remux/transcode decision chain on the downloaded stream files.
    async fn assemble(
        &self,
        download: &Download,
        mut artifacts: Vec<PathBuf>,
    ) -> Result<PathBuf, DownloadError> {
        let remux_needed = download.formats.iter().any(|f| f.is_remux_needed());
        let remux_suppressed = remux_needed && download.options.no_remux;

        if remux_needed && !remux_suppressed {
            self.transition(DownloadState::Remuxing)?;
            // When a transcode follows, the remuxed file is itself an
            // intermediate and must not occupy the final output name.
            let name = if download.transcode_pending {
                format!("{}.remux.mp4", download.safe_title)
            } else {
                format!("{}.mp4", download.safe_title)
            };
            let output = download.directory.join(name);
            self.checked(self.remuxer.remux(&artifacts, &output)).await?;
            self.cleanup(&artifacts).await;
            artifacts = vec![output];
        } else if remux_suppressed {
            debug!(id = %download.id, "remux suppressed, leaving raw streams as artifacts");
        }

        // Transcoding applies to a single assembled file; with remux
        // suppressed the two raw streams stay as they are.
        if download.transcode_pending && !remux_suppressed {
            self.transition(DownloadState::Transcoding)?;
            let input = artifacts[0].clone();
            let target = download
                .directory
                .join(format!("{}.mp4", download.safe_title));
            self.checked(self.transcoder.transcode(
                &input,
                &target,
                download.time_range.clone(),
                download.bit_rate,
            ))
            .await?;
            self.cleanup(&artifacts).await;
            artifacts = vec![target];
        } else if download.transcode_pending {
            debug!(id = %download.id, "transcode skipped, streams were not assembled");
        }

        // With remux suppressed both raw streams are final artifacts; the
        // event carries the video path, which sorts first in the selection.
        artifacts
            .into_iter()
            .next()
            .ok_or_else(|| DownloadError::internal("no artifact produced"))
    }

    /// Publish a state transition, refusing to enter it once cancelled.
    fn transition(&self, state: DownloadState) -> Result<(), DownloadError> {
        if self.token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        self.events.publish(DownloadEvent::StateChanged(state));
        Ok(())
    }

    /// Race a collaborator call against cancellation; dropping the call
    /// aborts the underlying tool.
    async fn checked<F>(&self, operation: F) -> Result<(), DownloadError>
    where
        F: Future<Output = Result<(), DownloadError>>,
    {
        tokio::select! {
            _ = self.token.cancelled() => Err(DownloadError::Cancelled),
            result = operation => result,
        }
    }

    /// Remove intermediate files on success, unless diagnostics asked for them.
    async fn cleanup(&self, intermediates: &[PathBuf]) {
        if self.keep_intermediates {
            debug!(id = %self.id, "keeping intermediate files");
            return;
        }
        for path in intermediates {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %e, "failed to remove intermediate");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{audio_only, muxed, video_only};

    #[test]
    fn transcode_pending_follows_selection_and_options() {
        let av1 = vec![
            video_only("399", 1080, "mp4", "av01.0.08M.08", 3800.0),
            audio_only("140", 129.0),
        ];
        assert!(transcode_pending(&av1, &DownloadOptions::default()));
        assert!(!transcode_pending(
            &av1,
            &DownloadOptions {
                no_transcode: true,
                ..Default::default()
            }
        ));

        let h264 = vec![
            video_only("137", 1080, "mp4", "avc1.640028", 4400.0),
            audio_only("140", 129.0),
        ];
        assert!(!transcode_pending(&h264, &DownloadOptions::default()));

        let muxed_mp4 = vec![muxed("18", 360, "mp4")];
        assert!(!transcode_pending(&muxed_mp4, &DownloadOptions::default()));
    }
}
