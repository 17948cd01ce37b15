//! Media download and assembly pipeline.
//!
//! Given the formats an extraction engine reports for a media page, this
//! crate selects the streams worth fetching, downloads them with chunked
//! resumable HTTP transfers, and assembles the result into a single playable
//! file via external remux/transcode tools.
//!
//! # Architecture
//!
//! - [`format`]: strict typing for engine-reported formats and metadata
//! - [`selector`]: policy-driven format selection
//! - [`chunked`]: range-based resumable HTTP transfer engine
//! - [`orchestrator`]: per-download state machine and caller surface
//! - [`events`]: multi-consumer progress/lifecycle event channel
//!
//! # Example
//!
//! ```no_run
//! use fetchmux::{DownloadOptions, DownloadRequest, DownloaderConfig, Orchestrator};
//!
//! # async fn demo(formats: Vec<fetchmux::Format>) -> Result<(), fetchmux::DownloadError> {
//! let orchestrator = Orchestrator::new(DownloaderConfig::default())?;
//! let mut handle = orchestrator.start(DownloadRequest {
//!     formats,
//!     policy: Default::default(),
//!     directory: "downloads".into(),
//!     title: "My Clip".into(),
//!     options: DownloadOptions::default(),
//!     time_range: None,
//!     bit_rate: None,
//! });
//!
//! let mut events = handle.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod chunked;
pub mod config;
pub mod convert;
pub mod error;
pub mod events;
pub mod extract;
pub mod format;
pub mod orchestrator;
pub mod partial;
pub mod retry;
pub mod selector;

#[cfg(test)]
pub(crate) mod test_utils;

pub use chunked::ChunkedDownloader;
pub use config::{DEFAULT_CHUNK_SIZE, DownloadOptions, DownloaderConfig, TimeRange};
pub use convert::{FfmpegConverter, Remuxer, Transcoder};
pub use error::DownloadError;
pub use events::{DownloadEvent, DownloadState, EventChannel};
pub use extract::{Extraction, MediaExtractor};
pub use format::{Format, MediaInfo};
pub use orchestrator::{DownloadHandle, DownloadRequest, Orchestrator};
pub use partial::PartialFile;
pub use retry::RetryPolicy;
pub use selector::{DEFAULT_POLICY, SelectionPolicy, select};
