//! Lifecycle and byte-progress event stream.
//!
//! Events are delivered in production order to every consumer subscribed at
//! the time of production; there is no replay buffer for late subscribers.
//! A terminal event closes the channel.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::error;

use crate::error::DownloadError;

/// States of the download state machine, in machine order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadState {
    Queued,
    Selecting,
    Downloading,
    Remuxing,
    Transcoding,
    Completed,
    Failed,
    Canceled,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Cumulative contiguous bytes written for one format. Delivered in
    /// non-decreasing byte-offset order per format.
    ByteProgress {
        format_id: String,
        bytes_written: u64,
        bytes_total: Option<u64>,
    },
    /// A state-machine transition; delivered exactly once per transition.
    StateChanged(DownloadState),
    /// Terminal: the final assembled file.
    Completed(PathBuf),
    /// Terminal: the originating error.
    Failed(Arc<DownloadError>),
    /// Terminal: cooperative cancellation was observed.
    Canceled,
}

impl DownloadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed(_) | Self::Failed(_) | Self::Canceled
        )
    }
}

// Large enough that an attached consumer only lags if it stops polling
// entirely; one chunk commit produces a single event.
const CHANNEL_CAPACITY: usize = 1024;

/// Producer half of the event stream. Cheap to clone; all clones feed the
/// same subscribers.
#[derive(Debug, Clone)]
pub struct EventChannel {
    tx: broadcast::Sender<DownloadEvent>,
    closed: Arc<AtomicBool>,
}

impl EventChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to events produced after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// Producing after a terminal event is a programming error: it trips a
    /// debug assertion and the event is dropped in release builds.
    pub fn publish(&self, event: DownloadEvent) {
        if self.closed.load(Ordering::Acquire) {
            debug_assert!(false, "event published after terminal event: {event:?}");
            error!(?event, "event published after terminal event; dropped");
            return;
        }
        if event.is_terminal() {
            self.closed.store(true, Ordering::Release);
        }
        // Send fails only when no subscriber exists, which is fine.
        let _ = self.tx.send(event);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}
