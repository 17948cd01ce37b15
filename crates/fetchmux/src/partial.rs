//! On-disk state of an in-progress transfer.
//!
//! A partial file is the incrementally written `<title>.<formatId>.part`
//! data file plus a small sidecar record of the highest contiguous byte
//! offset that has been durably committed. The pair is owned exclusively by
//! the one downloader responsible for its format; reopening truncates any
//! torn tail beyond the committed offset so a restart resumes from known
//! good state instead of byte 0.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::error::DownloadError;
use crate::format::Format;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ResumeRecord {
    /// Highest contiguous byte offset successfully written and flushed.
    offset: u64,
    /// Server-reported total size, once known.
    total: Option<u64>,
}

#[derive(Debug)]
pub struct PartialFile {
    part_path: PathBuf,
    resume_path: PathBuf,
    final_path: PathBuf,
    file: File,
    committed: u64,
    written_since_checkpoint: u64,
    total: Option<u64>,
}

impl PartialFile {
    /// Open (or create) the partial file for one format of a titled download.
    ///
    /// Naming convention: `<sanitizedTitle>.<formatId>.part` while in
    /// transfer, renamed to the format's native extension by [`finalize`].
    ///
    /// [`finalize`]: PartialFile::finalize
    pub async fn open(
        directory: &Path,
        title: &str,
        format: &Format,
    ) -> Result<Self, DownloadError> {
        let stem = format!("{title}.{}", format.format_id);
        let part_path = directory.join(format!("{stem}.part"));
        let resume_path = directory.join(format!("{stem}.part.resume"));
        let final_path = directory.join(format!("{stem}.{}", format.ext));

        let record: Option<ResumeRecord> = match tokio::fs::read(&resume_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).ok(),
            Err(_) => None,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&part_path)
            .await?;
        let on_disk = file.metadata().await?.len();

        let (committed, total) = match record {
            Some(record) => (record.offset.min(on_disk), record.total),
            None => (0, None),
        };

        let mut partial = Self {
            part_path,
            resume_path,
            final_path,
            file,
            committed,
            written_since_checkpoint: 0,
            total,
        };

        // Drop anything past the committed offset; it was never checkpointed
        // and may be torn.
        partial.file.set_len(committed).await?;
        partial.file.seek(SeekFrom::Start(committed)).await?;

        if committed > 0 {
            debug!(
                path = %partial.part_path.display(),
                offset = committed,
                "resuming partial file"
            );
        }
        Ok(partial)
    }

    /// Contiguous bytes committed so far, including writes not yet checkpointed.
    pub fn committed(&self) -> u64 {
        self.committed + self.written_since_checkpoint
    }

    /// Offset recorded by the last checkpoint; a restart resumes here.
    pub fn checkpointed(&self) -> u64 {
        self.committed
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn set_total(&mut self, total: Option<u64>) {
        self.total = total;
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Append bytes at the current offset.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), DownloadError> {
        self.file.write_all(data).await?;
        self.written_since_checkpoint += data.len() as u64;
        Ok(())
    }

    /// Flush written bytes and persist the resume record.
    pub async fn checkpoint(&mut self) -> Result<(), DownloadError> {
        self.file.flush().await?;
        self.committed += self.written_since_checkpoint;
        self.written_since_checkpoint = 0;

        let record = ResumeRecord {
            offset: self.committed,
            total: self.total,
        };
        let bytes = serde_json::to_vec(&record)
            .map_err(|e| DownloadError::internal(format!("resume record encode: {e}")))?;
        tokio::fs::write(&self.resume_path, bytes).await?;
        Ok(())
    }

    /// Discard all progress and start over from byte 0. Used when the
    /// server turns out not to support ranges.
    pub async fn restart(&mut self) -> Result<(), DownloadError> {
        self.file.set_len(0).await?;
        self.file.seek(SeekFrom::Start(0)).await?;
        self.committed = 0;
        self.written_since_checkpoint = 0;
        self.checkpoint().await
    }

    /// Complete the transfer: sync, rename to the native extension, and
    /// remove the resume record. Returns the final path.
    pub async fn finalize(mut self) -> Result<PathBuf, DownloadError> {
        self.checkpoint().await?;
        self.file.sync_all().await?;
        tokio::fs::rename(&self.part_path, &self.final_path).await?;
        let _ = tokio::fs::remove_file(&self.resume_path).await;
        Ok(self.final_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::video_only;

    #[tokio::test]
    async fn resumes_from_checkpointed_offset() {
        let dir = tempfile::tempdir().unwrap();
        let format = video_only("137", 1080, "mp4", "avc1.640028", 4400.0);

        let mut part = PartialFile::open(dir.path(), "clip", &format).await.unwrap();
        part.write(b"0123456789").await.unwrap();
        part.checkpoint().await.unwrap();
        part.write(b"torn-tail").await.unwrap();
        // No checkpoint for the tail; simulate an interrupted process.
        drop(part);

        let part = PartialFile::open(dir.path(), "clip", &format).await.unwrap();
        assert_eq!(part.committed(), 10);
        let on_disk = tokio::fs::metadata(part.part_path()).await.unwrap().len();
        assert_eq!(on_disk, 10);
    }

    #[tokio::test]
    async fn finalize_renames_to_native_extension() {
        let dir = tempfile::tempdir().unwrap();
        let format = video_only("137", 1080, "mp4", "avc1.640028", 4400.0);

        let mut part = PartialFile::open(dir.path(), "clip", &format).await.unwrap();
        part.write(b"media bytes").await.unwrap();
        let final_path = part.finalize().await.unwrap();

        assert_eq!(final_path, dir.path().join("clip.137.mp4"));
        assert_eq!(tokio::fs::read(&final_path).await.unwrap(), b"media bytes");
        assert!(!dir.path().join("clip.137.part").exists());
        assert!(!dir.path().join("clip.137.part.resume").exists());
    }

    #[tokio::test]
    async fn restart_discards_progress() {
        let dir = tempfile::tempdir().unwrap();
        let format = video_only("137", 1080, "mp4", "avc1.640028", 4400.0);

        let mut part = PartialFile::open(dir.path(), "clip", &format).await.unwrap();
        part.write(b"stale").await.unwrap();
        part.checkpoint().await.unwrap();
        part.restart().await.unwrap();
        assert_eq!(part.committed(), 0);

        part.write(b"fresh").await.unwrap();
        let final_path = part.finalize().await.unwrap();
        assert_eq!(tokio::fs::read(&final_path).await.unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn corrupt_resume_record_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let format = video_only("137", 1080, "mp4", "avc1.640028", 4400.0);

        tokio::fs::write(dir.path().join("clip.137.part"), b"leftover")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("clip.137.part.resume"), b"not json")
            .await
            .unwrap();

        let part = PartialFile::open(dir.path(), "clip", &format).await.unwrap();
        assert_eq!(part.committed(), 0);
    }
}
