//! 🎬 *[a channel fills with file entries. somewhere, a bucket waits.]*
//! *[the worker takes one. uploads it. takes another.]*
//! *[it does not ask where they came from. it only uploads.]*
//!
//! ⬆️ The UploadWorker drains a shared `async_channel` of [`FileEntry`]s and runs each one
//! through the [`RetryingBlobUploader`]. Failed files are recorded, not fatal: the worker
//! keeps draining until the channel is closed and empty, then returns every outcome.

use anyhow::Result;
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Worker;
use crate::common::{FileEntry, UploadOutcome};
use crate::progress::TransferProgress;
use crate::uploader::RetryingBlobUploader;

#[derive(Debug)]
pub(crate) struct UploadWorker {
    id: usize,
    rx: Receiver<FileEntry>,
    uploader: RetryingBlobUploader,
    progress: TransferProgress,
}

impl UploadWorker {
    pub(crate) fn new(
        id: usize,
        rx: Receiver<FileEntry>,
        uploader: RetryingBlobUploader,
        progress: TransferProgress,
    ) -> Self {
        Self {
            id,
            rx,
            uploader,
            progress,
        }
    }
}

impl Worker for UploadWorker {
    type Output = Vec<UploadOutcome>;

    fn start(self) -> JoinHandle<Result<Vec<UploadOutcome>>> {
        tokio::spawn(async move {
            debug!("📥 upload worker {} started draining the channel", self.id);
            let mut outcomes = Vec::new();
            while let Ok(entry) = self.rx.recv().await {
                let outcome = self.uploader.upload(entry).await;
                if !outcome.ok {
                    warn!(
                        "💀 gave up on {} after {} attempts: {}",
                        outcome.entry.remote_key,
                        outcome.attempts,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    );
                }
                self.progress.record(outcome.ok, outcome.bytes);
                outcomes.push(outcome);
            }
            debug!(
                "🏁 upload worker {}: channel closed after {} files. shutting down.",
                self.id,
                outcomes.len()
            );
            Ok(outcomes)
        })
    }
}
