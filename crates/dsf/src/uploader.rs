//! ⬆️ The retrying blob uploader: one file, one key, a handful of tries.
//!
//! 🎬 *[a shard approaches the bucket. the bucket says 503.]*
//! *[the uploader waits one second. tries again. 503.]*
//! *[two seconds. tries again. 200. the shard is home.]*
//!
//! Every failure counts as retryable here, a 403 included. That wastes a few seconds on
//! a permission problem, and it means a flaky network never loses a file. Each attempt is
//! capped by `call_timeout` so one stuck socket cannot hold a worker hostage, and there is
//! no nap after the final attempt because nobody is waiting for it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backends::{ObjectStore, ObjectStoreBackend};
use crate::common::{FileEntry, UploadOutcome};
use crate::retry::ExponentialBackoff;

#[derive(Debug, Clone, Copy)]
pub(crate) struct UploaderConfig {
    pub(crate) chunk_size_bytes: usize,
    pub(crate) retry: ExponentialBackoff,
    pub(crate) call_timeout: Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct RetryingBlobUploader {
    store: Arc<ObjectStoreBackend>,
    config: UploaderConfig,
}

impl RetryingBlobUploader {
    pub(crate) fn new(store: Arc<ObjectStoreBackend>, config: UploaderConfig) -> Self {
        Self { store, config }
    }

    /// 🚀 Try to put `entry` in the store. Always returns an outcome, never an error.
    pub(crate) async fn upload(&self, entry: FileEntry) -> UploadOutcome {
        let attempts = self.config.retry.attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let put = self.store.put_file(
                &entry.local_path,
                &entry.remote_key,
                self.config.chunk_size_bytes,
            );
            let error = match tokio::time::timeout(self.config.call_timeout, put).await {
                Ok(Ok(bytes)) => {
                    debug!(
                        "✅ {} → {} ({} bytes, attempt {})",
                        entry.local_path.display(),
                        entry.remote_key,
                        bytes,
                        attempt + 1
                    );
                    return UploadOutcome::success(entry, attempt + 1, bytes);
                }
                Ok(Err(err)) => format!("{err:#}"),
                Err(_) => format!("timed out after {:?}", self.config.call_timeout),
            };

            if attempt + 1 < attempts {
                let delay = self.config.retry.delay_for(attempt);
                warn!(
                    "🔁 upload of {} failed (attempt {}/{}): {}. retrying in {:?}",
                    entry.remote_key,
                    attempt + 1,
                    attempts,
                    error,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            last_error = error;
        }

        UploadOutcome::failure(entry, attempts, last_error)
    }
}
