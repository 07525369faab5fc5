//! # 🚚 THE BULK UPLOAD ENGINE
//!
//! *[a snapshot lands on the mount. four thousand files. one bucket.]*
//!
//! The engine plans the tree (see [`planner`]), opens a bounded `async_channel`, spawns
//! `workers` [`UploadWorker`]s to drain it, and feeds the plan in from the current task.
//! A worker that fails a file writes it down and moves on. Nothing one file does can
//! cancel its siblings.
//!
//! The `Result` only goes `Err` when the machinery breaks (the tree can't be walked, a
//! worker panics). Files that didn't make it live in [`BatchReport::failures`].
//!
//! ⚠️ Cancelling stops the feeding, not the uploading: whatever is already in a worker's
//! hands gets finished, and the report says how many planned files were never handed out.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backends::{ObjectStore, ObjectStoreBackend};
use crate::common::{FileEntry, UploadOutcome};
use crate::progress::TransferProgress;
use crate::uploader::RetryingBlobUploader;

pub(crate) mod planner;
mod workers;

use workers::{UploadWorker, Worker};

/// 📋 One tree, one destination.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UploadTreeRequest<'a> {
    pub(crate) source_dir: &'a Path,
    pub(crate) dest_prefix: &'a str,
    pub(crate) repo_id: &'a str,
    pub(crate) parquet_only: bool,
}

/// 🧾 What happened to every planned file.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// `gs://bucket/{prefix}/{repo}` or the local/in-memory equivalent
    pub destination_uri: String,
    /// exactly one per submitted file, in completion order
    pub outcomes: Vec<UploadOutcome>,
    pub planned: usize,
    /// planned but never handed to a worker because the batch was cancelled
    pub not_submitted: usize,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.ok).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.ok).count()
    }

    pub fn failures(&self) -> Vec<&UploadOutcome> {
        self.outcomes.iter().filter(|o| !o.ok).collect()
    }

    pub fn bytes(&self) -> u64 {
        self.outcomes.iter().map(|o| o.bytes).sum()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BulkUploadEngine {
    store: Arc<ObjectStoreBackend>,
    uploader: RetryingBlobUploader,
    workers: usize,
    show_progress: bool,
}

impl BulkUploadEngine {
    pub(crate) fn new(
        store: Arc<ObjectStoreBackend>,
        uploader: RetryingBlobUploader,
        workers: usize,
        show_progress: bool,
    ) -> Self {
        Self {
            store,
            uploader,
            workers: workers.max(1),
            show_progress,
        }
    }

    /// 🚚 Upload everything under `request.source_dir` worth uploading.
    pub(crate) async fn upload_tree(
        &self,
        request: UploadTreeRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let destination_uri = self
            .store
            .location_uri(&planner::remote_key(request.dest_prefix, request.repo_id, Path::new("")));
        let plan = planner::plan_uploads(
            request.source_dir,
            request.dest_prefix,
            request.repo_id,
            request.parquet_only,
        )
        .await
        .with_context(|| format!("💀 could not plan uploads from '{}'", request.source_dir.display()))?;
        let planned = plan.entries.len();

        let progress = TransferProgress::new(
            format!("⬆️ {} → {destination_uri}", request.repo_id),
            planned as u64,
            plan.total_bytes,
            self.show_progress,
        );

        // 🧵 bounded so the plan trickles in as workers free up
        let (tx, rx) = async_channel::bounded::<FileEntry>(self.workers * 2);
        let handles: Vec<_> = (0..self.workers)
            .map(|id| UploadWorker::new(id, rx.clone(), self.uploader.clone(), progress.clone()).start())
            .collect();
        drop(rx);

        let mut submitted = 0usize;
        let mut cancelled = false;
        for entry in plan.entries {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                sent = tx.send(entry) => {
                    sent.map_err(|_| anyhow::anyhow!("💀 every upload worker hung up early"))?;
                    submitted += 1;
                }
            }
        }
        // 🚪 closing the channel is how workers learn the plan is done
        drop(tx);

        let mut outcomes = Vec::with_capacity(submitted);
        for handle in handles {
            let worker_outcomes = handle
                .await
                .context("💀 an upload worker panicked")?
                .context("💀 an upload worker failed")?;
            outcomes.extend(worker_outcomes);
        }
        progress.finish();

        let report = BatchReport {
            destination_uri,
            outcomes,
            planned,
            not_submitted: planned - submitted,
            cancelled,
        };
        if cancelled {
            warn!(
                "🛑 upload to {} cancelled: {} of {} planned files never submitted",
                report.destination_uri, report.not_submitted, planned
            );
        }
        info!(
            "🚚 {}: {} uploaded, {} failed, {} bytes",
            report.destination_uri,
            report.succeeded(),
            report.failed(),
            report.bytes()
        );
        for failure in report.failures() {
            warn!(
                "   💀 {}: {}",
                failure.entry.remote_key,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::Semaphore;

    use crate::backends::in_mem::InMemoryStore;
    use crate::retry::ExponentialBackoff;
    use crate::uploader::UploaderConfig;

    fn engine_over(store: &InMemoryStore, workers: usize) -> BulkUploadEngine {
        let backend = Arc::new(ObjectStoreBackend::InMemory(store.clone()));
        let uploader = RetryingBlobUploader::new(
            backend.clone(),
            UploaderConfig {
                chunk_size_bytes: 1024,
                retry: ExponentialBackoff::new(Duration::from_millis(1), 3),
                call_timeout: Duration::from_secs(5),
            },
        );
        BulkUploadEngine::new(backend, uploader, workers, false)
    }

    fn staged_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        for (relative, body) in [
            ("a.parquet", "aa"),
            ("b.parquet", "bbb"),
            ("nested/c.parquet", "c"),
            ("notes.txt", "hello"),
            (".git/HEAD", "ref"),
        ] {
            let path = dir.path().join(relative);
            std::fs::create_dir_all(path.parent().expect("💀 parent")).expect("💀 mkdir");
            std::fs::write(path, body).expect("💀 write");
        }
        dir
    }

    fn request(dir: &Path, parquet_only: bool) -> UploadTreeRequest<'_> {
        UploadTreeRequest {
            source_dir: dir,
            dest_prefix: "huggingface",
            repo_id: "org/name",
            parquet_only,
        }
    }

    #[tokio::test]
    async fn the_one_where_the_whole_tree_moves_in() {
        let dir = staged_tree();
        let store = InMemoryStore::new();
        let report = engine_over(&store, 3)
            .upload_tree(request(dir.path(), false), &CancellationToken::new())
            .await
            .expect("💀 batch should run");

        assert_eq!(report.planned, 4);
        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.bytes(), 11);
        assert_eq!(report.destination_uri, "mem://huggingface/org/name");
        assert_eq!(
            store.keys(),
            [
                "huggingface/org/name/a.parquet",
                "huggingface/org/name/b.parquet",
                "huggingface/org/name/nested/c.parquet",
                "huggingface/org/name/notes.txt"
            ]
        );
    }

    #[tokio::test]
    async fn the_one_where_one_bad_apple_does_not_spoil_the_batch() {
        let dir = staged_tree();
        let store = InMemoryStore::new();
        store.fail_next("huggingface/org/name/b.parquet", 99);

        let report = engine_over(&store, 2)
            .upload_tree(request(dir.path(), true), &CancellationToken::new())
            .await
            .expect("💀 per-file failures are not structural");

        assert_eq!(report.planned, 3);
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.succeeded(), 2);
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].entry.remote_key, "huggingface/org/name/b.parquet");
        assert_eq!(failures[0].attempts, 3);
        assert!(store.object("huggingface/org/name/nested/c.parquet").is_some());
    }

    #[tokio::test]
    async fn the_one_where_cancel_comes_before_the_first_file() {
        let dir = staged_tree();
        let store = InMemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = engine_over(&store, 2)
            .upload_tree(request(dir.path(), false), &cancel)
            .await
            .expect("💀 cancelled is still a report");

        assert!(report.cancelled);
        assert_eq!(report.not_submitted, 4);
        assert!(report.outcomes.is_empty());
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn the_one_where_cancel_lands_mid_batch_and_the_flights_in_the_air_still_land() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        for i in 0..12 {
            std::fs::write(dir.path().join(format!("shard-{i:02}.parquet")), "PAR1").expect("💀 write");
        }
        let gate = Arc::new(Semaphore::new(0));
        let store = InMemoryStore::gated(gate.clone());
        let engine = engine_over(&store, 2);
        let cancel = CancellationToken::new();

        let batch = engine.upload_tree(request(dir.path(), false), &cancel);
        let pull_the_plug = async {
            // -- ⏳ both workers parked on the gate, the channel filling up behind them
            while store.puts_started() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
            gate.add_permits(64);
        };
        let (report, ()) = tokio::join!(batch, pull_the_plug);
        let report = report.expect("💀 cancelled is still a report");

        assert!(report.cancelled);
        assert_eq!(report.planned, 12);
        assert!(report.not_submitted > 0, "with two workers parked, most of the plan never left");
        assert_eq!(report.outcomes.len() + report.not_submitted, report.planned);
        assert_eq!(report.failed(), 0);
        assert_eq!(store.keys().len(), report.outcomes.len());
        for outcome in &report.outcomes {
            assert!(store.object(&outcome.entry.remote_key).is_some(), "{}", outcome.entry.remote_key);
        }
    }

    #[tokio::test]
    async fn the_one_where_an_empty_tree_is_a_quiet_success() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let store = InMemoryStore::new();
        let report = engine_over(&store, 4)
            .upload_tree(request(dir.path(), false), &CancellationToken::new())
            .await
            .expect("💀 empty is fine");
        assert_eq!(report.planned, 0);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn the_one_where_a_missing_tree_is_structural() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let store = InMemoryStore::new();
        let result = engine_over(&store, 1)
            .upload_tree(request(&dir.path().join("ghost"), false), &CancellationToken::new())
            .await;
        assert!(result.is_err());
    }
}
