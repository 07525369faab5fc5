//! # 🎼 THE ORCHESTRATOR
//!
//! *Previously, on dsferry...* a ticket arrived. It said `org/name`. It said `huggingface`.
//! It did not say how. That's what this module is for.
//!
//! Every job runs the same four beats:
//! 1. 📁 make sure the staging folder exists (mount root + optional suffix)
//! 2. 📥 fetch the dataset into it ([`huggingface_flow`] or [`kaggle_flow`])
//! 3. 🚚 upload the staged tree through the [`BulkUploadEngine`]
//! 4. 📣 tell the notifier where it went
//!
//! Failing to list or snapshot a dataset is fatal and nothing gets uploaded. Single files
//! that won't download (Kaggle) or won't upload (both) are written down in the
//! [`JobReport`] and the job carries on. A cancelled job never announces itself.
//!
//! 🦆 The duck conducts. Nobody asked it to.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app_config::{AppConfig, NotifierConfig, StoreConfig};
use crate::backends::gcs::GcsStore;
use crate::backends::http::build_client;
use crate::backends::huggingface::HubClient;
use crate::backends::huggingface::parquet_status::ParquetStatus;
use crate::backends::in_mem::{InMemoryNotifier, InMemoryStore};
use crate::backends::kaggle::KaggleClient;
use crate::backends::local_dir::LocalDirStore;
use crate::backends::pubsub::PubSubNotifier;
use crate::backends::{
    CompletionNotifier, HuggingFaceConfig, LogNotifier, NotifierBackend, ObjectStoreBackend,
};
use crate::bulk_upload::{BatchReport, BulkUploadEngine, UploadTreeRequest};
use crate::common::{DatasetSource, JobRequest};
use crate::mount::StagingMount;
use crate::retry::ExponentialBackoff;
use crate::status::Status;
use crate::uploader::{RetryingBlobUploader, UploaderConfig};

mod huggingface_flow;
mod kaggle_flow;

pub use kaggle_flow::{DownloadFailure, ListingSummary};

const MIB: usize = 1024 * 1024;

/// ⚙️ How downloads behave: pool width, retry budget, per-call patience.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DownloadPolicy {
    pub(crate) workers: usize,
    pub(crate) retry: ExponentialBackoff,
    pub(crate) call_timeout: Duration,
}

/// 🧾 Everything that happened to one job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub dataset: String,
    pub source: DatasetSource,
    pub local_dir: PathBuf,
    /// 🌿 HuggingFace only: the revision that was actually fetched
    pub revision: Option<String>,
    /// 🔍 HuggingFace only, when the probe is enabled
    pub parquet_status: Option<ParquetStatus>,
    /// 📜 Kaggle only
    pub listing: Option<ListingSummary>,
    pub downloaded: usize,
    pub download_failures: Vec<DownloadFailure>,
    pub batch: BatchReport,
    /// `None` when the job was cancelled before the announcement
    pub notification: Option<Status>,
}

impl JobReport {
    pub fn cancelled(&self) -> bool {
        self.batch.cancelled
    }

    /// 🧮 Failed downloads plus failed uploads.
    pub fn failed_files(&self) -> usize {
        self.download_failures.len() + self.batch.failed()
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            dataset: self.dataset.clone(),
            source: self.source,
            destination_uri: self.batch.destination_uri.clone(),
            local_dir: self.local_dir.display().to_string(),
            revision: self.revision.clone(),
            listing_complete: self.listing.as_ref().map(|l| l.complete),
            downloaded: self.downloaded,
            download_failed: self.download_failures.len(),
            uploaded: self.batch.succeeded(),
            upload_failed: self.batch.failed(),
            bytes_uploaded: self.batch.bytes(),
            not_submitted: self.batch.not_submitted,
            cancelled: self.cancelled(),
            failed_keys: self
                .batch
                .failures()
                .into_iter()
                .map(|o| o.entry.remote_key.clone())
                .chain(self.download_failures.iter().map(|f| f.name.clone()))
                .collect(),
            notification: self.notification.clone(),
        }
    }
}

/// 📋 The flat, serializable version of a [`JobReport`].
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub dataset: String,
    pub source: DatasetSource,
    pub destination_uri: String,
    pub local_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_complete: Option<bool>,
    pub downloaded: usize,
    pub download_failed: usize,
    pub uploaded: usize,
    pub upload_failed: usize,
    pub bytes_uploaded: u64,
    pub not_submitted: usize,
    pub cancelled: bool,
    pub failed_keys: Vec<String>,
    pub notification: Option<Status>,
}

/// 📦 What a fetch flow hands back before the upload starts.
#[derive(Debug, Default)]
pub(crate) struct Fetched {
    pub(crate) revision: Option<String>,
    pub(crate) parquet_status: Option<ParquetStatus>,
    pub(crate) listing: Option<ListingSummary>,
    pub(crate) downloaded: usize,
    pub(crate) download_failures: Vec<DownloadFailure>,
    pub(crate) parquet_only: bool,
}

#[derive(Debug)]
pub struct DatasetFetchOrchestrator {
    mount: StagingMount,
    engine: BulkUploadEngine,
    notifier: NotifierBackend,
    hub: HubClient,
    kaggle: KaggleClient,
    huggingface: HuggingFaceConfig,
    kaggle_prefix: String,
    downloads: DownloadPolicy,
    show_progress: bool,
}

impl DatasetFetchOrchestrator {
    /// 🏗️ Build every collaborator once. They are shared by everything the job does.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = build_client(Duration::from_secs(config.runtime.connect_timeout_secs))?;
        let store = match &config.store {
            StoreConfig::Gcs(gcs) => ObjectStoreBackend::Gcs(GcsStore::new(gcs, client.clone())),
            StoreConfig::LocalDir(dir) => ObjectStoreBackend::LocalDir(LocalDirStore::new(dir)),
            StoreConfig::InMemory => ObjectStoreBackend::InMemory(InMemoryStore::new()),
        };
        let notifier = match &config.notifier {
            NotifierConfig::PubSub(pubsub) => {
                NotifierBackend::PubSub(PubSubNotifier::new(pubsub, client.clone()))
            }
            NotifierConfig::Log => NotifierBackend::Log(LogNotifier),
            NotifierConfig::InMemory => NotifierBackend::InMemory(InMemoryNotifier::new()),
        };
        Ok(Self::assemble(config, store, notifier, client))
    }

    pub(crate) fn assemble(
        config: &AppConfig,
        store: ObjectStoreBackend,
        notifier: NotifierBackend,
        client: reqwest::Client,
    ) -> Self {
        let runtime = &config.runtime;
        let backoff_base = Duration::from_millis(runtime.backoff_base_ms);
        let call_timeout = Duration::from_secs(runtime.call_timeout_secs);

        let store = Arc::new(store);
        let uploader = RetryingBlobUploader::new(
            store.clone(),
            UploaderConfig {
                chunk_size_bytes: runtime.chunk_size_mb.max(1) * MIB,
                retry: ExponentialBackoff::new(backoff_base, runtime.upload_max_retries),
                call_timeout,
            },
        );

        Self {
            mount: StagingMount::new(&config.mount),
            engine: BulkUploadEngine::new(store, uploader, runtime.upload_workers, runtime.show_progress),
            notifier,
            hub: HubClient::new(&config.huggingface, client.clone()),
            kaggle: KaggleClient::new(&config.kaggle, client, call_timeout),
            huggingface: config.huggingface.clone(),
            kaggle_prefix: config.kaggle.prefix.clone(),
            downloads: DownloadPolicy {
                workers: runtime.download_workers.max(1),
                retry: ExponentialBackoff::new(backoff_base, runtime.download_max_retries),
                call_timeout,
            },
            show_progress: runtime.show_progress,
        }
    }

    /// 🎼 Fetch, stage, upload, announce.
    pub async fn run(&self, request: &JobRequest, cancel: &CancellationToken) -> Result<JobReport> {
        let destination = self.mount.destination_for(request.dest_suffix.as_deref());
        self.mount.ensure(&destination).await?;
        info!(
            "🎫 job: {} from {} into {}",
            request.dataset,
            request.source,
            destination.display()
        );

        let (fetched, prefix) = match request.source {
            DatasetSource::HuggingFace => (
                self.fetch_from_hub(request, &destination, cancel).await?,
                self.huggingface.prefix.as_str(),
            ),
            DatasetSource::Kaggle => (
                self.fetch_from_kaggle(request, &destination, cancel).await?,
                self.kaggle_prefix.as_str(),
            ),
        };

        let repo_id = request.dataset.repo_id();
        let batch = self
            .engine
            .upload_tree(
                UploadTreeRequest {
                    source_dir: &destination,
                    dest_prefix: prefix,
                    repo_id: &repo_id,
                    parquet_only: fetched.parquet_only,
                },
                cancel,
            )
            .await
            .with_context(|| format!("💀 could not upload '{repo_id}' from {}", destination.display()))?;

        let notification = if batch.cancelled || cancel.is_cancelled() {
            warn!("🛑 job for {repo_id} was cancelled, not announcing it");
            None
        } else {
            let status = self.notifier.notify(&repo_id, &batch.destination_uri).await;
            if !status.ok {
                warn!("📣 completion of {repo_id} was not announced: {status}");
            }
            Some(status)
        };

        Ok(JobReport {
            dataset: repo_id,
            source: request.source,
            local_dir: destination,
            revision: fetched.revision,
            parquet_status: fetched.parquet_status,
            listing: fetched.listing,
            downloaded: fetched.downloaded,
            download_failures: fetched.download_failures,
            batch: BatchReport {
                cancelled: batch.cancelled || cancel.is_cancelled(),
                ..batch
            },
            notification,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::app_config::RuntimeConfig;
    use crate::mount::MountConfig;

    pub(crate) fn test_config(mount_root: &std::path::Path, hub_endpoint: &str) -> AppConfig {
        AppConfig {
            runtime: RuntimeConfig {
                upload_workers: 2,
                download_workers: 2,
                backoff_base_ms: 1,
                call_timeout_secs: 5,
                show_progress: false,
                ..RuntimeConfig::default()
            },
            mount: MountConfig {
                root: mount_root.to_path_buf(),
            },
            store: StoreConfig::InMemory,
            huggingface: HuggingFaceConfig {
                endpoint: hub_endpoint.to_string(),
                datasets_server: hub_endpoint.to_string(),
                ..HuggingFaceConfig::default()
            },
            kaggle: crate::backends::KaggleConfig {
                api_base: format!("{hub_endpoint}/api/v1"),
                username: Some("kaggler".into()),
                key: Some("secret".into()),
                pager_backoff_factor_ms: 1,
                ..crate::backends::KaggleConfig::default()
            },
            notifier: NotifierConfig::InMemory,
        }
    }

    pub(crate) fn orchestrator_with(
        config: &AppConfig,
    ) -> (DatasetFetchOrchestrator, InMemoryStore, InMemoryNotifier) {
        let store = InMemoryStore::new();
        let notifier = InMemoryNotifier::new();
        let orchestrator = DatasetFetchOrchestrator::assemble(
            config,
            ObjectStoreBackend::InMemory(store.clone()),
            NotifierBackend::InMemory(notifier.clone()),
            reqwest::Client::new(),
        );
        (orchestrator, store, notifier)
    }

    #[test]
    fn the_one_where_every_backend_can_be_built_from_config() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let config = test_config(dir.path(), "http://127.0.0.1:9");
        assert!(DatasetFetchOrchestrator::from_config(&config).is_ok());
    }

    #[test]
    fn the_one_where_the_summary_lists_every_casualty() {
        let report = JobReport {
            dataset: "owner/ds".into(),
            source: DatasetSource::Kaggle,
            local_dir: PathBuf::from("/mnt/filestore"),
            revision: None,
            parquet_status: None,
            listing: Some(ListingSummary {
                files: 3,
                complete: true,
                requests: 1,
                total_bytes: 30,
            }),
            downloaded: 2,
            download_failures: vec![DownloadFailure {
                name: "gone.csv".into(),
                error: "404".into(),
            }],
            batch: BatchReport {
                destination_uri: "gs://b/kaggle/owner/ds".into(),
                planned: 2,
                ..BatchReport::default()
            },
            notification: Some(Status::ok()),
        };

        let summary = report.summary();
        assert_eq!(report.failed_files(), 1);
        assert_eq!(summary.failed_keys, ["gone.csv"]);
        assert_eq!(summary.listing_complete, Some(true));
        let json = serde_json::to_value(&summary).expect("💀 summary serializes");
        assert_eq!(json["source"], "kaggle");
        assert_eq!(json["destination_uri"], "gs://b/kaggle/owner/ds");
        assert_eq!(json["notification"]["ok"], true);
    }
}
