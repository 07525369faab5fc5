//! ⛴️ dsferry: download a dataset, stage it on a mount, upload it to a bucket, tell someone.
//!
//! The library holds everything; `dsf-cli` only loads config, sets up logging and calls
//! [`run`] or [`sweep`].
//!
//! 🗺️ Map of the ship:
//! - [`orchestrator`]: the HuggingFace and Kaggle flows, end to end
//! - [`pager`]: rate-limited, token-paginated listings
//! - `bulk_upload` / `uploader`: the worker pool and the per-file retrying uploader
//! - `backends`: Hub, Kaggle, GCS, Pub/Sub, and their local stand-ins
//! - [`mount`]: the staging filesystem and its broom

pub mod app_config;
pub mod common;
pub mod error;
pub mod mount;
pub mod orchestrator;
pub mod pager;
pub mod retry;
pub mod status;

mod backends;
mod bulk_upload;
mod progress;
mod uploader;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

pub use app_config::{AppConfig, NotifierConfig, RuntimeConfig, StoreConfig, load_config, load_mount_config};
pub use backends::huggingface::parquet_status::ParquetStatus;
pub use backends::pubsub::DatasetDownloadComplete;
pub use backends::{GcpAuthConfig, GcsConfig, HuggingFaceConfig, KaggleConfig, LocalDirConfig, PubSubConfig};
pub use bulk_upload::BatchReport;
pub use common::{DatasetId, DatasetSource, FileEntry, JobRequest, UploadOutcome};
pub use mount::{MountConfig, StagingMount, SweepReport};
pub use orchestrator::{DatasetFetchOrchestrator, JobReport, JobSummary};
pub use status::Status;

/// 🚀 Ferry one dataset with a freshly built orchestrator.
pub async fn run(app_config: &AppConfig, request: &JobRequest, cancel: &CancellationToken) -> Result<JobReport> {
    DatasetFetchOrchestrator::from_config(app_config)?
        .run(request, cancel)
        .await
}

/// 🧹 Empty the staging mount. Needs no bucket, only the mount.
pub async fn sweep(mount: &MountConfig) -> Result<SweepReport> {
    StagingMount::new(mount).sweep().await
}
