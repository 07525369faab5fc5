//! 📊 The Kaggle flow: list every file, then download them one by one, a few at a time.
//!
//! The listing goes through the rate-limited pager. Running out of 429 patience still
//! yields a (partial) list, which gets downloaded like any other; a hard listing error
//! ends the job. Each file then gets its own retry budget, separate from the pager's.
//! A file that still won't come down is written into the report and skipped.

use std::path::Path;

use anyhow::{Context, Result};
use futures::{StreamExt, stream};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DatasetFetchOrchestrator, Fetched};
use crate::backends::kaggle::KaggleCredentials;
use crate::common::{JobRequest, RemoteFileDescriptor};
use crate::error::{FetchError, RemoteError};
use crate::pager::{Listing, list_all};
use crate::progress::TransferProgress;
use crate::retry::retry_remote;

const LISTING_PREVIEW: usize = 10;

/// 📜 How the listing went, minus the file list itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingSummary {
    pub files: usize,
    /// `false` when the pager ran out of rate-limit retries and returned what it had
    pub complete: bool,
    pub requests: u32,
    pub total_bytes: u64,
}

impl From<&Listing> for ListingSummary {
    fn from(listing: &Listing) -> Self {
        Self {
            files: listing.files.len(),
            complete: listing.complete,
            requests: listing.requests,
            total_bytes: listing.total_bytes(),
        }
    }
}

/// 💀 One file that never made it to the mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadFailure {
    pub name: String,
    pub error: String,
}

enum FileResult {
    Downloaded,
    Failed(DownloadFailure),
    Skipped,
}

impl DatasetFetchOrchestrator {
    async fn download_one(
        &self,
        credentials: &KaggleCredentials,
        request: &JobRequest,
        file: &RemoteFileDescriptor,
        destination: &Path,
        progress: &TransferProgress,
        cancel: &CancellationToken,
    ) -> FileResult {
        if cancel.is_cancelled() {
            return FileResult::Skipped;
        }
        let name = file.name.as_str();
        let what = format!("kaggle download {name}");
        let what = what.as_str();
        let policy = self.downloads;
        let result = retry_remote(&policy.retry, what, |_| async move {
            match tokio::time::timeout(
                policy.call_timeout,
                self.kaggle
                    .download_file(credentials, &request.dataset, name, destination),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Remote(RemoteError::Transient {
                    endpoint: what.to_string(),
                    status: None,
                    message: format!("no answer within {:?}", policy.call_timeout),
                })),
            }
        })
        .await;

        match result {
            Ok(bytes) => {
                debug!("📥 {name} ({bytes} bytes)");
                progress.record(true, bytes);
                FileResult::Downloaded
            }
            Err(err) => {
                warn!("💀 could not download {name} from {}: {err}", request.dataset);
                progress.record(false, 0);
                FileResult::Failed(DownloadFailure {
                    name: name.to_string(),
                    error: err.to_string(),
                })
            }
        }
    }

    pub(crate) async fn fetch_from_kaggle(
        &self,
        request: &JobRequest,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<Fetched> {
        let credentials = self.kaggle.credentials()?;
        let listing = list_all(
            &self.kaggle.listing(credentials, &request.dataset),
            &self.kaggle.pager_config(),
        )
        .await
        .with_context(|| format!("💀 could not list the files of Kaggle dataset {}", request.dataset))?;
        let summary = ListingSummary::from(&listing);

        if !listing.complete {
            warn!(
                "⚠️ Kaggle kept saying 429, going ahead with a partial list of {} files for {}",
                summary.files, request.dataset
            );
        }
        info!(
            "📜 {} lists {} files ({} bytes) in {} requests",
            request.dataset, summary.files, summary.total_bytes, summary.requests
        );
        for file in listing.files.iter().take(LISTING_PREVIEW) {
            info!("   {} ({})", file.name, file.size_bytes.map_or("?".to_string(), |b| b.to_string()));
        }
        if listing.files.len() > LISTING_PREVIEW {
            info!("   ... and {} more", listing.files.len() - LISTING_PREVIEW);
        }

        let progress = TransferProgress::new(
            format!("📥 kaggle {}", request.dataset),
            summary.files as u64,
            summary.total_bytes,
            self.show_progress,
        );
        let results: Vec<FileResult> = stream::iter(listing.files.iter())
            .map(|file| self.download_one(credentials, request, file, destination, &progress, cancel))
            .buffer_unordered(self.downloads.workers)
            .collect()
            .await;
        progress.finish();

        let mut downloaded = 0;
        let mut skipped = 0;
        let mut download_failures = Vec::new();
        for result in results {
            match result {
                FileResult::Downloaded => downloaded += 1,
                FileResult::Failed(failure) => download_failures.push(failure),
                FileResult::Skipped => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!("🛑 cancelled: {skipped} Kaggle files were never requested");
        }
        info!(
            "📊 {}: {} downloaded, {} failed",
            request.dataset,
            downloaded,
            download_failures.len()
        );

        Ok(Fetched {
            revision: None,
            parquet_status: None,
            listing: Some(summary),
            downloaded,
            download_failures,
            parquet_only: false,
        })
    }
}
