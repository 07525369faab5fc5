//! 🤗 The Hub flow: maybe ask about parquet, then snapshot whatever matches.
//!
//! With `check_parquet_conversion` on, datasets-server is asked first. A conversion
//! that exists and is known to be complete wins: the snapshot switches to the
//! `refs/convert/parquet` revision and only `.parquet` files get uploaded. Anything
//! less certain (partial, undetermined, unreachable) keeps the configured revision.

use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{DatasetFetchOrchestrator, Fetched};
use crate::backends::huggingface::snapshot::{SnapshotRequest, allow_patterns, snapshot_download};
use crate::backends::huggingface::{HubClient, PARQUET_CONVERSION_REVISION};
use crate::common::JobRequest;

impl DatasetFetchOrchestrator {
    pub(crate) async fn fetch_from_hub(
        &self,
        request: &JobRequest,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<Fetched> {
        let mut revision = self
            .huggingface
            .revision
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| HubClient::default_revision().to_string());
        let mut parquet_only = self.huggingface.parquet_only;

        let parquet_status = if self.huggingface.check_parquet_conversion {
            let status = self.hub.parquet_status(&request.dataset).await;
            if status.use_converted() {
                info!("🧻 {} has a complete parquet conversion, fetching that instead", request.dataset);
                revision = PARQUET_CONVERSION_REVISION.to_string();
                parquet_only = true;
            } else {
                info!(
                    "🤷 not using the parquet conversion of {} (available: {}, partial: {:?}): {}",
                    request.dataset,
                    status.available,
                    status.is_partial,
                    status.error_message.as_deref().unwrap_or("-")
                );
            }
            Some(status)
        } else {
            None
        };

        let patterns = allow_patterns(request.config_name.as_deref(), request.split.as_deref());
        let snapshot = snapshot_download(
            &self.hub,
            &SnapshotRequest {
                dataset: &request.dataset,
                revision: &revision,
                allow_patterns: &patterns,
                workers: self.downloads.workers,
                retry: self.downloads.retry,
                call_timeout: self.downloads.call_timeout,
            },
            destination,
            cancel,
        )
        .await
        .with_context(|| format!("💀 snapshot of {} failed, nothing was uploaded", request.dataset))?;
        info!(
            "📸 {} files ({} bytes) of {} staged in {}",
            snapshot.files,
            snapshot.bytes,
            request.dataset,
            destination.display()
        );

        Ok(Fetched {
            revision: Some(revision),
            parquet_status,
            listing: None,
            downloaded: snapshot.files,
            download_failures: Vec::new(),
            parquet_only,
        })
    }
}
