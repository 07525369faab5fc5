//! 📸 Snapshot download: "give me every file in this repo that matches these globs".
//!
//! List the repo at a revision (429s, 5xx and timeouts get the same retries as a file
//! download; a 401 or 404 ends it right there), keep the files matching any include pattern (all of
//! them when there are no patterns), then fetch them `workers` at a time with
//! `buffer_unordered`. Each file gets its own retry budget. The first file that still
//! fails after its retries sinks the whole snapshot: a dataset with holes in it is not
//! a dataset we want to upload.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{StreamExt, TryStreamExt, stream};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::HubClient;
use crate::common::DatasetId;
use crate::error::{FetchError, RemoteError};
use crate::retry::{ExponentialBackoff, retry_remote};

/// 📋 What to fetch and how hard to try.
#[derive(Debug, Clone)]
pub(crate) struct SnapshotRequest<'a> {
    pub(crate) dataset: &'a DatasetId,
    pub(crate) revision: &'a str,
    pub(crate) allow_patterns: &'a [String],
    pub(crate) workers: usize,
    pub(crate) retry: ExponentialBackoff,
    pub(crate) call_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SnapshotReport {
    pub(crate) files: usize,
    pub(crate) bytes: u64,
    /// 🙈 files the include patterns filtered out
    pub(crate) skipped: usize,
}

/// 🌐 `*{config}*`-style patterns. `*` crosses `/`, like fnmatch does.
pub(crate) fn build_allow_set(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern).with_context(|| format!("💀 '{pattern}' is not a usable glob"))?,
        );
    }
    Ok(Some(builder.build().context("💀 could not assemble the include patterns")?))
}

/// 🧺 The include patterns for a config name and/or split.
pub(crate) fn allow_patterns(config_name: Option<&str>, split: Option<&str>) -> Vec<String> {
    [config_name, split]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .map(|s| format!("*{s}*"))
        .collect()
}

async fn fetch_one(
    hub: &HubClient,
    request: &SnapshotRequest<'_>,
    rfilename: &str,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<u64, FetchError> {
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled(rfilename.to_string()));
    }
    let what = format!("hub download {rfilename}");
    let what = what.as_str();
    retry_remote(&request.retry, what, |_| async move {
        match tokio::time::timeout(
            request.call_timeout,
            hub.download_file(request.dataset, request.revision, rfilename, dest),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Remote(RemoteError::Transient {
                endpoint: what.to_string(),
                status: None,
                message: format!("no answer within {:?}", request.call_timeout),
            })),
        }
    })
    .await
}

/// 📸 Download the matching files of `request.dataset` into `dest`.
pub(crate) async fn snapshot_download(
    hub: &HubClient,
    request: &SnapshotRequest<'_>,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<SnapshotReport> {
    let allow = build_allow_set(request.allow_patterns)?;
    let listing_what = format!("hub listing {}@{}", request.dataset, request.revision);
    let all_files = retry_remote(&request.retry, &listing_what, |_| async move {
        match tokio::time::timeout(
            request.call_timeout,
            hub.list_repo_files(request.dataset, request.revision),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transient {
                endpoint: format!("hub info {}@{}", request.dataset, request.revision),
                status: None,
                message: format!("no answer within {:?}", request.call_timeout),
            }),
        }
    })
    .await
    .with_context(|| {
            format!(
                "💀 could not list '{}' at revision '{}'",
                request.dataset, request.revision
            )
        })?;
    let total = all_files.len();
    let wanted: Vec<String> = all_files
        .into_iter()
        .filter(|f| allow.as_ref().is_none_or(|set| set.is_match(f)))
        .collect();
    info!(
        "📸 {} of {} files in {}@{} match {:?}",
        wanted.len(),
        total,
        request.dataset,
        request.revision,
        request.allow_patterns
    );

    let sizes: Vec<u64> = stream::iter(wanted.iter())
        .map(|rfilename| async move {
            let bytes = fetch_one(hub, request, rfilename, dest, cancel)
                .await
                .with_context(|| format!("💀 could not fetch '{rfilename}' from {}", request.dataset))?;
            debug!("📥 {rfilename} ({bytes} bytes)");
            anyhow::Ok(bytes)
        })
        .buffer_unordered(request.workers.max(1))
        .try_collect()
        .await?;

    Ok(SnapshotReport {
        files: sizes.len(),
        bytes: sizes.iter().sum(),
        skipped: total - wanted.len(),
    })
}
