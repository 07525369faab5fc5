//! 🗺️ The planner: turn a local tree into a list of (file, object key) pairs.
//!
//! Walks `source_dir` depth-first in name order, skipping hidden folders, folders whose
//! name starts with `tmp` or `temp` in any case, and `__pycache__` (nobody wants bytecode
//! in a bucket). Symlinked files are followed, symlinked folders are not. Half-finished
//! `*.part` downloads are never planned. Keys are `{prefix}/{repo}/{relative path}`
//! with `/` separators whatever the OS thinks, and no empty segments.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::backends::http::PART_SUFFIX;
use crate::common::FileEntry;

/// 🔭 how many planned files make it into the log
pub(crate) const PREVIEW_LIMIT: usize = 10;

#[derive(Debug, Default)]
pub(crate) struct UploadPlan {
    pub(crate) entries: Vec<FileEntry>,
    pub(crate) total_bytes: u64,
}

/// 🙈 Folders we never descend into.
pub(crate) fn is_pruned_dir_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    name.starts_with('.') || lower.starts_with("tmp") || lower.starts_with("temp") || name == "__pycache__"
}

/// 🔑 `prefix` + `repo_id` + `relative`, joined by `/`, empty segments dropped.
pub(crate) fn remote_key(dest_prefix: &str, repo_id: &str, relative: &Path) -> String {
    let relative_parts = relative.components().filter_map(|c| match c {
        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    });
    dest_prefix
        .split('/')
        .chain(repo_id.split('/'))
        .map(str::to_string)
        .chain(relative_parts)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_pruned(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry.file_name().to_str().is_some_and(is_pruned_dir_name)
}

fn is_uploadable_file(entry: &DirEntry) -> bool {
    let is_file = entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file());
    is_file && !entry.file_name().to_string_lossy().ends_with(PART_SUFFIX)
}

/// 🗺️ Walk `source_dir` and plan one upload per surviving file. Blocking; see [`plan_uploads`].
pub(crate) fn plan_tree(
    source_dir: &Path,
    dest_prefix: &str,
    repo_id: &str,
    parquet_only: bool,
) -> Result<UploadPlan> {
    if !source_dir.is_dir() {
        bail!("💀 '{}' is not a directory, nothing to upload", source_dir.display());
    }

    let mut plan = UploadPlan::default();
    let walker = WalkDir::new(source_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_pruned(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("🙈 skipping unreadable entry: {err}");
                continue;
            }
        };
        if !is_uploadable_file(&entry) {
            continue;
        }
        if parquet_only && !entry.file_name().to_string_lossy().ends_with(".parquet") {
            continue;
        }

        let local_path: PathBuf = entry.path().to_path_buf();
        let relative = local_path
            .strip_prefix(source_dir)
            .with_context(|| format!("💀 '{}' escaped the walk root", local_path.display()))?;
        // metadata() on a walkdir entry does not follow links, the path does
        let size = std::fs::metadata(&local_path).map(|m| m.len()).unwrap_or(0);

        plan.entries.push(FileEntry {
            remote_key: remote_key(dest_prefix, repo_id, relative),
            local_path,
        });
        plan.total_bytes += size;
    }

    info!(
        "🗺️ planned {} uploads from {} ({} bytes)",
        plan.entries.len(),
        source_dir.display(),
        plan.total_bytes
    );
    for entry in plan.entries.iter().take(PREVIEW_LIMIT) {
        info!("   {} → {}", entry.local_path.display(), entry.remote_key);
    }
    if plan.entries.len() > PREVIEW_LIMIT {
        info!("   ... and {} more", plan.entries.len() - PREVIEW_LIMIT);
    }

    Ok(plan)
}

/// 🧵 [`plan_tree`] off the async runtime. Walking a big snapshot is a lot of `stat`s.
pub(crate) async fn plan_uploads(
    source_dir: &Path,
    dest_prefix: &str,
    repo_id: &str,
    parquet_only: bool,
) -> Result<UploadPlan> {
    let source_dir = source_dir.to_path_buf();
    let dest_prefix = dest_prefix.to_string();
    let repo_id = repo_id.to_string();
    tokio::task::spawn_blocking(move || plan_tree(&source_dir, &dest_prefix, &repo_id, parquet_only))
        .await
        .context("💀 the planning thread panicked")?
}
