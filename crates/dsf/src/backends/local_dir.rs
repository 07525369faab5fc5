//! 📂 An "object store" that is really just a directory.
//!
//! For dry runs, laptops, and anyone who wants to see exactly which keys a job would
//! produce without paying for egress. Keys become relative paths under `root`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::backends::ObjectStore;
use crate::backends::http::safe_relative_path;

#[derive(Debug, Deserialize, Clone)]
pub struct LocalDirConfig {
    pub root: PathBuf,
}

#[derive(Debug)]
pub(crate) struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub(crate) fn new(config: &LocalDirConfig) -> Self {
        Self {
            root: config.root.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    async fn put_file(&self, local_path: &Path, key: &str, chunk_size_bytes: usize) -> Result<u64> {
        let relative = safe_relative_path(key)?;
        let target = self.root.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("💀 could not create '{}'", parent.display()))?;
        }

        // 📦 copy through a buffer of the configured size, same shape as a chunked upload
        let source = tokio::fs::File::open(local_path)
            .await
            .with_context(|| format!("💀 could not open '{}'", local_path.display()))?;
        let mut reader = tokio::io::BufReader::with_capacity(chunk_size_bytes.max(1), source);
        let mut sink = tokio::fs::File::create(&target)
            .await
            .with_context(|| format!("💀 could not create '{}'", target.display()))?;
        let bytes = tokio::io::copy_buf(&mut reader, &mut sink)
            .await
            .with_context(|| format!("💀 copy into '{}' failed midway", target.display()))?;
        sink.flush()
            .await
            .with_context(|| format!("💀 flushing '{}' failed", target.display()))?;
        Ok(bytes)
    }

    fn location_uri(&self, prefix: &str) -> String {
        let path = self.root.join(prefix.trim_matches('/'));
        format!("file://{}", path.display())
    }
}
