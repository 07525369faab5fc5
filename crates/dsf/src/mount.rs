//! 🗄️ The staging mount: a shared filesystem where datasets rest between download and upload.
//!
//! Jobs land under `root` (optionally in a `dest_suffix` subfolder). Nothing here cleans
//! up after a job; [`StagingMount::sweep`] is the big broom that empties the whole mount
//! when someone decides it's time.
//!
//! ⚠️ Two jobs pointed at the same suffix will happily trample each other. Nobody
//! coordinates them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Deserialize, Clone)]
pub struct MountConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

fn default_root() -> PathBuf {
    PathBuf::from("/mnt/filestore")
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

/// 🧹 What the broom did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deleted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct StagingMount {
    root: PathBuf,
}

impl StagingMount {
    pub fn new(config: &MountConfig) -> Self {
        Self {
            root: config.root.clone(),
        }
    }

    /// 📍 Where a job with this suffix lands. The suffix was validated on the way in.
    pub fn destination_for(&self, dest_suffix: Option<&str>) -> PathBuf {
        match dest_suffix {
            Some(suffix) => self.root.join(suffix),
            None => self.root.clone(),
        }
    }

    /// 📁 mkdir -p, with a message worth reading when it fails
    pub async fn ensure(&self, destination: &Path) -> Result<()> {
        tokio::fs::create_dir_all(destination)
            .await
            .with_context(|| format!("💀 could not create staging folder '{}'", destination.display()))
    }

    /// 🧹 Delete every entry directly under the root. A failure is logged and counted,
    /// then the sweep moves on to the next entry.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("💀 could not list mount root '{}'", self.root.display()))?;
        let mut report = SweepReport::default();

        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("💀 could not keep listing '{}'", self.root.display()))?
        {
            let path = entry.path();
            let removed = match tokio::fs::symlink_metadata(&path).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(err) => Err(err),
            };
            match removed {
                Ok(()) => {
                    info!("🧹 deleted {}", path.display());
                    report.deleted += 1;
                }
                Err(err) => {
                    warn!("💀 failed to delete {}: {err}", path.display());
                    report.failed += 1;
                }
            }
        }

        info!(
            "🧹 swept {}: {} deleted, {} failed",
            self.root.display(),
            report.deleted,
            report.failed
        );
        Ok(report)
    }
}
