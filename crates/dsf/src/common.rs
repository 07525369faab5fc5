//! 📦 Common data structures: the luggage tags of dsferry.
//!
//! 🎬 COLD OPEN: INT. STAGING MOUNT, 3:47 AM
//!
//! A parquet shard sits on `/mnt/filestore`, freshly downloaded, still warm. It does not
//! know where it is going. The `FileEntry` does. The `UploadOutcome` will find out how
//! the trip went. The `JobRequest` started all of this and has since gone home. 🦆
//!
//! These are the structs that get passed between the listing, download, upload and
//! notification stages. None of them are persisted. All of them are load-bearing.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// 🧾 One local file and the object key it will land at.
///
/// `remote_key` is `dest_prefix/repo_id/relative_path`, `/`-separated, no leading slash.
/// Unique within a batch because the relative path is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub local_path: PathBuf,
    pub remote_key: String,
}

/// 📬 How one file's trip to the object store went. Exactly one per submitted entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub entry: FileEntry,
    pub ok: bool,
    pub error: Option<String>,
    /// 🔁 attempts actually made, including the one that finally worked (or didn't)
    pub attempts: u32,
    pub bytes: u64,
}

impl UploadOutcome {
    pub fn success(entry: FileEntry, attempts: u32, bytes: u64) -> Self {
        Self {
            entry,
            ok: true,
            error: None,
            attempts,
            bytes,
        }
    }

    pub fn failure(entry: FileEntry, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            entry,
            ok: false,
            error: Some(error.into()),
            attempts,
            bytes: 0,
        }
    }
}

/// 📄 A file the remote listing told us about. `name` doubles as the download key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFileDescriptor {
    pub name: String,
    pub size_bytes: Option<u64>,
}

/// 🎟️ Opaque continuation token. Present and non-empty means "there's more".
pub type PageToken = String;

/// 🏭 Where a dataset comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSource {
    HuggingFace,
    Kaggle,
}

impl DatasetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HuggingFace => "huggingface",
            Self::Kaggle => "kaggle",
        }
    }
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetSource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            "kaggle" => Ok(Self::Kaggle),
            _ => Err(ValidationError::UnknownSource(s.to_string())),
        }
    }
}

/// 🪪 `owner/name`, validated. Both halves are `[A-Za-z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetId {
    owner: String,
    name: String,
}

impl DatasetId {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 🏷️ The `owner/name` form every API wants.
    pub fn repo_id(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl FromStr for DatasetId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if is_valid_segment(owner) && is_valid_segment(name) => {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(ValidationError::MalformedDataset(s.to_string())),
        }
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// 🧭 Check a destination suffix: relative, no edge slashes, no `.`/`..`/empty segments.
pub fn validate_dest_suffix(suffix: &str) -> Result<(), ValidationError> {
    if suffix.starts_with('/') || suffix.ends_with('/') {
        return Err(ValidationError::SuffixEdgeSlash(suffix.to_string()));
    }
    if suffix
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(ValidationError::SuffixSegments(suffix.to_string()));
    }
    Ok(())
}

/// 🎫 One "please ferry this dataset" ticket. Created per trigger, consumed by the
/// orchestrator, never written down anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub dataset: DatasetId,
    pub source: DatasetSource,
    pub dest_suffix: Option<String>,
    /// 🔍 HuggingFace only: include files matching `*{config_name}*`
    pub config_name: Option<String>,
    /// 🔍 HuggingFace only: include files matching `*{split}*`
    pub split: Option<String>,
}

impl JobRequest {
    /// 🚪 Validate everything up front. An empty suffix means "no suffix".
    pub fn new(
        dataset: &str,
        source: DatasetSource,
        dest_suffix: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let dataset = dataset.trim().parse::<DatasetId>()?;
        let dest_suffix = match dest_suffix.map(str::trim).filter(|s| !s.is_empty()) {
            Some(suffix) => {
                validate_dest_suffix(suffix)?;
                Some(suffix.to_string())
            }
            None => None,
        };
        Ok(Self {
            dataset,
            source,
            dest_suffix,
            config_name: None,
            split: None,
        })
    }

    pub fn with_config_name(mut self, config_name: Option<String>) -> Self {
        self.config_name = config_name.filter(|c| !c.is_empty());
        self
    }

    pub fn with_split(mut self, split: Option<String>) -> Self {
        self.split = split.filter(|s| !s.is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_well_formed_datasets_get_in() {
        let id: DatasetId = "org/name".parse().expect("💀 org/name is the textbook case");
        assert_eq!(id.owner(), "org");
        assert_eq!(id.name(), "name");
        assert_eq!(id.repo_id(), "org/name");

        assert!("some_org/data-set_2".parse::<DatasetId>().is_ok());
    }

    #[test]
    fn the_one_where_the_bouncer_turns_away_weird_dataset_ids() {
        for bogus in ["", "org", "org/", "/name", "a/b/c", "org/na me", "org/name.v2", "../x"] {
            assert_eq!(
                bogus.parse::<DatasetId>(),
                Err(ValidationError::MalformedDataset(bogus.to_string())),
                "'{bogus}' should have been rejected"
            );
        }
    }

    #[test]
    fn the_one_where_suffixes_cannot_escape_the_mount() {
        assert!(validate_dest_suffix("team/run-42").is_ok());
        assert!(matches!(
            validate_dest_suffix("/abs"),
            Err(ValidationError::SuffixEdgeSlash(_))
        ));
        assert!(matches!(
            validate_dest_suffix("trailing/"),
            Err(ValidationError::SuffixEdgeSlash(_))
        ));
        for sneaky in ["a/../b", "..", "a/./b", "a//b"] {
            assert!(
                matches!(validate_dest_suffix(sneaky), Err(ValidationError::SuffixSegments(_))),
                "'{sneaky}' slipped through"
            );
        }
    }

    #[test]
    fn the_one_where_an_empty_suffix_means_no_suffix() {
        let request = JobRequest::new("org/name", DatasetSource::HuggingFace, Some(""))
            .expect("💀 empty suffix should be fine");
        assert_eq!(request.dest_suffix, None);

        let request = request
            .with_config_name(Some("default".into()))
            .with_split(Some(String::new()));
        assert_eq!(request.config_name.as_deref(), Some("default"));
        assert_eq!(request.split, None);
    }

    #[test]
    fn the_one_where_sources_parse_from_whatever_the_caller_typed() {
        assert_eq!("HuggingFace".parse::<DatasetSource>(), Ok(DatasetSource::HuggingFace));
        assert_eq!("kaggle".parse::<DatasetSource>(), Ok(DatasetSource::Kaggle));
        assert!("s3".parse::<DatasetSource>().is_err());
        assert_eq!(DatasetSource::Kaggle.to_string(), "kaggle");
    }
}
