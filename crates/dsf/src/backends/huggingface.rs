//! # 🤗 THE HUGGINGFACE BACKEND
//!
//! *Previously, on dsferry...*
//!
//! A dataset repo on the Hub is a git repo wearing a nice hat. Every file it holds shows
//! up as a `sibling` in the revision metadata, and every sibling can be fetched through
//! `resolve/{revision}/{path}`. That's the whole trick. Everything else in this module is
//! manners: bearer tokens, percent-encoding, and not writing `../` anywhere near the mount.
//!
//! 🧩 Submodules:
//! - [`snapshot`]: the concurrent "download everything that matches these globs" job
//! - [`parquet_status`]: asks datasets-server whether a converted parquet copy exists
//!
//! 🦆 (the duck has been converted to parquet. it is columnar now. it is at peace.)

use std::path::Path;

use serde::Deserialize;
use tracing::trace;

use crate::backends::http::{check_response, safe_relative_path, stream_to_file};
use crate::common::DatasetId;
use crate::error::{FetchError, RemoteError};

pub(crate) mod parquet_status;
pub(crate) mod snapshot;

/// 🌿 The revision datasets-server publishes its parquet conversion under.
pub const PARQUET_CONVERSION_REVISION: &str = "refs/convert/parquet";
const DEFAULT_REVISION: &str = "main";

#[derive(Deserialize, Clone)]
pub struct HuggingFaceConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_datasets_server")]
    pub datasets_server: String,
    #[serde(default)]
    pub token: Option<String>,
    /// 🗂️ object key prefix for everything ferried from the Hub
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// 🌿 pin a branch, tag or commit. `main` when unset.
    #[serde(default)]
    pub revision: Option<String>,
    /// 🔍 ask datasets-server first and prefer its parquet conversion when complete
    #[serde(default)]
    pub check_parquet_conversion: bool,
    /// 🧻 upload only `.parquet` files, whatever got downloaded
    #[serde(default)]
    pub parquet_only: bool,
}

fn default_endpoint() -> String {
    "https://huggingface.co".to_string()
}

fn default_datasets_server() -> String {
    "https://datasets-server.huggingface.co".to_string()
}

fn default_prefix() -> String {
    "huggingface".to_string()
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            datasets_server: default_datasets_server(),
            token: None,
            prefix: default_prefix(),
            revision: None,
            check_parquet_conversion: false,
            parquet_only: false,
        }
    }
}

impl std::fmt::Debug for HuggingFaceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingFaceConfig")
            .field("endpoint", &self.endpoint)
            .field("datasets_server", &self.datasets_server)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("prefix", &self.prefix)
            .field("revision", &self.revision)
            .field("check_parquet_conversion", &self.check_parquet_conversion)
            .field("parquet_only", &self.parquet_only)
            .finish()
    }
}

#[derive(Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Deserialize)]
struct Sibling {
    rfilename: String,
}

/// 📡 Thin client over the Hub and datasets-server HTTP APIs.
pub(crate) struct HubClient {
    client: reqwest::Client,
    endpoint: String,
    datasets_server: String,
    token: Option<String>,
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("endpoint", &self.endpoint)
            .field("datasets_server", &self.datasets_server)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HubClient {
    pub(crate) fn new(config: &HuggingFaceConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            datasets_server: config.datasets_server.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
        }
    }

    pub(crate) fn default_revision() -> &'static str {
        DEFAULT_REVISION
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// 🔗 `base` + path segments, each percent-encoded on its own. A revision like
    /// `refs/convert/parquet` therefore travels as one segment, as the Hub expects.
    fn url<'s>(
        &self,
        base: &str,
        segments: impl IntoIterator<Item = &'s str>,
    ) -> Result<reqwest::Url, RemoteError> {
        let malformed = |message: String| RemoteError::Malformed {
            endpoint: base.to_string(),
            message,
        };
        let mut url = reqwest::Url::parse(base).map_err(|e| malformed(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| malformed("base URL cannot take a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// 📜 Every file path in the repo at `revision`.
    pub(crate) async fn list_repo_files(
        &self,
        dataset: &DatasetId,
        revision: &str,
    ) -> Result<Vec<String>, RemoteError> {
        let endpoint = format!("hub info {dataset}@{revision}");
        let url = self.url(
            &self.endpoint,
            ["api", "datasets", dataset.owner(), dataset.name(), "revision", revision],
        )?;
        trace!("📜 GET {url}");
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(endpoint.as_str(), &e))?;
        let response = check_response(&endpoint, response).await?;
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::from_reqwest(endpoint.as_str(), &e))?;
        let info: RepoInfo = serde_json::from_str(&text).map_err(|e| RemoteError::Malformed {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        })?;
        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    /// 📥 Fetch one repo file into `dest_dir`, mirroring its path.
    pub(crate) async fn download_file(
        &self,
        dataset: &DatasetId,
        revision: &str,
        rfilename: &str,
        dest_dir: &Path,
    ) -> Result<u64, FetchError> {
        let relative = safe_relative_path(rfilename)?;
        let endpoint = format!("hub resolve {dataset}/{rfilename}");
        let segments = ["datasets", dataset.owner(), dataset.name(), "resolve", revision]
            .into_iter()
            .chain(rfilename.split('/').filter(|s| !s.is_empty()));
        let url = self.url(&self.endpoint, segments)?;
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(endpoint.as_str(), &e))?;
        let response = check_response(&endpoint, response).await?;
        stream_to_file(&endpoint, response, &dest_dir.join(relative)).await
    }
}
