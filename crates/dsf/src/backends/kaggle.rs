//! # 🏅 THE KAGGLE BACKEND
//!
//! 🎬 COLD OPEN: a competition dataset with 40,000 CSVs. The listing API hands them out
//! 200 at a time, and after page 37 it starts saying 429 like it means it.
//!
//! Two jobs live here:
//! - [`KaggleListing`]: one page of `datasets/list/{owner}/{dataset}` per call, plugged
//!   into the generic [`crate::pager`] which handles the napping.
//! - [`KaggleClient::download_file`]: one file, streamed onto the staging mount with
//!   basic auth. Retrying it is the caller's business.
//!
//! Credentials are handed over in-process. They never touch an env var we set, a file
//! we write, or a log line. 🦆

use std::path::Path;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::trace;

use crate::backends::http::{check_response, safe_relative_path, stream_to_file};
use crate::common::{DatasetId, RemoteFileDescriptor};
use crate::error::{FetchError, RemoteError};
use crate::pager::{ListingPage, PageFetcher, PagerConfig};

#[derive(Deserialize, Clone)]
pub struct KaggleConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    /// 🗂️ object key prefix for everything ferried from Kaggle
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub dataset_version_number: Option<u32>,
    #[serde(default = "default_pager_max_retries")]
    pub pager_max_retries: u32,
    #[serde(default = "default_pager_backoff_factor_ms")]
    pub pager_backoff_factor_ms: u64,
}

fn default_api_base() -> String {
    "https://www.kaggle.com/api/v1".to_string()
}

fn default_prefix() -> String {
    "kaggle".to_string()
}

fn default_page_size() -> u32 {
    200
}

fn default_pager_max_retries() -> u32 {
    5
}

fn default_pager_backoff_factor_ms() -> u64 {
    1000
}

impl Default for KaggleConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            username: None,
            key: None,
            prefix: default_prefix(),
            page_size: default_page_size(),
            dataset_version_number: None,
            pager_max_retries: default_pager_max_retries(),
            pager_backoff_factor_ms: default_pager_backoff_factor_ms(),
        }
    }
}

impl std::fmt::Debug for KaggleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KaggleConfig")
            .field("api_base", &self.api_base)
            .field("username", &self.username)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("prefix", &self.prefix)
            .field("page_size", &self.page_size)
            .field("dataset_version_number", &self.dataset_version_number)
            .field("pager_max_retries", &self.pager_max_retries)
            .field("pager_backoff_factor_ms", &self.pager_backoff_factor_ms)
            .finish()
    }
}

/// 🔒 Username + API key. Debug prints the username only.
#[derive(Clone)]
pub(crate) struct KaggleCredentials {
    username: String,
    key: String,
}

impl std::fmt::Debug for KaggleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KaggleCredentials")
            .field("username", &self.username)
            .field("key", &"<redacted>")
            .finish()
    }
}

// -- 📄 wire shapes. camelCase, because the API said so.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFilesResponse {
    #[serde(default)]
    dataset_files: Vec<WireFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFile {
    name: String,
    #[serde(default)]
    total_bytes: Option<u64>,
}

#[derive(Debug)]
pub(crate) struct KaggleClient {
    client: reqwest::Client,
    api_base: String,
    credentials: Option<KaggleCredentials>,
    page_size: u32,
    dataset_version_number: Option<u32>,
    pager: PagerConfig,
    /// ⏱️ patience for one listing page
    call_timeout: Duration,
}

impl KaggleClient {
    pub(crate) fn new(config: &KaggleConfig, client: reqwest::Client, call_timeout: Duration) -> Self {
        let credentials = match (config.username.as_deref(), config.key.as_deref()) {
            (Some(username), Some(key)) if !username.is_empty() && !key.is_empty() => {
                Some(KaggleCredentials {
                    username: username.to_string(),
                    key: key.to_string(),
                })
            }
            _ => None,
        };
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            credentials,
            page_size: config.page_size.max(1),
            dataset_version_number: config.dataset_version_number,
            pager: PagerConfig {
                max_retries: config.pager_max_retries,
                backoff_factor: Duration::from_millis(config.pager_backoff_factor_ms),
            },
            call_timeout,
        }
    }

    /// 🔒 No credentials, no Kaggle. Fatal, and said so before anything else happens.
    pub(crate) fn credentials(&self) -> anyhow::Result<&KaggleCredentials> {
        match &self.credentials {
            Some(creds) => Ok(creds),
            None => bail!(
                "💀 Kaggle credentials are not set. Provide kaggle.username and kaggle.key \
                 (or KAGGLE_USERNAME / KAGGLE_KEY) before asking for a Kaggle dataset."
            ),
        }
    }

    pub(crate) fn pager_config(&self) -> PagerConfig {
        self.pager
    }

    pub(crate) fn listing<'a>(
        &'a self,
        credentials: &'a KaggleCredentials,
        dataset: &'a DatasetId,
    ) -> KaggleListing<'a> {
        KaggleListing {
            kaggle: self,
            credentials,
            dataset,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, RemoteError> {
        let malformed = |message: String| RemoteError::Malformed {
            endpoint: "kaggle".to_string(),
            message,
        };
        let mut url = reqwest::Url::parse(&self.api_base)
            .map_err(|e| malformed(format!("bad api_base '{}': {e}", self.api_base)))?;
        url.path_segments_mut()
            .map_err(|_| malformed(format!("api_base '{}' cannot take a path", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// 📥 Download one dataset file into `dest_dir`, keeping its relative name.
    pub(crate) async fn download_file(
        &self,
        credentials: &KaggleCredentials,
        dataset: &DatasetId,
        name: &str,
        dest_dir: &Path,
    ) -> Result<u64, FetchError> {
        let relative = safe_relative_path(name)?;
        let mut url = self.url(&["datasets", "download", dataset.owner(), dataset.name(), name])?;
        if let Some(version) = self.dataset_version_number {
            url.query_pairs_mut()
                .append_pair("datasetVersionNumber", &version.to_string());
        }
        let endpoint = format!("kaggle download {dataset}/{name}");
        trace!("📥 GET {url}");
        let response = self
            .client
            .get(url)
            .basic_auth(&credentials.username, Some(&credentials.key))
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(endpoint.as_str(), &e))?;
        let response = check_response(&endpoint, response).await?;
        stream_to_file(&endpoint, response, &dest_dir.join(relative)).await
    }
}

/// 📜 One dataset's file listing, one page at a time.
pub(crate) struct KaggleListing<'a> {
    kaggle: &'a KaggleClient,
    credentials: &'a KaggleCredentials,
    dataset: &'a DatasetId,
}

#[async_trait]
impl PageFetcher for KaggleListing<'_> {
    async fn fetch_page(&self, token: Option<&str>) -> Result<ListingPage, RemoteError> {
        let endpoint = format!("kaggle list {}", self.dataset);
        let mut url = self
            .kaggle
            .url(&["datasets", "list", self.dataset.owner(), self.dataset.name()])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("pageSize", &self.kaggle.page_size.to_string());
            if let Some(version) = self.kaggle.dataset_version_number {
                query.append_pair("datasetVersionNumber", &version.to_string());
            }
            if let Some(token) = token.filter(|t| !t.is_empty()) {
                query.append_pair("pageToken", token);
            }
        }

        let response = self
            .kaggle
            .client
            .get(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.key))
            .timeout(self.kaggle.call_timeout)
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(endpoint.as_str(), &e))?;
        let response = check_response(&endpoint, response).await?;
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::from_reqwest(endpoint.as_str(), &e))?;
        let body: ListFilesResponse =
            serde_json::from_str(&text).map_err(|e| RemoteError::Malformed {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;

        Ok(ListingPage {
            items: body
                .dataset_files
                .into_iter()
                .map(|f| RemoteFileDescriptor {
                    name: f.name,
                    size_bytes: f.total_bytes,
                })
                .collect(),
            next_page_token: body.next_page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::list_all;
    use wiremock::matchers::{header_exists, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> KaggleClient {
        let config = KaggleConfig {
            api_base: format!("{}/api/v1", server.uri()),
            username: Some("ferry".into()),
            key: Some("s3cr3t".into()),
            pager_backoff_factor_ms: 1,
            ..KaggleConfig::default()
        };
        KaggleClient::new(&config, reqwest::Client::new(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn the_one_where_two_pages_become_one_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/datasets/list/owner/ds"))
            .and(query_param("pageSize", "200"))
            .and(query_param_is_missing("pageToken"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "datasetFiles": [{"name": "a.csv", "totalBytes": 10}, {"name": "b.csv"}],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/datasets/list/owner/ds"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "datasetFiles": [{"name": "c.csv", "totalBytes": 30}],
                "nextPageToken": ""
            })))
            .mount(&server)
            .await;

        let kaggle = client_for(&server);
        let creds = kaggle.credentials().expect("💀 creds configured");
        let dataset: DatasetId = "owner/ds".parse().expect("💀 valid id");
        let listing = list_all(&kaggle.listing(creds, &dataset), &kaggle.pager_config())
            .await
            .expect("💀 should list");

        assert!(listing.complete);
        assert_eq!(listing.files.len(), 3);
        assert_eq!(listing.files[1].size_bytes, None);
        assert_eq!(listing.total_bytes(), 40);
    }

    #[tokio::test]
    async fn the_one_where_garbage_json_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>surprise</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let kaggle = client_for(&server);
        let creds = kaggle.credentials().expect("💀 creds configured");
        let dataset: DatasetId = "owner/ds".parse().expect("💀 valid id");
        let result = list_all(&kaggle.listing(creds, &dataset), &kaggle.pager_config()).await;
        assert!(matches!(result, Err(RemoteError::Malformed { .. })));
    }

    #[tokio::test]
    async fn the_one_where_a_file_comes_down_with_its_folders() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/datasets/download/owner/ds/sub%2Fdeep.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x,y\n"))
            .mount(&server)
            .await;

        let kaggle = client_for(&server);
        let creds = kaggle.credentials().expect("💀 creds configured");
        let dataset: DatasetId = "owner/ds".parse().expect("💀 valid id");
        let dir = tempfile::tempdir().expect("💀 tempdir");

        let bytes = kaggle
            .download_file(creds, &dataset, "sub/deep.csv", dir.path())
            .await
            .expect("💀 download should work");
        assert_eq!(bytes, 4);
        assert!(dir.path().join("sub/deep.csv").is_file());
    }

    #[tokio::test]
    async fn the_one_where_a_sneaky_name_never_leaves_the_house() {
        let server = MockServer::start().await;
        let kaggle = client_for(&server);
        let creds = kaggle.credentials().expect("💀 creds configured");
        let dataset: DatasetId = "owner/ds".parse().expect("💀 valid id");
        let dir = tempfile::tempdir().expect("💀 tempdir");

        let result = kaggle
            .download_file(creds, &dataset, "../../etc/passwd", dir.path())
            .await;
        assert!(matches!(result, Err(FetchError::UnsafeName(_))));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[test]
    fn the_one_where_missing_credentials_are_fatal_and_secrets_stay_secret() {
        let kaggle = KaggleClient::new(&KaggleConfig::default(), reqwest::Client::new(), Duration::from_secs(5));
        assert!(kaggle.credentials().is_err());

        let config = KaggleConfig {
            username: Some("ferry".into()),
            key: Some("s3cr3t".into()),
            ..KaggleConfig::default()
        };
        assert!(!format!("{config:?}").contains("s3cr3t"));
        let kaggle = KaggleClient::new(&config, reqwest::Client::new(), Duration::from_secs(5));
        assert!(!format!("{kaggle:?}").contains("s3cr3t"));
    }

    #[tokio::test]
    async fn the_one_where_a_sleepy_listing_page_counts_as_a_hiccup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/datasets/list/owner/ds"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"datasetFiles": [], "nextPageToken": ""}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let config = KaggleConfig {
            api_base: format!("{}/api/v1", server.uri()),
            username: Some("ferry".into()),
            key: Some("s3cr3t".into()),
            ..KaggleConfig::default()
        };
        let kaggle = KaggleClient::new(&config, reqwest::Client::new(), Duration::from_millis(100));
        let creds = kaggle.credentials().expect("💀 creds configured");
        let dataset: DatasetId = "owner/ds".parse().expect("💀 valid id");

        let result = kaggle.listing(creds, &dataset).fetch_page(None).await;
        assert!(matches!(result, Err(RemoteError::Transient { .. })), "{result:?}");
    }
}
