//! # 🪣 THE GCS BACKEND
//!
//! 🎬 COLD OPEN: INT. A DATACENTER IN IOWA, PROBABLY
//!
//! Somewhere a bucket waits. It has been waiting since the Terraform apply. It does not
//! know about HuggingFace. It does not care about Kaggle. It accepts bytes, assigns
//! them a generation number, and goes back to sleep.
//!
//! This store speaks the GCS JSON API's simple media upload: one POST per object, the
//! body streamed straight from the staging mount in `chunk_size_bytes` pieces so a
//! 40 GiB shard never has to fit in memory. Re-uploading the same key just makes a new
//! generation of the same object. Idempotent enough for a retry loop. 🦆

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::trace;

use crate::backends::ObjectStore;
use crate::backends::gcp_auth::{AccessTokenSource, GcpAuthConfig};
use crate::backends::http::check_response;
use crate::error::RemoteError;

/// 🪣 Where the bucket lives and how to get past the bouncer.
#[derive(Debug, Deserialize, Clone)]
pub struct GcsConfig {
    pub bucket: String,
    /// 📡 Override for emulators and tests. Real GCS lives at the default.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(flatten)]
    pub auth: GcpAuthConfig,
}

fn default_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

#[derive(Debug)]
pub(crate) struct GcsStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    tokens: Arc<AccessTokenSource>,
}

impl GcsStore {
    pub(crate) fn new(config: &GcsConfig, client: reqwest::Client) -> Self {
        let tokens = Arc::new(AccessTokenSource::from_config(&config.auth, client.clone()));
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            tokens,
        }
    }

    fn upload_url(&self, key: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&format!(
            "{}/upload/storage/v1/b/{}/o",
            self.endpoint, self.bucket
        ))
        .with_context(|| format!("💀 '{}' does not make a valid GCS upload URL", self.endpoint))?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn put_file(&self, local_path: &Path, key: &str, chunk_size_bytes: usize) -> Result<u64> {
        let file = tokio::fs::File::open(local_path)
            .await
            .with_context(|| format!("💀 could not open '{}' for upload", local_path.display()))?;
        let size = file
            .metadata()
            .await
            .with_context(|| format!("💀 could not stat '{}'", local_path.display()))?
            .len();
        let token = self.tokens.token().await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::with_capacity(file, chunk_size_bytes.max(1)));

        trace!("🪣 POST gs://{}/{} ({} bytes)", self.bucket, key, size);
        let endpoint = format!("gcs upload {key}");
        let response = self
            .client
            .post(self.upload_url(key)?)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(endpoint.as_str(), &e))?;
        check_response(&endpoint, response).await?;
        Ok(size)
    }

    fn location_uri(&self, prefix: &str) -> String {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("gs://{}", self.bucket)
        } else {
            format!("gs://{}/{}", self.bucket, prefix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> GcsStore {
        let config = GcsConfig {
            bucket: "ferry-bucket".into(),
            endpoint: server.uri(),
            auth: GcpAuthConfig {
                access_token: Some("test-token".into()),
                ..GcpAuthConfig::default()
            },
        };
        GcsStore::new(&config, reqwest::Client::new())
    }

    #[tokio::test]
    async fn the_one_where_a_file_streams_into_the_bucket_in_tiny_sips() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/ferry-bucket/o"))
            .and(query_param("uploadType", "media"))
            .and(query_param("name", "huggingface/org/name/data/train.parquet"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_string("PAR1 pretend this is columnar"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("💀 tempdir");
        let local = dir.path().join("train.parquet");
        std::fs::write(&local, "PAR1 pretend this is columnar").expect("💀 write fixture");

        let bytes = store_for(&server)
            .put_file(&local, "huggingface/org/name/data/train.parquet", 4)
            .await
            .expect("💀 upload should succeed");
        assert_eq!(bytes, 29);
    }

    #[tokio::test]
    async fn the_one_where_the_bucket_says_forbidden() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("no soup for you"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("💀 tempdir");
        let local = dir.path().join("a.bin");
        std::fs::write(&local, b"abc").expect("💀 write fixture");

        let err = store_for(&server)
            .put_file(&local, "k", 1024)
            .await
            .expect_err("💀 403 should fail");
        let remote = err.downcast_ref::<RemoteError>().expect("💀 should be a RemoteError");
        assert_eq!(remote.status_code(), Some(403));
    }

    #[tokio::test]
    async fn the_one_where_uris_look_like_gsutil_would_print_them() {
        let server = MockServer::start().await;
        let store = store_for(&server);
        assert_eq!(store.location_uri("huggingface/org/name"), "gs://ferry-bucket/huggingface/org/name");
        assert_eq!(store.location_uri(""), "gs://ferry-bucket");
    }
}
