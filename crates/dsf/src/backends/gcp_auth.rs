//! 🔑 GCP access tokens, for the GCS store and the Pub/Sub notifier.
//!
//! Two ways to get one:
//! - a static bearer token from config (tests, local runs, `gcloud auth print-access-token`)
//! - the instance metadata server, which every Cloud Run / GCE box has lying around
//!
//! Metadata tokens are cached until a minute before they expire. Nobody wants a token
//! round-trip in front of every one of ten thousand uploads.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::backends::http::check_response;
use crate::error::RemoteError;

const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
// -- ⏳ refresh a little early so a token never expires mid-upload
const EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// 🔑 How to authenticate against Google APIs. Flattened into the GCS and Pub/Sub configs.
#[derive(Deserialize, Clone)]
pub struct GcpAuthConfig {
    /// 🎫 Static bearer token. When unset, the metadata server is asked instead.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_metadata_endpoint")]
    pub metadata_endpoint: String,
}

fn default_metadata_endpoint() -> String {
    "http://metadata.google.internal".to_string()
}

impl Default for GcpAuthConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            metadata_endpoint: default_metadata_endpoint(),
        }
    }
}

impl std::fmt::Debug for GcpAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🙈 tokens do not belong in logs. not even debug logs. especially not debug logs.
        f.debug_struct("GcpAuthConfig")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("metadata_endpoint", &self.metadata_endpoint)
            .finish()
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

pub(crate) struct CachedToken {
    token: String,
    refresh_at: Instant,
}

pub(crate) enum AccessTokenSource {
    Static(String),
    MetadataServer {
        client: reqwest::Client,
        endpoint: String,
        cache: Mutex<Option<CachedToken>>,
    },
}

impl std::fmt::Debug for AccessTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessTokenSource::Static(_) => f.write_str("AccessTokenSource::Static(<redacted>)"),
            AccessTokenSource::MetadataServer { endpoint, .. } => f
                .debug_struct("AccessTokenSource::MetadataServer")
                .field("endpoint", endpoint)
                .finish(),
        }
    }
}

impl AccessTokenSource {
    pub(crate) fn from_config(config: &GcpAuthConfig, client: reqwest::Client) -> Self {
        match config.access_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => AccessTokenSource::Static(token.to_string()),
            None => AccessTokenSource::MetadataServer {
                client,
                endpoint: config.metadata_endpoint.trim_end_matches('/').to_string(),
                cache: Mutex::new(None),
            },
        }
    }

    /// 🎫 A bearer token that is valid right now.
    pub(crate) async fn token(&self) -> Result<String, RemoteError> {
        match self {
            AccessTokenSource::Static(token) => Ok(token.clone()),
            AccessTokenSource::MetadataServer {
                client,
                endpoint,
                cache,
            } => {
                // 🔒 held across the fetch so a burst of workers triggers one refresh, not eight
                let mut cached = cache.lock().await;
                if let Some(hit) = cached.as_ref().filter(|c| Instant::now() < c.refresh_at) {
                    return Ok(hit.token.clone());
                }
                let fresh = fetch_metadata_token(client, endpoint).await?;
                let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_SLACK);
                debug!("🔑 fetched a metadata token, refreshing in {:?}", lifetime);
                let token = fresh.access_token.clone();
                *cached = Some(CachedToken {
                    token: fresh.access_token,
                    refresh_at: Instant::now() + lifetime,
                });
                Ok(token)
            }
        }
    }
}

async fn fetch_metadata_token(
    client: &reqwest::Client,
    endpoint: &str,
) -> Result<MetadataToken, RemoteError> {
    const WHAT: &str = "gcp metadata server";
    let response = client
        .get(format!("{endpoint}{METADATA_TOKEN_PATH}"))
        .header("Metadata-Flavor", "Google")
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| RemoteError::from_reqwest(WHAT, &e))?;
    let response = check_response(WHAT, response).await?;
    response
        .json::<MetadataToken>()
        .await
        .map_err(|e| RemoteError::Malformed {
            endpoint: WHAT.to_string(),
            message: e.to_string(),
        })
}
