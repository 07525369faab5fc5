//! 📣 Pub/Sub completion notifier.
//!
//! 🎬 *[the last shard lands in the bucket. silence.]*
//! *[somewhere, a training pipeline refreshes its subscription for the 400th time.]*
//! *[this module is the tap on the shoulder.]*
//!
//! Publishes one `{dataset, destination, timestamp}` record per finished job through the
//! Pub/Sub REST API. Exactly one attempt, bounded by a timeout. Whatever happens comes
//! back as a [`Status`]; nothing here is ever allowed to fail the job that already
//! succeeded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::backends::CompletionNotifier;
use crate::backends::gcp_auth::{AccessTokenSource, GcpAuthConfig};
use crate::backends::http::check_response;
use crate::error::RemoteError;
use crate::status::Status;

#[derive(Debug, Deserialize, Clone)]
pub struct PubSubConfig {
    pub project: String,
    pub topic: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub auth: GcpAuthConfig,
}

fn default_endpoint() -> String {
    "https://pubsub.googleapis.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// 📨 The record subscribers receive (JSON, then base64 on the wire).
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetDownloadComplete {
    pub dataset: String,
    pub destination: String,
    /// ⏰ UTC, RFC 3339 with a trailing `Z`
    pub timestamp: String,
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    messages: [PubsubMessage<'a>; 1],
}

#[derive(Serialize)]
struct PubsubMessage<'a> {
    data: String,
    attributes: MessageAttributes<'a>,
}

#[derive(Serialize)]
struct MessageAttributes<'a> {
    dataset: &'a str,
}

#[derive(Deserialize)]
struct PublishResponse {
    #[serde(rename = "messageIds", default)]
    message_ids: Vec<String>,
}

/// ⏰ Timeouts get their own bucket so the status can say so plainly.
enum PublishError {
    TimedOut,
    Remote(RemoteError),
}

impl From<RemoteError> for PublishError {
    fn from(err: RemoteError) -> Self {
        PublishError::Remote(err)
    }
}

fn classify(endpoint: &str, err: reqwest::Error) -> PublishError {
    if err.is_timeout() {
        PublishError::TimedOut
    } else {
        PublishError::Remote(RemoteError::from_reqwest(endpoint, &err))
    }
}

#[derive(Debug)]
pub(crate) struct PubSubNotifier {
    client: reqwest::Client,
    topic_path: String,
    publish_url: String,
    timeout: Duration,
    tokens: Arc<AccessTokenSource>,
}

impl PubSubNotifier {
    pub(crate) fn new(config: &PubSubConfig, client: reqwest::Client) -> Self {
        let topic_path = format!("projects/{}/topics/{}", config.project, config.topic);
        let publish_url = format!(
            "{}/v1/{}:publish",
            config.endpoint.trim_end_matches('/'),
            topic_path
        );
        info!("📣 Pub/Sub notifier ready for {topic_path}");
        Self {
            tokens: Arc::new(AccessTokenSource::from_config(&config.auth, client.clone())),
            client,
            topic_path,
            publish_url,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn publish(&self, dataset: &str, destination: &str) -> Result<Vec<String>, PublishError> {
        let record = DatasetDownloadComplete {
            dataset: dataset.to_string(),
            destination: destination.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        };
        let payload = serde_json::to_vec(&record).map_err(|e| RemoteError::Malformed {
            endpoint: self.topic_path.clone(),
            message: e.to_string(),
        })?;
        let request = PublishRequest {
            messages: [PubsubMessage {
                data: BASE64.encode(payload),
                attributes: MessageAttributes { dataset },
            }],
        };

        let token = self.tokens.token().await?;
        let response = self
            .client
            .post(&self.publish_url)
            .bearer_auth(token)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify(&self.topic_path, e))?;
        let response = check_response(&self.topic_path, response).await?;
        let body: PublishResponse = response
            .json()
            .await
            .map_err(|e| classify(&self.topic_path, e))?;
        Ok(body.message_ids)
    }
}

#[async_trait]
impl CompletionNotifier for PubSubNotifier {
    async fn notify(&self, dataset: &str, destination: &str) -> Status {
        match self.publish(dataset, destination).await {
            Ok(ids) => {
                info!("📣 published message {:?} to {}", ids, self.topic_path);
                Status::ok()
            }
            Err(PublishError::Remote(RemoteError::Permanent { status: 404, .. })) => {
                error!("💀 Pub/Sub topic not found: {}", self.topic_path);
                Status::error(format!("Pub/Sub topic not found: {}", self.topic_path), Some(404))
            }
            Err(PublishError::TimedOut) => {
                error!("⏰ publishing to {} timed out", self.topic_path);
                Status::error(format!("Publishing to {} timed out.", self.topic_path), None)
            }
            Err(PublishError::Remote(err)) => {
                error!("💀 publishing to {} failed: {err}", self.topic_path);
                Status::error(
                    format!("An error occurred while publishing to {}: {err}", self.topic_path),
                    err.status_code(),
                )
            }
        }
    }
}
