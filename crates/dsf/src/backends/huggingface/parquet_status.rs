//! 🔍 "Has datasets-server already turned this into parquet for us?"
//!
//! datasets-server converts most public Hub datasets to parquet and publishes the result
//! under the `refs/convert/parquet` revision. If a complete conversion exists, ferrying
//! that is cheaper and more uniform than ferrying whatever formats the authors uploaded.
//!
//! This probe never fails. Whatever goes wrong (404, 500, garbage JSON, a network hiccup)
//! becomes `available = false` plus an `error_message`, and the caller carries on with
//! the regular snapshot.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::HubClient;
use crate::common::DatasetId;

/// 📋 What datasets-server had to say.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParquetStatus {
    pub available: bool,
    /// `None` when the response didn't say, or said it inconsistently
    pub is_partial: Option<bool>,
    pub error_message: Option<String>,
    pub http_status: Option<u16>,
}

impl ParquetStatus {
    fn unavailable(http_status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            available: false,
            is_partial: None,
            error_message: Some(message.into()),
            http_status,
        }
    }

    /// ✅ Only a conversion that is known to be complete is worth switching to.
    pub fn use_converted(&self) -> bool {
        self.available && self.is_partial == Some(false)
    }
}

fn non_empty_array(value: Option<&Value>) -> Option<bool> {
    value.and_then(Value::as_array).map(|items| !items.is_empty())
}

/// 🧠 Interpret a 200 body. Split out so the decision table can be tested without HTTP.
pub(crate) fn interpret(dataset: &str, http_status: u16, body: &Value) -> ParquetStatus {
    let status = Some(http_status);

    if let Some(err) = body.get("error") {
        return ParquetStatus::unavailable(status, format!("API returned an error: {err}"));
    }

    if let Some(configurations) = body
        .get("configurations")
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())
    {
        let is_partial = match body.get("partial") {
            Some(global) => Some(global.as_bool().unwrap_or(false)),
            None => {
                let flags: Vec<Option<bool>> = configurations
                    .iter()
                    .map(|c| c.get("partial").and_then(Value::as_bool))
                    .collect();
                if flags.contains(&Some(true)) {
                    Some(true)
                } else if flags.iter().all(Option::is_some) {
                    Some(false)
                } else {
                    info!("🤷 'partial' not consistently reported for {dataset}, leaving it undetermined");
                    None
                }
            }
        };
        let has_files = configurations
            .iter()
            .any(|c| non_empty_array(c.get("parquet_files")) == Some(true));
        if !has_files {
            return ParquetStatus {
                is_partial,
                ..ParquetStatus::unavailable(
                    status,
                    "Parquet configurations found, but no Parquet files listed within them.",
                )
            };
        }
        return ParquetStatus {
            available: true,
            is_partial,
            error_message: None,
            http_status: status,
        };
    }

    match non_empty_array(body.get("parquet_files")) {
        Some(true) => {
            let is_partial = body.get("partial").and_then(Value::as_bool);
            if is_partial.is_none() {
                info!("🤷 'partial' missing from the parquet listing of {dataset}");
            }
            ParquetStatus {
                available: true,
                is_partial,
                error_message: None,
                http_status: status,
            }
        }
        Some(false) => ParquetStatus::unavailable(status, "Parquet files list is empty."),
        None => ParquetStatus::unavailable(
            status,
            "No Parquet configurations or files found in the response, or unexpected response structure.",
        ),
    }
}

impl HubClient {
    /// 🔍 Ask datasets-server about `dataset`. Never errors; see [`ParquetStatus`].
    pub(crate) async fn parquet_status(&self, dataset: &DatasetId) -> ParquetStatus {
        let repo_id = dataset.repo_id();
        let mut url = match self.url(&self.datasets_server, ["parquet"]) {
            Ok(url) => url,
            Err(err) => return ParquetStatus::unavailable(None, err.to_string()),
        };
        url.query_pairs_mut().append_pair("dataset", &repo_id);

        let response = match self
            .authorized(self.client.get(url))
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("📡 datasets-server unreachable for {repo_id}: {err}");
                return ParquetStatus::unavailable(None, format!("API request failed: {err}"));
            }
        };

        let code = response.status().as_u16();
        match code {
            404 => {
                return ParquetStatus::unavailable(
                    Some(code),
                    format!(
                        "Dataset '{repo_id}' not found or no Parquet conversion available via datasets-server (404 error)."
                    ),
                );
            }
            500 => {
                return ParquetStatus::unavailable(
                    Some(code),
                    format!("datasets-server internal error for '{repo_id}' (500 error)."),
                );
            }
            _ if !response.status().is_success() => {
                return ParquetStatus::unavailable(
                    Some(code),
                    format!("HTTP error during API request: {code}"),
                );
            }
            _ => {}
        }

        match response.json::<Value>().await {
            Ok(body) => interpret(&repo_id, code, &body),
            Err(err) => ParquetStatus::unavailable(
                Some(code),
                format!("Failed to parse API JSON response: {err}"),
            ),
        }
    }
}
