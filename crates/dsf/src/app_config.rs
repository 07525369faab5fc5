//! 🔧 App Configuration: env vars and an optional TOML file, folded into one struct.
//!
//! 📡 Layers, weakest first:
//! 1. legacy variable names from the old deployment (`FILERESTORE_MOUNT_PATH`,
//!    `HF_HUB_TOKEN`, `KAGGLE_USERNAME`, `KAGGLE_KEY`, `UPLOAD_WORKERS`, `CHUNK_SIZE_MB`)
//! 2. `DSF_*` variables, nested with `__` (`DSF_STORE__GCS__BUCKET=my-bucket`)
//! 3. the TOML file, when one is given. TOML wins.
//!
//! `GCS_BUCKET` only counts when no layer picked a store at all, so it can't fight an
//! explicit `[store.LocalDir]`.
//!
//! 🦆 "Config not found: we looked under the couch, behind the fridge, in the junk drawer."

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{GcsConfig, HuggingFaceConfig, KaggleConfig, LocalDirConfig, PubSubConfig};
use crate::mount::MountConfig;

/// 🗺️ old env name → where it lives now
const LEGACY_ENV: &[(&str, &str)] = &[
    ("FILERESTORE_MOUNT_PATH", "mount.root"),
    ("HF_HUB_TOKEN", "huggingface.token"),
    ("KAGGLE_USERNAME", "kaggle.username"),
    ("KAGGLE_KEY", "kaggle.key"),
    ("UPLOAD_WORKERS", "runtime.upload_workers"),
    ("CHUNK_SIZE_MB", "runtime.chunk_size_mb"),
];

/// 📦 Everything the ferry needs to know about itself.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub mount: MountConfig,
    /// 🪣 where uploads go. No default: guessing a bucket is how data ends up in the wrong one.
    pub store: StoreConfig,
    #[serde(default)]
    pub huggingface: HuggingFaceConfig,
    #[serde(default)]
    pub kaggle: KaggleConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// ⚙️ Pool sizes, retry budgets and timeouts.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_upload_workers")]
    pub upload_workers: usize,
    #[serde(default = "default_download_workers")]
    pub download_workers: usize,
    /// 📏 streaming buffer for uploads, in MiB
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: usize,
    #[serde(default = "default_max_retries")]
    pub upload_max_retries: u32,
    #[serde(default = "default_max_retries")]
    pub download_max_retries: u32,
    /// ⏱️ first retry waits this long, every next one twice as long
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// ⏱️ cap on a single upload or download attempt
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_upload_workers() -> usize {
    8
}

fn default_download_workers() -> usize {
    4
}

fn default_chunk_size_mb() -> usize {
    8
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_call_timeout_secs() -> u64 {
    300
}

fn default_show_progress() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            upload_workers: default_upload_workers(),
            download_workers: default_download_workers(),
            chunk_size_mb: default_chunk_size_mb(),
            upload_max_retries: default_max_retries(),
            download_max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            show_progress: default_show_progress(),
        }
    }
}

/// 🪣 Which object store gets the files.
///
/// Env keys arrive lowercased, hence the snake_case aliases.
#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    #[serde(alias = "gcs")]
    Gcs(GcsConfig),
    #[serde(alias = "local_dir")]
    LocalDir(LocalDirConfig),
    #[serde(alias = "in_memory")]
    InMemory,
}

/// 📣 Who hears about finished jobs. Logging is the default.
#[derive(Debug, Deserialize, Clone, Default)]
pub enum NotifierConfig {
    #[serde(alias = "pub_sub", alias = "pubsub")]
    PubSub(PubSubConfig),
    #[default]
    #[serde(alias = "log")]
    Log,
    #[serde(alias = "in_memory")]
    InMemory,
}

fn legacy_target(env_key: &str) -> &'static str {
    LEGACY_ENV
        .iter()
        .find(|(legacy, _)| legacy.eq_ignore_ascii_case(env_key))
        .map(|(_, target)| *target)
        .unwrap_or("legacy.unmapped")
}

/// 🏗️ The layered figment, before extraction. Split out so tests can poke at it.
pub(crate) fn figment_for(config_file_name: Option<&Path>) -> Figment {
    let legacy_names: Vec<&str> = LEGACY_ENV.iter().map(|(name, _)| *name).collect();
    let figment = Figment::new()
        .merge(
            Env::raw()
                .only(&legacy_names)
                .map(|key| legacy_target(key.as_str()).into()),
        )
        .merge(Env::prefixed("DSF_").split("__"));

    let figment = match config_file_name {
        Some(file_name) => figment.merge(Toml::file(file_name)),
        None => figment,
    };

    if figment.contains("store") {
        figment
    } else {
        figment.merge(
            Env::raw()
                .only(&["GCS_BUCKET"])
                .map(|_| "store.gcs.bucket".into()),
        )
    }
}

/// 🚀 Load the config from the environment and, if given, a TOML file.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {}",
        config_file_name.map_or_else(|| "<environment only>".to_string(), |p| p.display().to_string())
    );

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (DSF_*). \
             Is there a [store] section?",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (DSF_*). \
                 No file was provided, and a store is required (try GCS_BUCKET or DSF_STORE__GCS__BUCKET)."
            .to_string(),
    };

    figment_for(config_file_name).extract().context(context_msg)
}

/// 🗄️ Just the `mount` section, for jobs that never touch a bucket (the sweep).
pub fn load_mount_config(config_file_name: Option<&Path>) -> anyhow::Result<MountConfig> {
    figment_for(config_file_name)
        .focus("mount")
        .extract()
        .context("💀 Failed to parse the [mount] configuration (DSF_MOUNT__ROOT / FILERESTORE_MOUNT_PATH).")
}
