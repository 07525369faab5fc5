//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 Dataset hubs pour the files in, object stores slurp them up, and notifiers shout
//! about it afterwards. In between, we retry. A lot.
//!
//! 🎭 This module is the casting agency. Need a bucket? GCS, a local directory, or a
//! HashMap in a trench coat. Need to tell the world? Pub/Sub, a log line, or a Vec that
//! remembers. Same trick every time: trait, concrete impls, and an enum that dispatches
//! so callers never care which one they got.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::status::Status;

pub(crate) mod gcp_auth;
pub(crate) mod gcs;
pub(crate) mod http;
pub(crate) mod huggingface;
pub(crate) mod in_mem;
pub(crate) mod kaggle;
pub(crate) mod local_dir;
pub(crate) mod pubsub;

// 🎯 Re-export backend configs so callers can say `backends::GcsConfig`
// instead of spelunking through `backends::gcs::GcsConfig`.
pub use gcp_auth::GcpAuthConfig;
pub use gcs::GcsConfig;
pub use huggingface::HuggingFaceConfig;
pub use kaggle::KaggleConfig;
pub use local_dir::LocalDirConfig;
pub use pubsub::PubSubConfig;

// ===== ObjectStore Trait and Backend Enum =====

/// 🪣 Somewhere files go to live forever (or until the lifecycle policy says otherwise).
///
/// # Contract
/// - `put_file` reads `local_path` and writes it to `key`, overwriting whatever was there.
///   Calling it twice with the same input is harmless. Returns the bytes written.
/// - `location_uri` renders a human-facing address for a key prefix, e.g. `gs://bucket/x`.
/// - Implementations are shared by every upload worker, hence `&self` and `Send + Sync`.
#[async_trait]
pub(crate) trait ObjectStore: std::fmt::Debug + Send + Sync {
    async fn put_file(&self, local_path: &Path, key: &str, chunk_size_bytes: usize) -> Result<u64>;

    fn location_uri(&self, prefix: &str) -> String;
}

/// 🎭 The many faces of an object store.
#[derive(Debug)]
pub(crate) enum ObjectStoreBackend {
    Gcs(gcs::GcsStore),
    LocalDir(local_dir::LocalDirStore),
    InMemory(in_mem::InMemoryStore),
}

#[async_trait]
impl ObjectStore for ObjectStoreBackend {
    async fn put_file(&self, local_path: &Path, key: &str, chunk_size_bytes: usize) -> Result<u64> {
        match self {
            ObjectStoreBackend::Gcs(store) => store.put_file(local_path, key, chunk_size_bytes).await,
            ObjectStoreBackend::LocalDir(store) => {
                store.put_file(local_path, key, chunk_size_bytes).await
            }
            ObjectStoreBackend::InMemory(store) => {
                store.put_file(local_path, key, chunk_size_bytes).await
            }
        }
    }

    fn location_uri(&self, prefix: &str) -> String {
        match self {
            ObjectStoreBackend::Gcs(store) => store.location_uri(prefix),
            ObjectStoreBackend::LocalDir(store) => store.location_uri(prefix),
            ObjectStoreBackend::InMemory(store) => store.location_uri(prefix),
        }
    }
}

// ===== CompletionNotifier Trait and Backend Enum =====

/// 📣 Tells the rest of the world "dataset X is now at Y".
///
/// # Contract
/// - Fire once per completed job. Failures come back as a non-ok [`Status`], never a panic
///   and never a retry. The upload already happened; a missed announcement is sad but
///   not worth undoing anything over.
#[async_trait]
pub(crate) trait CompletionNotifier: std::fmt::Debug + Send + Sync {
    async fn notify(&self, dataset: &str, destination: &str) -> Status;
}

/// 🎭 The many mouths of the notifier.
#[derive(Debug)]
pub(crate) enum NotifierBackend {
    PubSub(pubsub::PubSubNotifier),
    Log(LogNotifier),
    InMemory(in_mem::InMemoryNotifier),
}

#[async_trait]
impl CompletionNotifier for NotifierBackend {
    async fn notify(&self, dataset: &str, destination: &str) -> Status {
        match self {
            NotifierBackend::PubSub(n) => n.notify(dataset, destination).await,
            NotifierBackend::Log(n) => n.notify(dataset, destination).await,
            NotifierBackend::InMemory(n) => n.notify(dataset, destination).await,
        }
    }
}

/// 📝 The notifier for when nobody is subscribed: it writes the announcement to the log
/// and calls it a day.
#[derive(Debug, Default)]
pub(crate) struct LogNotifier;

#[async_trait]
impl CompletionNotifier for LogNotifier {
    async fn notify(&self, dataset: &str, destination: &str) -> Status {
        tracing::info!("📣 dataset '{dataset}' uploaded to {destination}");
        Status::ok_with(format!("logged completion of {dataset}"))
    }
}
