//! # Previously, on dsferry...
//!
//! 🎬 The bucket was in another region. The credentials were in another vault. The test
//! suite was in a hurry. Someone had to write a store so simple it lives entirely in RAM,
//! gone the moment you blink.
//!
//! `in_mem` provides an in-memory [`ObjectStore`] and [`CompletionNotifier`] for tests
//! and dry runs. The store keeps every object in a map behind an `Arc<Mutex<...>>` so
//! callers can inspect what arrived, and it can be told to fail the next N puts of a key
//! on purpose, because testing retries against a store that never fails is just vibes.
//! A gated store parks every put until the test hands out permits, which is how you
//! catch uploads in flight.
//!
//! 🦆
//!
//! ⚠️ This is NOT for production. If you're ferrying real datasets into a HashMap,
//! please also deploy a therapist.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::backends::{CompletionNotifier, ObjectStore};
use crate::status::Status;

#[derive(Debug, Default)]
struct StoreState {
    objects: HashMap<String, Vec<u8>>,
    /// 🔢 put attempts per key, successful or not
    attempts: HashMap<String, u32>,
    /// 💣 key → how many more puts should blow up
    scripted_failures: HashMap<String, u32>,
}

/// 📦 A bucket that never forgets (until the process exits).
///
/// Clone-able so tests can keep a handle after giving one to the engine. The `Arc` means
/// every clone sees the same objects.
#[derive(Debug, Default, Clone)]
pub(crate) struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    /// 🚧 when set, each put waits for a permit before touching the map
    gate: Option<Arc<Semaphore>>,
}

impl InMemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // -- 🧯 a panicking test thread must not take every other assertion down with it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 🚧 A store whose puts wait for a permit from `gate`. Start it with zero permits.
    #[cfg(test)]
    pub(crate) fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// 🔢 puts that have started, whether or not they got through
    #[cfg(test)]
    pub(crate) fn puts_started(&self) -> u32 {
        self.lock().attempts.values().sum()
    }

    /// 💣 Make the next `times` puts of `key` fail.
    #[cfg(test)]
    pub(crate) fn fail_next(&self, key: &str, times: u32) {
        self.lock().scripted_failures.insert(key.to_string(), times);
    }

    #[cfg(test)]
    pub(crate) fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).cloned()
    }

    #[cfg(test)]
    pub(crate) fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    #[cfg(test)]
    pub(crate) fn attempts(&self, key: &str) -> u32 {
        self.lock().attempts.get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn put_file(&self, local_path: &Path, key: &str, _chunk_size_bytes: usize) -> Result<u64> {
        {
            let mut state = self.lock();
            *state.attempts.entry(key.to_string()).or_insert(0) += 1;
            if let Some(remaining) = state.scripted_failures.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    bail!("💣 scripted failure for '{key}'");
                }
            }
        }
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await?;
        }
        let bytes = tokio::fs::read(local_path).await?;
        let len = bytes.len() as u64;
        self.lock().objects.insert(key.to_string(), bytes);
        Ok(len)
    }

    fn location_uri(&self, prefix: &str) -> String {
        format!("mem://{}", prefix.trim_matches('/'))
    }
}

/// 📣 A notifier that writes its announcements down instead of shouting them.
#[derive(Debug, Default, Clone)]
pub(crate) struct InMemoryNotifier {
    pub(crate) announcements: Arc<Mutex<Vec<(String, String)>>>,
}

impl InMemoryNotifier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn announced(&self) -> Vec<(String, String)> {
        self.announcements
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl CompletionNotifier for InMemoryNotifier {
    async fn notify(&self, dataset: &str, destination: &str) -> Status {
        self.announcements
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((dataset.to_string(), destination.to_string()));
        Status::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_the_store_fails_exactly_as_often_as_it_was_told() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let local = dir.path().join("f");
        std::fs::write(&local, b"hello").expect("💀 write fixture");

        let store = InMemoryStore::new();
        store.fail_next("k", 2);

        assert!(store.put_file(&local, "k", 8).await.is_err());
        assert!(store.put_file(&local, "k", 8).await.is_err());
        assert_eq!(store.put_file(&local, "k", 8).await.expect("💀 third time lucky"), 5);

        assert_eq!(store.attempts("k"), 3);
        assert_eq!(store.object("k").as_deref(), Some(&b"hello"[..]));
        assert_eq!(store.keys(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn the_one_where_the_notifier_keeps_a_diary() {
        let notifier = InMemoryNotifier::new();
        let status = notifier.notify("org/name", "mem://x").await;
        assert!(status.is_ok());
        assert_eq!(notifier.announced(), vec![("org/name".to_string(), "mem://x".to_string())]);
    }
}
