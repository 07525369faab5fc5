//! 🧵 Workers: the ones who actually move the bytes while the engine takes the credit.
//!
//! A worker owns its inputs, gets spawned onto the runtime and hands back a
//! `JoinHandle`. Whatever it produced comes home through that handle.

use anyhow::Result;
use tokio::task::JoinHandle;

mod upload_worker;
pub(crate) use upload_worker::UploadWorker;

/// 🏗️ A background worker, that does work. duh.
pub(crate) trait Worker {
    type Output: Send + 'static;

    /// 🚀 Spawn it. Await the handle to get the output back.
    fn start(self) -> JoinHandle<Result<Self::Output>>;
}
