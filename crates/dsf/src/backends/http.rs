//! 📡 Shared HTTP helpers: one client to rule them all, a status checker that sorts
//! failures into [`RemoteError`] buckets, and a streaming download that never leaves a
//! half-written file where a whole one should be.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::error::{FetchError, RemoteError};

// -- ✂️ error bodies can be enormous HTML pages. nobody needs all of that in a log line.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// 🏗️ Build the process-wide `reqwest::Client`.
///
/// Only the connect timeout lives on the client. Whole-call timeouts wrap each attempt
/// instead, because a 20 GiB parquet shard and a 2 KiB JSON page deserve different patience.
pub(crate) fn build_client(connect_timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!("dsferry/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("💀 The HTTP client refused to be born. Probably the TLS stack, possibly the stars.")
}

/// 🚦 Pass a successful response through; turn anything else into a classified error.
pub(crate) async fn check_response(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    Err(RemoteError::from_status(endpoint, status.as_u16(), body))
}

/// 🚫 Turn a remote-supplied file name into a relative path that cannot escape the
/// staging directory. Absolute paths, `..`, drive prefixes: all refused at the border.
pub(crate) fn safe_relative_path(name: &str) -> Result<PathBuf, FetchError> {
    let path = Path::new(name);
    if name.is_empty() {
        return Err(FetchError::UnsafeName(name.to_string()));
    }
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FetchError::UnsafeName(name.to_string()));
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(FetchError::UnsafeName(name.to_string()));
    }
    Ok(clean)
}

/// 🚧 suffix of a download that has not finished yet
pub(crate) const PART_SUFFIX: &str = ".part";

fn part_path(dest: &Path) -> PathBuf {
    let mut part = dest.as_os_str().to_owned();
    part.push(PART_SUFFIX);
    PathBuf::from(part)
}

fn io_err(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// 🧹 Owns a `.part` file until it is renamed into place.
///
/// Dropping it unrenamed removes the file. That covers the error paths and also a
/// caller's `timeout` dropping the whole download future halfway through the body.
struct PartFile {
    path: PathBuf,
    armed: bool,
}

impl PartFile {
    fn new(dest: &Path) -> Self {
        Self {
            path: part_path(dest),
            armed: true,
        }
    }

    async fn commit(mut self, dest: &Path) -> Result<(), FetchError> {
        tokio::fs::rename(&self.path, dest)
            .await
            .map_err(|e| io_err(dest, e))?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.armed {
            // -- 🧹 best effort. if the part file never existed, there's nothing to mourn.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// 💾 Stream a response body to `dest`.
///
/// Bytes land in `dest.part` first and are renamed into place only once the body is
/// complete, so a crashed, cancelled or timed-out download never masquerades as a
/// finished one. Unless the rename happened, the `.part` file is gone afterwards.
pub(crate) async fn stream_to_file(
    endpoint: &str,
    response: reqwest::Response,
    dest: &Path,
) -> Result<u64, FetchError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;
    }
    let part = PartFile::new(dest);
    let bytes = write_body(endpoint, response, &part.path).await?;
    part.commit(dest).await?;
    trace!("💾 {} bytes landed at {}", bytes, dest.display());
    Ok(bytes)
}

async fn write_body(
    endpoint: &str,
    response: reqwest::Response,
    part: &Path,
) -> Result<u64, FetchError> {
    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(|e| io_err(part, e))?;
    let mut body = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| RemoteError::from_reqwest(endpoint, &e))?;
        file.write_all(&chunk).await.map_err(|e| io_err(part, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| io_err(part, e))?;
    Ok(written)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// 🐌 A server that promises 100 bytes on every request, sends 3, then goes quiet.
    ///
    /// When `listing` is given, requests for a `/list/` path get it in full instead, so a
    /// Kaggle listing can come through before the downloads hang.
    pub(crate) async fn stalling_server(listing: Option<String>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("💀 bind a port");
        let addr = listener.local_addr().expect("💀 local addr");
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let listing = listing.clone();
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    let request_line = String::from_utf8_lossy(&head)
                        .lines()
                        .next()
                        .unwrap_or_default()
                        .to_string();
                    match listing.filter(|_| request_line.contains("/list/")) {
                        Some(body) => {
                            let response = format!(
                                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                                body.len()
                            );
                            let _ = socket.write_all(response.as_bytes()).await;
                        }
                        None => {
                            let _ = socket
                                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\nabc")
                                .await;
                            let _ = socket.flush().await;
                            tokio::time::sleep(Duration::from_secs(60)).await;
                        }
                    }
                });
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn the_one_where_sneaky_names_are_turned_away_at_the_border() {
        assert_eq!(
            safe_relative_path("data/train-0000.parquet").expect("💀 plain path"),
            PathBuf::from("data/train-0000.parquet")
        );
        assert_eq!(
            safe_relative_path("./a.csv").expect("💀 curdir is harmless"),
            PathBuf::from("a.csv")
        );
        for sneaky in ["../etc/passwd", "/etc/passwd", "a/../../b", "", "."] {
            assert!(
                matches!(safe_relative_path(sneaky), Err(FetchError::UnsafeName(_))),
                "'{sneaky}' should have been refused"
            );
        }
    }

    #[tokio::test]
    async fn the_one_where_a_404_body_becomes_a_permanent_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("x".repeat(4096)))
            .mount(&server)
            .await;

        let response = reqwest::get(format!("{}/missing", server.uri()))
            .await
            .expect("💀 mock server should answer");
        match check_response("test", response).await {
            Err(RemoteError::Permanent { status, message, .. }) => {
                assert_eq!(status, 404);
                assert_eq!(message.len(), MAX_ERROR_BODY_CHARS);
            }
            other => panic!("💀 expected a permanent 404, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn the_one_where_the_download_lands_whole_or_not_at_all() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a,b\n1,2\n"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("💀 tempdir");
        let dest = dir.path().join("nested/deeper/file.csv");
        let response = reqwest::get(format!("{}/file.csv", server.uri()))
            .await
            .expect("💀 mock server should answer");

        let bytes = stream_to_file("test", response, &dest)
            .await
            .expect("💀 download should land");

        assert_eq!(bytes, 8);
        assert_eq!(std::fs::read_to_string(&dest).expect("💀 read back"), "a,b\n1,2\n");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn the_one_where_the_server_stalls_mid_body_and_leaves_no_crumbs() {
        let base = stalling_server(None).await;
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let dest = dir.path().join("a.csv");
        let response = reqwest::get(format!("{base}/a.csv"))
            .await
            .expect("💀 headers should arrive");

        let attempt = tokio::time::timeout(
            Duration::from_millis(200),
            stream_to_file("test", response, &dest),
        )
        .await;

        assert!(attempt.is_err(), "the body never finishes, the timeout should win");
        assert!(!part_path(&dest).exists());
        assert!(!dest.exists());
    }
}
