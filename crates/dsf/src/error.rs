//! 💀 Errors we actually `match` on.
//!
//! Everything else in dsferry rides `anyhow` with a `.context()` string. These few
//! enums are the exception: the pager, the downloaders and the request parser need to
//! know *what kind* of sad they are before deciding whether to sleep, retry, or give up.
//!
//! 🧠 Classification comes from the HTTP status code, never from squinting at error text.
//! "429" appearing in a message body is a coincidence. 429 in `status()` is a lifestyle.

use std::path::PathBuf;

use thiserror::Error;

/// 📡 Something went wrong on the other side of a socket.
///
/// | variant       | retried? | examples                          |
/// |---------------|----------|-----------------------------------|
/// | `RateLimited` | yes      | 429                               |
/// | `Transient`   | yes      | 408, 5xx, timeouts, refused conns |
/// | `Permanent`   | no       | 401, 403, 404, any other 4xx      |
/// | `Malformed`   | no       | 200 with a body we can't decode   |
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("🐢 {endpoint} is rate limiting us (HTTP 429)")]
    RateLimited { endpoint: String },

    #[error("🌩️ transient failure talking to {endpoint}: {message}")]
    Transient {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    #[error("💀 {endpoint} said no (HTTP {status}): {message}")]
    Permanent {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("🤷 could not make sense of the response from {endpoint}: {message}")]
    Malformed { endpoint: String, message: String },
}

impl RemoteError {
    /// 🏷️ Sort a non-success HTTP status into the right bucket.
    pub fn from_status(endpoint: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        match status {
            429 => Self::RateLimited { endpoint },
            408 | 500..=599 => Self::Transient {
                endpoint,
                status: Some(status),
                message: body.into(),
            },
            _ => Self::Permanent {
                endpoint,
                status,
                message: body.into(),
            },
        }
    }

    /// 🔌 Classify a transport-level `reqwest` failure.
    ///
    /// If reqwest carries a status (from `error_for_status`), that wins. Decode errors are
    /// our problem, not the network's. Everything else (timeouts, DNS, refused connections,
    /// a body stream cut in half) is assumed to be worth another go.
    pub fn from_reqwest(endpoint: impl Into<String>, err: &reqwest::Error) -> Self {
        let endpoint = endpoint.into();
        if let Some(status) = err.status() {
            return Self::from_status(endpoint, status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return Self::Malformed {
                endpoint,
                message: err.to_string(),
            };
        }
        Self::Transient {
            endpoint,
            status: None,
            message: err.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// 🔢 The HTTP status behind the failure, when there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Transient { status, .. } => *status,
            Self::Permanent { status, .. } => Some(*status),
            Self::Malformed { .. } => None,
        }
    }
}

/// 📥 Failure while pulling a single remote file onto the staging mount.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("💾 local write to '{path}' failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 🚫 absolute paths and `..` segments stay on the other side of the border
    #[error("🚫 refusing to write remote file '{0}' outside the staging directory")]
    UnsafeName(String),

    #[error("🛑 cancelled before '{0}' was fetched")]
    Cancelled(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(remote) => remote.is_retryable(),
            Self::Io { .. } | Self::UnsafeName(_) | Self::Cancelled(_) => false,
        }
    }
}

/// 🔁 Anything the retry helpers know how to judge.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        RemoteError::is_retryable(self)
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        FetchError::is_retryable(self)
    }
}

/// 🚪 Rejected at the door, before a single byte moved.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("dataset '{0}' must look like 'owner/name' (letters, digits, '_' and '-' only)")]
    MalformedDataset(String),

    #[error("destination suffix '{0}' must not start or end with '/'")]
    SuffixEdgeSlash(String),

    #[error("destination suffix '{0}' must not contain empty, '.' or '..' segments")]
    SuffixSegments(String),

    #[error("unknown dataset source '{0}', expected 'huggingface' or 'kaggle'")]
    UnknownSource(String),
}
