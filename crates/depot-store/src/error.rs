//! # Storage Error Types
//!
//! Structured errors for the storage chain. Uses `thiserror` for ergonomic
//! error definitions with diagnostic context.

use std::path::PathBuf;

use depot_core::CodecError;
use thiserror::Error;

/// Errors from the local store and the layers above it.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A metadata sidecar could not be read or written.
    #[error("bad metadata record at {}: {source}", path.display())]
    Meta {
        /// The sidecar path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Encoding or decoding an artifact failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The id cannot be mapped onto a path.
    #[error("invalid id for local storage: {0}")]
    InvalidId(String),

    /// A remote fetch was required and failed, with no local copy to fall
    /// back on.
    #[error("remote fetch of {id} failed: {source}")]
    Remote {
        /// The id being fetched.
        id: String,
        /// The remote failure.
        source: RemoteError,
    },

    /// Read-only descriptors are never pushed.
    #[error("refusing to push read-only descriptor {0}")]
    ReadOnly(String),

    /// The write-behind queue has been shut down.
    #[error("write-behind queue is shut down")]
    QueueClosed,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from a remote store client.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// HTTP transport error.
    #[error("HTTP error calling {endpoint}: {source}")]
    Http {
        /// Method and URL.
        endpoint: String,
        /// Underlying error.
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        /// Method and URL.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body, if readable.
        body: String,
    },

    /// Response body could not be decoded.
    #[error("failed to decode response from {endpoint}: {source}")]
    Decode {
        /// Method and URL.
        endpoint: String,
        /// Underlying error.
        source: reqwest::Error,
    },

    /// Client misconfiguration (bad URL, bad token header).
    #[error("remote client configuration error: {0}")]
    Config(String),

    /// The remote is unreachable for some other reason.
    #[error("remote unavailable: {0}")]
    Unavailable(String),
}
