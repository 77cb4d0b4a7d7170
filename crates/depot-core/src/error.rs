//! # Error Types
//!
//! Errors raised while building descriptors and while encoding or decoding
//! artifacts. All errors use `thiserror`; nothing in this crate panics on
//! bad input.

use thiserror::Error;

/// Errors raised by [`DescBuilder`](crate::desc::DescBuilder).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescError {
    /// A property was already set to a different value.
    ///
    /// Descriptor properties are write-once: setting a key again to an equal
    /// value is a no-op, anything else is a programming error.
    #[error("cannot overwrite property {key}={old} with {new} in {name}")]
    ConflictingProperty {
        /// Descriptor name (for diagnostics).
        name: String,
        /// The property key.
        key: String,
        /// The value already present.
        old: String,
        /// The rejected value.
        new: String,
    },

    /// Property keys end up in file paths and are length limited.
    #[error("property key too long: {len} chars (max {max}): {key}")]
    KeyTooLong {
        /// The offending key.
        key: String,
        /// Its length.
        len: usize,
        /// The limit.
        max: usize,
    },

    /// Exposed (non-hashed) property values end up in file paths.
    #[error("property value for {key} too long: {len} chars (max {max})")]
    ValueTooLong {
        /// The key whose value was rejected.
        key: String,
        /// Its length.
        len: usize,
        /// The limit.
        max: usize,
    },

    /// Float values have no stable textual form and cannot be part of an id.
    #[error("float values are not permitted in descriptor properties; use a string or integer for {key}: {value}")]
    FloatRejected {
        /// The key whose value was rejected.
        key: String,
        /// The float, as rendered by `Display`.
        value: String,
    },

    /// A time range whose end precedes its start.
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange {
        /// Range start (RFC 3339).
        start: String,
        /// Range end (RFC 3339).
        end: String,
    },

    /// A version stamp could not be serialized.
    #[error("version stamp serialization failed: {0}")]
    VersionStamp(String),
}

/// Errors raised while turning artifacts into bytes and back.
#[derive(Error, Debug)]
pub enum CodecError {
    /// JSON encoding or decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bytes were not valid UTF-8 where text was required.
    #[error("invalid UTF-8 in artifact data: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The artifact type does not support the requested operation
    /// (e.g. joining ranged slices).
    #[error("{kind} does not support {operation}")]
    Unsupported {
        /// Artifact kind.
        kind: &'static str,
        /// Operation name.
        operation: &'static str,
    },

    /// A module could not be loaded while relinking its parent.
    #[error("module {id} could not be loaded")]
    Module {
        /// Module descriptor id.
        id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Any other codec-specific failure.
    #[error("codec error: {0}")]
    Other(String),
}
