//! # Facade Errors
//!
//! [`DepotError`] wraps the lower layers' errors with `#[from]` and adds the
//! contract violations only the facade can detect.

use thiserror::Error;

use depot_core::{CodecError, DescError};
use depot_store::{RemoteError, StoreError};

/// Errors surfaced by [`Depot`](crate::Depot).
#[derive(Error, Debug)]
pub enum DepotError {
    /// A write-once artifact already has a different value.
    #[error("{id} already holds a different value and its kind is not overwritable")]
    Overwrite {
        /// Descriptor id.
        id: String,
    },

    /// Put through a read-only descriptor.
    #[error("{0} is read-only")]
    ReadOnly(String),

    /// Alias without the symlink flag, chained target, or self-link.
    #[error("symlink misuse: {0}")]
    Symlink(String),

    /// The value bound to an id is not of the requested kind.
    #[error("{id} holds a {found}, not a {expected}")]
    KindMismatch {
        /// Descriptor id.
        id: String,
        /// Kind the caller asked for.
        expected: &'static str,
        /// Kind actually bound or stored.
        found: String,
    },

    /// `update` called without a prior `mark_for_merge`.
    #[error("{0} was not marked for merge")]
    NotMarkedForMerge(String),

    /// No merger is registered for the artifact's kind.
    #[error("no merger registered for kind {0}")]
    NoMerger(&'static str),

    /// The registered merger failed.
    #[error("merge failed for {id}")]
    Merge {
        /// Descriptor id.
        id: String,
        #[source]
        source: crate::merge::MergeError,
    },

    /// Invalid depot configuration.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Desc(#[from] DescError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}
