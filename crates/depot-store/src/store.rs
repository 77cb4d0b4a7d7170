//! The byte-level storage interface shared by every layer of the chain.

use std::path::PathBuf;

use depot_core::{AnyDesc, TimeRange};

use crate::error::StoreError;
use crate::meta::MetaData;

/// One stored slice of a ranged artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    /// The window this slice covers.
    pub range: TimeRange,
    /// Its encoded bytes.
    pub bytes: Vec<u8>,
}

/// Persistent storage keyed by descriptor.
///
/// Stores deal in encoded bytes; codecs live with the artifact types.
pub trait Store: Send + Sync {
    /// Read the artifact stored under exactly this descriptor.
    fn get(&self, desc: &AnyDesc) -> Result<Option<Vec<u8>>, StoreError>;

    /// Read every slice whose window intersects `desc`'s range, sorted
    /// chronologically. A descriptor without a range yields no slices.
    fn get_range(&self, desc: &AnyDesc) -> Result<Vec<Slice>, StoreError>;

    /// Write `bytes` under `desc`, replacing any previous value.
    fn put(&self, desc: &AnyDesc, bytes: &[u8]) -> Result<(), StoreError>;

    /// Delete the artifact. Deleting something absent is not an error.
    fn remove(&self, desc: &AnyDesc) -> Result<(), StoreError>;

    /// True if something is stored under `desc`.
    fn contains(&self, desc: &AnyDesc) -> Result<bool, StoreError>;

    /// Bookkeeping for the stored artifact, if any.
    fn metadata(&self, desc: &AnyDesc) -> Result<Option<MetaData>, StoreError>;

    /// Every stored descriptor that `partial` matches.
    fn load_keys(&self, partial: &AnyDesc) -> Result<Vec<AnyDesc>, StoreError>;

    /// Where `desc` lives (or would live) on local disk.
    fn local_path(&self, desc: &AnyDesc) -> Option<PathBuf>;
}
