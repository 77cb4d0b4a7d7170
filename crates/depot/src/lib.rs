//! # depot: Identity-Preserving Artifact Cache
//!
//! Applications describe artifacts with typed descriptors ([`Desc<X>`]) and
//! read and write them through a [`Depot`]. The depot guarantees that equal
//! descriptors observe the same in-memory value while anyone holds it, and
//! persists writes in the background through a local store, optionally
//! mirrored to remote hosts.
//!
//! ## Modules
//!
//! - **Depot** (`depot.rs`): the facade. `get`, `put`, `put_if_absent`,
//!   `put_symlink`, `remove`, merge commit via `mark_for_merge`/`update`.
//!
//! - **Cache** (`cache.rs`): the id ⇄ value identity map with weak values.
//!
//! - **Lock** (`lock.rs`): per-id re-entrant mutexes.
//!
//! - **Merge** (`merge.rs`): the [`Merger`] collaborator and the default
//!   three-way [`JsonMerger`].
//!
//! - **Config** (`config.rs`): defaults, YAML file, environment overrides.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use depot::{Blob, Depot, DepotConfig, Desc};
//!
//! # fn main() -> Result<(), depot::DepotError> {
//! let depot = Depot::open(DepotConfig::local("/tmp/depot"))?;
//! let desc: Desc<Blob> = Desc::builder("stopwords.txt")
//!     .tag("nlp")
//!     .put("lang", "en")?
//!     .build();
//! depot.put(&desc, Arc::new(Blob::from("the\na\n")))?;
//! let again = depot.get(&desc)?;
//! assert!(again.is_some());
//! depot.flush();
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod depot;
pub mod error;
pub mod lock;
pub mod merge;

pub use crate::depot::{Depot, SymLink, QUARANTINE_TAG};
pub use cache::DescCache;
pub use config::{ConfigError, DepotConfig, LoadErrorPolicy, RemoteConfig};
pub use error::DepotError;
pub use lock::{KeyGuard, KeyLock};
pub use merge::{merge_json, JsonMerger, MergeError, Merger};

pub use depot_core::{
    AnyDesc, Artifact, Blob, Clock, Codec, CodecError, Desc, DescBuilder, JsonCodec, Module,
    ModuleRef, PropValue, Resolver, Server, TimeRange,
};
pub use depot_store::{MetaData, RemoteClient, Store};
