//! # depot-store: The Storage Chain
//!
//! Durable storage for depot artifacts, in three layers:
//!
//! - [`FileStore`]: the leaf. Maps descriptor ids onto paths, writes
//!   atomically, keeps a metadata sidecar per artifact, stores ranged
//!   artifacts as per-window slices.
//! - [`RemoteStore`]: wraps a `FileStore` with a best-effort remote mirror,
//!   reached through a [`RemoteClient`] ([`HttpRemoteClient`] in production).
//! - [`WriteBehind`]: a queue in front of either, so callers never wait for
//!   durable writes.
//!
//! Every layer speaks the byte-level [`Store`] trait; codecs belong to the
//! artifact types in `depot-core`.
//!
//! ## Crate Policy
//!
//! - Depends only on `depot-core` internally.
//! - Blocking API. [`RemoteStore`] owns its own async runtime and must not be
//!   driven from inside another one.

pub mod error;
pub mod file;
pub mod http;
pub mod meta;
pub mod remote;
pub(crate) mod retry;
pub mod store;
pub mod write_behind;

pub use error::{RemoteError, StoreError};
pub use file::FileStore;
pub use http::{HttpRemoteClient, HttpRemoteConfig};
pub use meta::MetaData;
pub use remote::{RemoteClient, RemoteStore, RemoteStoreConfig};
pub use store::{Slice, Store};
pub use write_behind::{WriteBehind, WriteBehindConfig, WriteOp};
