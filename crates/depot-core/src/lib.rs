//! # depot-core: Foundational Types for the Depot
//!
//! Descriptors, artifacts and time windows. Every other depot crate builds on
//! these; this crate depends on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Frozen descriptors.** A [`Desc<X>`] is built once by a
//!    [`DescBuilder`] and has no mutators, so its id can never drift.
//!    Equality, hashing and ordering use the id alone.
//!
//! 2. **Typed keys, erased storage.** The artifact type rides along as a
//!    phantom parameter. Stores see [`AnyDesc`] and bytes; the facade
//!    restores types at its boundary.
//!
//! 3. **No floats in ids.** Float properties are rejected at the builder.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `depot-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod artifact;
pub mod blob;
pub mod desc;
pub mod digest;
pub mod error;
pub mod temporal;

// Re-export primary types for ergonomic imports.
pub use artifact::{arc_addr, Artifact, Codec, DynArtifact, JsonCodec, Module, ModuleRef, Resolver};
pub use blob::{Blob, BytesCodec};
pub use desc::{AnyDesc, Desc, DescBuilder, IntoPropValue, PropValue, Server, Untyped};
pub use digest::sha256_hex;
pub use error::{CodecError, DescError};
pub use temporal::{Clock, ManualClock, SystemClock, TimeRange};
