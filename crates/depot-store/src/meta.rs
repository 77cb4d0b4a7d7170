//! # Metadata Records
//!
//! Every stored artifact has a JSON sidecar `<path>.meta` recording the
//! descriptor it was stored under. Sidecars let the store enumerate its
//! contents as descriptors ([`Store::load_keys`](crate::Store::load_keys))
//! and back the freshness check.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use depot_core::AnyDesc;
use serde::{Deserialize, Serialize};

/// Local bookkeeping for one stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaData {
    /// The descriptor the artifact was stored under.
    pub desc: AnyDesc,
    /// Where the bytes live.
    pub path: PathBuf,
    /// Size on disk in bytes.
    pub size: u64,
    /// When the bytes were written.
    pub stored_at: DateTime<Utc>,
}

impl MetaData {
    /// Time since the artifact was stored. Negative ages clamp to zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// True if the record is younger than `max_age`. No limit means fresh.
    pub fn is_fresh(&self, max_age: Option<Duration>, now: DateTime<Utc>) -> bool {
        match max_age {
            Some(limit) => self.age(now) < limit,
            None => true,
        }
    }
}
