//! # Merge Support
//!
//! Optimistic concurrent editing of shared artifacts. A caller marks an
//! artifact for merge, which snapshots its current value (a codec deep
//! copy). Later, `update` hands the registered [`Merger`] three versions:
//!
//! - `before`: the snapshot taken at mark time,
//! - `after`: the caller's edited value,
//! - `latest`: what is durably stored now, possibly edited by someone else.
//!
//! and stores the merged result.
//!
//! [`JsonMerger`] is a general-purpose three-way merge over the JSON form of
//! a value: object fields merge key by key, numbers merge as deltas, and
//! anything else that changed on both sides takes the caller's edit.
//!
//! Modules are merged too. `update` reaches them only as type-erased values,
//! so every registered merger is also kept in a byte-level form keyed by
//! kind.

use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use depot_core::{AnyDesc, Artifact, CodecError, DynArtifact};

use crate::depot::Modules;

/// Failure inside a [`Merger`].
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("JSON round-trip failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unresolvable conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Three-way merge for one artifact type.
pub trait Merger<X>: Send + Sync {
    fn merge(&self, before: &X, after: &X, latest: &X) -> Result<X, MergeError>;
}

/// Three-way merge of the values' JSON forms.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMerger;

impl<X: Serialize + DeserializeOwned> Merger<X> for JsonMerger {
    fn merge(&self, before: &X, after: &X, latest: &X) -> Result<X, MergeError> {
        let before = serde_json::to_value(before)?;
        let after = serde_json::to_value(after)?;
        let latest = serde_json::to_value(latest)?;
        Ok(serde_json::from_value(merge_json(&before, &after, latest))?)
    }
}

/// Apply the `before → after` edit onto `latest`.
pub fn merge_json(before: &Value, after: &Value, latest: Value) -> Value {
    if after == before {
        return latest;
    }
    if latest == *before {
        return after.clone();
    }
    match (before, after, latest) {
        (Value::Object(b), Value::Object(a), Value::Object(mut l)) => {
            let keys: BTreeSet<&String> = b.keys().chain(a.keys()).collect();
            for key in keys {
                match (b.get(key), a.get(key)) {
                    (Some(bv), Some(av)) if av != bv => {
                        let lv = l.remove(key).unwrap_or(Value::Null);
                        l.insert(key.clone(), merge_json(bv, av, lv));
                    }
                    (None, Some(av)) => {
                        l.insert(key.clone(), av.clone());
                    }
                    (Some(_), None) => {
                        l.remove(key);
                    }
                    _ => {}
                }
            }
            Value::Object(l)
        }
        (Value::Number(b), Value::Number(a), Value::Number(l)) => merge_numbers(b, a, &l)
            .unwrap_or_else(|| Value::Number(a.clone())),
        (_, after, _) => after.clone(),
    }
}

fn merge_numbers(
    before: &serde_json::Number,
    after: &serde_json::Number,
    latest: &serde_json::Number,
) -> Option<Value> {
    if let (Some(b), Some(a), Some(l)) = (before.as_i64(), after.as_i64(), latest.as_i64()) {
        if let Some(n) = a.checked_sub(b).and_then(|d| l.checked_add(d)) {
            return Some(Value::from(n));
        }
    }
    let (b, a, l) = (before.as_f64()?, after.as_f64()?, latest.as_f64()?);
    serde_json::Number::from_f64(l + (a - b)).map(Value::Number)
}

/// A registered [`Merger`] working on encoded values.
pub(crate) trait ErasedMerger: Send + Sync {
    /// Merge the decoded forms and relink the result's own modules.
    fn merge_bytes(
        &self,
        before: &[u8],
        after: &[u8],
        latest: &[u8],
        modules: &Modules<'_>,
    ) -> Result<Arc<dyn DynArtifact>, MergeError>;
}

struct Erased<X>(Arc<dyn Merger<X>>);

impl<X: Artifact> ErasedMerger for Erased<X> {
    fn merge_bytes(
        &self,
        before: &[u8],
        after: &[u8],
        latest: &[u8],
        modules: &Modules<'_>,
    ) -> Result<Arc<dyn DynArtifact>, MergeError> {
        let mut merged = self
            .0
            .merge(&X::decode(before)?, &X::decode(after)?, &X::decode(latest)?)?;
        merged.relink(modules)?;
        Ok(Arc::new(merged))
    }
}

struct Registered {
    typed: Box<dyn Any + Send + Sync>,
    erased: Arc<dyn ErasedMerger>,
}

/// Registered mergers (by artifact kind) and the snapshots taken by
/// `mark_for_merge` (by id).
#[derive(Default)]
pub(crate) struct MergeState {
    mergers: RwLock<HashMap<&'static str, Registered>>,
    snapshots: Mutex<HashMap<String, Vec<u8>>>,
}

impl MergeState {
    pub(crate) fn register<X: Artifact>(&self, merger: Arc<dyn Merger<X>>) {
        let registered = Registered {
            typed: Box::new(Arc::clone(&merger)),
            erased: Arc::new(Erased(merger)),
        };
        self.mergers.write().insert(X::KIND, registered);
    }

    pub(crate) fn merger<X: Artifact>(&self) -> Option<Arc<dyn Merger<X>>> {
        self.mergers
            .read()
            .get(X::KIND)
            .and_then(|m| m.typed.downcast_ref::<Arc<dyn Merger<X>>>())
            .cloned()
    }

    pub(crate) fn erased(&self, kind: &str) -> Option<Arc<dyn ErasedMerger>> {
        self.mergers.read().get(kind).map(|m| Arc::clone(&m.erased))
    }

    /// Snapshot `value` under `desc` and, recursively, every module it
    /// declares. Returns the number of snapshots taken.
    pub(crate) fn snapshot_tree(&self, desc: &AnyDesc, value: &dyn DynArtifact) -> Result<usize, CodecError> {
        let mut seen = HashSet::new();
        self.snapshot_rec(desc, value, &mut seen)?;
        Ok(seen.len())
    }

    fn snapshot_rec(
        &self,
        desc: &AnyDesc,
        value: &dyn DynArtifact,
        seen: &mut HashSet<String>,
    ) -> Result<(), CodecError> {
        if !seen.insert(desc.id().to_string()) {
            return Ok(());
        }
        let bytes = value.encode_dyn()?;
        self.snapshots.lock().insert(desc.id().to_string(), bytes);
        for module in value.modules_dyn() {
            self.snapshot_rec(module.desc(), module.value().as_ref(), seen)?;
        }
        Ok(())
    }

    pub(crate) fn snapshot_of(&self, id: &str) -> Option<Vec<u8>> {
        self.snapshots.lock().get(id).cloned()
    }

    pub(crate) fn replace_snapshot(&self, id: &str, bytes: Vec<u8>) {
        self.snapshots.lock().insert(id.to_string(), bytes);
    }

    pub(crate) fn forget(&self, id: &str) {
        self.snapshots.lock().remove(id);
    }

    pub(crate) fn is_marked(&self, id: &str) -> bool {
        self.snapshots.lock().contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::JsonCodec;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: i64,
        tags: Vec<String>,
    }

    impl Artifact for Profile {
        const KIND: &'static str = "Profile";
        type Codec = JsonCodec;
    }

    fn profile(name: &str, visits: i64) -> Profile {
        Profile {
            name: name.into(),
            visits,
            tags: vec![],
        }
    }

    #[test]
    fn untouched_side_takes_the_other() {
        let base = json!({"a": 1});
        assert_eq!(merge_json(&base, &base, json!({"a": 2})), json!({"a": 2}));
        assert_eq!(merge_json(&base, &json!({"a": 3}), base.clone()), json!({"a": 3}));
    }

    #[test]
    fn disjoint_field_edits_both_survive() {
        let before = json!({"name": "x", "city": "a"});
        let after = json!({"name": "y", "city": "a"});
        let latest = json!({"name": "x", "city": "b"});
        assert_eq!(merge_json(&before, &after, latest), json!({"name": "y", "city": "b"}));
    }

    #[test]
    fn counters_merge_as_deltas() {
        let merged = JsonMerger
            .merge(&profile("p", 10), &profile("p", 13), &profile("p", 15))
            .unwrap();
        assert_eq!(merged.visits, 18);
    }

    #[test]
    fn integer_overflow_falls_back_to_float() {
        let merged = merge_json(&json!(0), &json!(i64::MAX), json!(10));
        let n = merged.as_f64().unwrap();
        assert!(merged.as_i64().is_none());
        assert!(n > 9e18);
    }

    #[test]
    fn added_and_removed_keys() {
        let before = json!({"keep": 1, "drop": 2});
        let after = json!({"keep": 1, "new": 3});
        let latest = json!({"keep": 5, "drop": 2});
        assert_eq!(merge_json(&before, &after, latest), json!({"keep": 5, "new": 3}));
    }

    #[test]
    fn conflicting_scalars_take_the_edit() {
        let merged = merge_json(&json!("a"), &json!("b"), json!("c"));
        assert_eq!(merged, json!("b"));
    }

    #[test]
    fn registry_is_keyed_by_kind() {
        let state = MergeState::default();
        assert!(state.merger::<Profile>().is_none());
        state.register::<Profile>(Arc::new(JsonMerger));
        let merger = state.merger::<Profile>().unwrap();
        let merged = merger
            .merge(&profile("a", 0), &profile("b", 0), &profile("a", 0))
            .unwrap();
        assert_eq!(merged.name, "b");
    }

    #[test]
    fn snapshots_are_deep_copies() {
        let state = MergeState::default();
        let desc = depot_core::Desc::<Profile>::builder("p").build().erase();
        let taken = state.snapshot_tree(&desc, &profile("p", 1)).unwrap();
        assert_eq!(taken, 1);
        assert!(state.is_marked(desc.id()));
        let bytes = state.snapshot_of(desc.id()).unwrap();
        assert_eq!(Profile::decode(&bytes).unwrap(), profile("p", 1));
        state.forget(desc.id());
        assert!(!state.is_marked(desc.id()));
    }
}
