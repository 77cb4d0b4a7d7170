//! # Identity Cache
//!
//! Maps descriptor ids to live artifact values and values back to their
//! descriptors. While a binding lives, every lookup of an id returns the
//! same `Arc`, which is what lets independent callers share one in-memory
//! object per stored artifact.
//!
//! ## Reclamation
//!
//! Values are held as `Weak` references: an entry dies with the last
//! external `Arc` and is swept by [`DescCache::prune`], which also runs
//! automatically whenever the map doubles in size. The reverse map is keyed
//! by allocation address and is only trusted after checking the forward
//! binding still points at a live value with that address.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use depot_core::{arc_addr, AnyDesc, Artifact, Desc, DynArtifact};

use crate::error::DepotError;

const PRUNE_FLOOR: usize = 256;

struct Binding {
    value: Weak<dyn Any + Send + Sync>,
    addr: usize,
    kind: &'static str,
    desc: AnyDesc,
}

impl Binding {
    fn is_live(&self) -> bool {
        self.value.strong_count() > 0
    }
}

struct Maps {
    by_id: HashMap<String, Binding>,
    by_addr: HashMap<usize, String>,
    prune_at: usize,
}

impl Maps {
    fn prune(&mut self) -> usize {
        let before = self.by_id.len();
        self.by_id.retain(|_, b| b.is_live());
        let by_id = &self.by_id;
        self.by_addr
            .retain(|addr, id| by_id.get(id).is_some_and(|b| b.addr == *addr));
        before - self.by_id.len()
    }
}

/// Bidirectional id ⇄ value map with weak values.
pub struct DescCache {
    maps: RwLock<Maps>,
}

impl Default for DescCache {
    fn default() -> Self {
        Self {
            maps: RwLock::new(Maps {
                by_id: HashMap::new(),
                by_addr: HashMap::new(),
                prune_at: PRUNE_FLOOR,
            }),
        }
    }
}

impl std::fmt::Debug for DescCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescCache").field("len", &self.len()).finish()
    }
}

impl DescCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live value bound to `desc`, if any.
    ///
    /// A live value of another kind is a [`DepotError::KindMismatch`].
    pub fn get_artifact<X: Artifact>(&self, desc: &Desc<X>) -> Result<Option<Arc<X>>, DepotError> {
        if desc.is_symlink() {
            return Ok(None);
        }
        let maps = self.maps.read();
        let Some(binding) = maps.by_id.get(desc.id()) else {
            return Ok(None);
        };
        let Some(value) = binding.value.upgrade() else {
            return Ok(None);
        };
        value.downcast::<X>().map(Some).map_err(|_| DepotError::KindMismatch {
            id: desc.id().to_string(),
            expected: X::KIND,
            found: binding.kind.to_string(),
        })
    }

    /// Bind `value` to `desc`. Returns true if the binding changed.
    ///
    /// Symlink descriptors are never bound.
    pub fn bind<X: Artifact>(&self, desc: &Desc<X>, value: &Arc<X>) -> bool {
        if desc.is_symlink() {
            return false;
        }
        let any: Arc<dyn Any + Send + Sync> = value.clone();
        self.bind_any(desc.erase(), any, X::KIND)
    }

    /// [`bind`](Self::bind) for a type-erased module value.
    pub fn bind_dyn(&self, desc: &AnyDesc, value: &Arc<dyn DynArtifact>) -> bool {
        if desc.is_symlink() {
            return false;
        }
        let kind = value.kind();
        self.bind_any(desc.clone(), value.clone().into_any(), kind)
    }

    fn bind_any(&self, desc: AnyDesc, value: Arc<dyn Any + Send + Sync>, kind: &'static str) -> bool {
        let addr = arc_addr(&value);
        let mut guard = self.maps.write();
        let maps = &mut *guard;
        if let Some(old) = maps.by_id.get(desc.id()) {
            if old.addr == addr && old.is_live() {
                return false;
            }
            if maps.by_addr.get(&old.addr).map(String::as_str) == Some(desc.id()) {
                maps.by_addr.remove(&old.addr);
            }
        }
        let id = desc.id().to_string();
        maps.by_addr.insert(addr, id.clone());
        maps.by_id.insert(
            id,
            Binding {
                value: Arc::downgrade(&value),
                addr,
                kind,
                desc,
            },
        );
        if maps.by_id.len() >= maps.prune_at {
            let swept = maps.prune();
            maps.prune_at = (maps.by_id.len() * 2).max(PRUNE_FLOOR);
            tracing::trace!(swept, live = maps.by_id.len(), "pruned identity cache");
        }
        true
    }

    /// Forget whatever is bound to `desc`.
    pub fn unbind<X>(&self, desc: &Desc<X>) {
        let mut guard = self.maps.write();
        let maps = &mut *guard;
        if let Some(old) = maps.by_id.remove(desc.id()) {
            if maps.by_addr.get(&old.addr).map(String::as_str) == Some(desc.id()) {
                maps.by_addr.remove(&old.addr);
            }
        }
    }

    /// The descriptor `value` is bound under, falling back to the value's
    /// own [`Artifact::self_desc`].
    pub fn get_description<X: Artifact>(&self, value: &Arc<X>) -> Option<Desc<X>> {
        let addr = arc_addr(value);
        {
            let maps = self.maps.read();
            let bound = maps
                .by_addr
                .get(&addr)
                .and_then(|id| maps.by_id.get(id))
                .filter(|b| b.addr == addr && b.is_live());
            if let Some(binding) = bound {
                return binding.desc.downcast::<X>();
            }
        }
        value.self_desc()
    }

    /// Drop every binding.
    pub fn clear(&self) {
        let mut maps = self.maps.write();
        maps.by_id.clear();
        maps.by_addr.clear();
        maps.prune_at = PRUNE_FLOOR;
    }

    /// Bindings currently held, dead ones included until pruned.
    pub fn len(&self) -> usize {
        self.maps.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep bindings whose value has been dropped. Returns how many went.
    pub fn prune(&self) -> usize {
        self.maps.write().prune()
    }
}
