//! # Depot Facade
//!
//! [`Depot`] is the one object applications talk to. It layers:
//!
//! ```text
//!   get/put ──► KeyLock (per id) ──► DescCache (identity)
//!                                      │ miss
//!                                      ▼
//!                 WriteBehind.pending() (read-your-writes)
//!                                      │ miss
//!                                      ▼
//!                 Store: FileStore, or RemoteStore over FileStore
//! ```
//!
//! Writes bind the value in the cache immediately and reach the store
//! through the write-behind queue. Loaded values get their module
//! references relinked through [`Depot::get`], so modules shared by several
//! parents come back as one instance. The queue holds a strong reference to
//! each value until it is durable, so a value written and then dropped by
//! every caller is still found by the next `get`.
//!
//! ## Threading
//!
//! Every check-then-act sequence on an id runs under that id's re-entrant
//! lock. Callers needing a larger atomic section (read, modify, write back)
//! take the same lock through [`Depot::lock`].
//!
//! The API is blocking. When remote replication is configured the depot
//! owns a tokio runtime, so it must not be opened or used from inside an
//! async context.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use depot_core::{AnyDesc, Artifact, CodecError, Desc, DynArtifact, JsonCodec, Module, Resolver, Server};
use depot_store::{
    FileStore, HttpRemoteClient, MetaData, RemoteClient, RemoteStore, Store, WriteBehind, WriteOp,
};

use crate::cache::DescCache;
use crate::config::{DepotConfig, LoadErrorPolicy};
use crate::error::DepotError;
use crate::lock::{KeyGuard, KeyLock};
use crate::merge::{MergeState, Merger};

/// Tag that undecodable artifacts are moved under.
pub const QUARANTINE_TAG: &str = "error";

/// Link record persisted under a symlink alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymLink {
    pub target: AnyDesc,
}

impl Artifact for SymLink {
    const KIND: &'static str = "SymLink";
    type Codec = JsonCodec;
}

/// Identity-preserving artifact cache over a write-behind store.
pub struct Depot {
    config: DepotConfig,
    cache: DescCache,
    locks: KeyLock,
    queue: WriteBehind,
    remote: Option<Arc<RemoteStore>>,
    merges: MergeState,
}

impl std::fmt::Debug for Depot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Depot")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Depot {
    /// Open a depot as configured: a local store under `config.dir`,
    /// mirrored to remote hosts over HTTP when `config.remote` is set.
    pub fn open(config: DepotConfig) -> Result<Self, DepotError> {
        config.validate()?;
        let local = FileStore::open(&config.dir)?;
        match &config.remote {
            None => Self::assemble(config, Arc::new(local), None),
            Some(remote) => {
                let client = HttpRemoteClient::new(remote.into())?;
                Self::with_remote(config, local, Arc::new(client))
            }
        }
    }

    /// Open a remote-backed depot with an explicit remote client.
    pub fn with_remote(
        config: DepotConfig,
        local: FileStore,
        client: Arc<dyn RemoteClient>,
    ) -> Result<Self, DepotError> {
        config.validate()?;
        let remote = Arc::new(RemoteStore::new(local, client, config.remote_store())?);
        let store: Arc<dyn Store> = remote.clone();
        Self::assemble(config, store, Some(remote))
    }

    /// Open a depot over any [`Store`].
    pub fn with_store(config: DepotConfig, store: Arc<dyn Store>) -> Result<Self, DepotError> {
        config.validate()?;
        Self::assemble(config, store, None)
    }

    fn assemble(
        config: DepotConfig,
        store: Arc<dyn Store>,
        remote: Option<Arc<RemoteStore>>,
    ) -> Result<Self, DepotError> {
        let queue = WriteBehind::start(store, config.write_behind())?;
        tracing::info!(
            dir = %config.dir.display(),
            host = %config.host,
            remote = remote.is_some(),
            "depot open"
        );
        Ok(Self {
            config,
            cache: DescCache::new(),
            locks: KeyLock::new(),
            queue,
            remote,
            merges: MergeState::default(),
        })
    }

    /// Drain pending writes, stop the workers and wait for replication.
    pub fn close(self) {
        self.queue.shutdown();
        if let Some(remote) = &self.remote {
            remote.wait_idle();
        }
        tracing::info!(dir = %self.config.dir.display(), "depot closed");
    }

    pub fn config(&self) -> &DepotConfig {
        &self.config
    }

    /// The in-memory identity cache. Clearing it simulates a restart.
    pub fn cache(&self) -> &DescCache {
        &self.cache
    }

    fn store(&self) -> &Arc<dyn Store> {
        self.queue.store()
    }

    /// Hold `desc`'s id until the guard drops. Re-entrant, so the holder may
    /// keep calling the depot for the same id.
    pub fn lock<X>(&self, desc: &Desc<X>) -> KeyGuard {
        self.locks.lock(desc.id())
    }

    /// The artifact for `desc`, or `None` if nothing is stored.
    ///
    /// Lookup order: identity cache, then pending writes, then the store. A
    /// symlink descriptor resolves to its target. A descriptor with a time
    /// range joins every stored slice overlapping it and filters the result
    /// to the range; such composites are not bound in the cache.
    pub fn get<X: Artifact>(&self, desc: &Desc<X>) -> Result<Option<Arc<X>>, DepotError> {
        let _guard = self.locks.lock(desc.id());
        if desc.is_symlink() {
            return self.resolve_symlink(desc);
        }
        if let Some(value) = self.cache.get_artifact(desc)? {
            metrics::counter!("depot_cache_hits_total", "source" => "cache").increment(1);
            return Ok(Some(value));
        }
        match self.queue.pending(desc.id()) {
            Some(WriteOp::Remove) => {
                metrics::counter!("depot_misses_total").increment(1);
                return Ok(None);
            }
            Some(WriteOp::Put(queued)) => {
                let value = downcast_queued::<X>(desc.id(), queued)?;
                self.cache.bind(desc, &value);
                metrics::counter!("depot_cache_hits_total", "source" => "queue").increment(1);
                return Ok(Some(value));
            }
            None => {}
        }
        match desc.range() {
            Some(range) => self.load_range(desc, range),
            None => self.load(desc),
        }
    }

    fn load<X: Artifact>(&self, desc: &Desc<X>) -> Result<Option<Arc<X>>, DepotError> {
        let Some(bytes) = self.store().get(&desc.erase())? else {
            metrics::counter!("depot_misses_total").increment(1);
            return Ok(None);
        };
        let mut value = match X::decode(&bytes) {
            Ok(value) => value,
            Err(error) => return self.on_load_error(&desc.erase(), &bytes, error).map(|()| None),
        };
        value.relink(&Modules(self))?;
        let value = Arc::new(value);
        self.cache.bind(desc, &value);
        metrics::counter!("depot_loads_total", "kind" => X::KIND).increment(1);
        tracing::debug!(id = %desc, bytes = bytes.len(), "loaded");
        Ok(Some(value))
    }

    fn load_range<X: Artifact>(
        &self,
        desc: &Desc<X>,
        range: &depot_core::TimeRange,
    ) -> Result<Option<Arc<X>>, DepotError> {
        // Slices still queued would be invisible to the store scan.
        if !self.queue.is_empty() {
            self.queue.flush();
        }
        let slices = self.store().get_range(&desc.erase())?;
        if slices.is_empty() {
            metrics::counter!("depot_misses_total").increment(1);
            return Ok(None);
        }
        let count = slices.len();
        let parts = slices
            .iter()
            .map(|slice| X::decode(&slice.bytes))
            .collect::<Result<Vec<_>, _>>()?;
        let mut value = X::join(parts)?.filter(range)?;
        value.relink(&Modules(self))?;
        metrics::counter!("depot_loads_total", "kind" => X::KIND).increment(1);
        tracing::debug!(id = %desc, slices = count, "joined ranged slices");
        Ok(Some(Arc::new(value)))
    }

    fn on_load_error(&self, desc: &AnyDesc, bytes: &[u8], error: CodecError) -> Result<(), DepotError> {
        if self.config.load_errors == LoadErrorPolicy::Propagate {
            return Err(error.into());
        }
        let target = desc.derive().tag(QUARANTINE_TAG).server(Server::Local).build();
        self.store().put(&target, bytes)?;
        self.store().remove(desc)?;
        metrics::counter!("depot_quarantined_total", "kind" => desc.kind().to_string()).increment(1);
        tracing::error!(id = %desc, moved_to = %target, error = %error, "undecodable artifact quarantined");
        Ok(())
    }

    fn resolve_symlink<X: Artifact>(&self, alias: &Desc<X>) -> Result<Option<Arc<X>>, DepotError> {
        let link = match self.queue.pending(alias.id()) {
            Some(WriteOp::Remove) => None,
            Some(WriteOp::Put(queued)) => Some(downcast_queued::<SymLink>(alias.id(), queued)?),
            None => match self.store().get(&alias.erase())? {
                Some(bytes) => Some(Arc::new(SymLink::decode(&bytes)?)),
                None => None,
            },
        };
        let Some(link) = link else {
            return Ok(None);
        };
        let target = link
            .target
            .downcast::<X>()
            .ok_or_else(|| DepotError::KindMismatch {
                id: link.target.id().to_string(),
                expected: X::KIND,
                found: link.target.kind().to_string(),
            })?;
        if target.is_symlink() {
            return Err(DepotError::Symlink(format!(
                "{alias} points at another symlink {target}"
            )));
        }
        self.get(&target)
    }

    /// Store `value` under `desc`.
    ///
    /// The value is bound at once and written behind. Declared modules are
    /// stored under their own descriptors. Fails with
    /// [`DepotError::Overwrite`] if the kind is write-once and a different
    /// value is already visible.
    pub fn put<X: Artifact>(&self, desc: &Desc<X>, value: Arc<X>) -> Result<(), DepotError> {
        if desc.is_symlink() {
            return Err(DepotError::Symlink(format!(
                "{desc} is a symlink descriptor; use put_symlink"
            )));
        }
        if desc.is_read_only() {
            return Err(DepotError::ReadOnly(desc.id().to_string()));
        }
        let _guard = self.locks.lock(desc.id());
        if !X::OVERWRITABLE {
            if let Some(existing) = self.get(desc)? {
                if !Arc::ptr_eq(&existing, &value) && existing.encode()? != value.encode()? {
                    return Err(DepotError::Overwrite {
                        id: desc.id().to_string(),
                    });
                }
            }
        }
        self.cache.bind(desc, &value);
        self.queue.submit(&desc.erase(), WriteOp::Put(value.clone()))?;
        tracing::debug!(id = %desc, "queued put");
        let mut seen = HashSet::from([desc.id().to_string()]);
        self.put_modules(value.modules(), &mut seen)
    }

    fn put_modules(&self, modules: Vec<Module>, seen: &mut HashSet<String>) -> Result<(), DepotError> {
        for module in modules {
            let desc = module.desc();
            if !seen.insert(desc.id().to_string()) {
                continue;
            }
            if desc.is_read_only() {
                tracing::trace!(id = %desc, "skipping read-only module");
                continue;
            }
            match self.put_dyn(desc, module.value()) {
                Ok(()) => self.put_modules(module.value().modules_dyn(), seen)?,
                Err(e) if self.config.allow_module_errors => {
                    tracing::warn!(id = %desc, error = %e, "module not stored");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn put_dyn(&self, desc: &AnyDesc, value: &Arc<dyn DynArtifact>) -> Result<(), DepotError> {
        let _guard = self.locks.lock(desc.id());
        if !value.overwritable() {
            if let Some(existing) = self.visible_bytes(desc)? {
                if existing != value.encode_dyn()? {
                    return Err(DepotError::Overwrite {
                        id: desc.id().to_string(),
                    });
                }
            }
        }
        self.cache.bind_dyn(desc, value);
        self.queue.submit(desc, WriteOp::Put(value.clone()))?;
        tracing::debug!(id = %desc, kind = value.kind(), "queued module put");
        Ok(())
    }

    /// Encoded form of whatever is visible for `desc`: a pending write, else
    /// the stored bytes. Every bound value is one of these until evicted.
    fn visible_bytes(&self, desc: &AnyDesc) -> Result<Option<Vec<u8>>, DepotError> {
        match self.queue.pending(desc.id()) {
            Some(WriteOp::Remove) => Ok(None),
            Some(WriteOp::Put(queued)) => Ok(Some(queued.encode_dyn()?)),
            None => Ok(self.store().get(desc)?),
        }
    }

    /// Store `candidate` unless a value is already visible.
    ///
    /// Returns the existing value, or `None` when `candidate` was stored.
    /// Concurrent callers for one id see exactly one winner.
    pub fn put_if_absent<X: Artifact>(
        &self,
        desc: &Desc<X>,
        candidate: Arc<X>,
    ) -> Result<Option<Arc<X>>, DepotError> {
        let _guard = self.locks.lock(desc.id());
        if let Some(existing) = self.get(desc)? {
            return Ok(Some(existing));
        }
        self.put(desc, candidate)?;
        Ok(None)
    }

    /// The value for `desc`, computing and storing it on a miss.
    pub fn get_or_compute<X: Artifact>(
        &self,
        desc: &Desc<X>,
        compute: impl FnOnce() -> X,
    ) -> Result<Arc<X>, DepotError> {
        self.try_get_or_compute(desc, || Ok::<_, DepotError>(compute()))
    }

    /// [`get_or_compute`](Self::get_or_compute) with a fallible computation.
    pub fn try_get_or_compute<X: Artifact, E: From<DepotError>>(
        &self,
        desc: &Desc<X>,
        compute: impl FnOnce() -> Result<X, E>,
    ) -> Result<Arc<X>, E> {
        let _guard = self.locks.lock(desc.id());
        if let Some(existing) = self.get(desc)? {
            return Ok(existing);
        }
        let value = Arc::new(compute()?);
        self.put(desc, value.clone())?;
        Ok(value)
    }

    /// Make `alias` resolve to `target`.
    ///
    /// `alias` must carry the symlink flag and `target` must not: links are
    /// one hop.
    pub fn put_symlink<X: Artifact>(&self, alias: &Desc<X>, target: &Desc<X>) -> Result<(), DepotError> {
        if !alias.is_symlink() {
            return Err(DepotError::Symlink(format!("{alias} is not flagged as a symlink")));
        }
        if target.is_symlink() {
            return Err(DepotError::Symlink(format!(
                "{target} is itself a symlink; links are one hop"
            )));
        }
        if alias.id() == target.id() {
            return Err(DepotError::Symlink(format!("{alias} would link to itself")));
        }
        let _guard = self.locks.lock(alias.id());
        let link = SymLink {
            target: target.erase(),
        };
        self.queue.submit(&alias.erase(), WriteOp::Put(Arc::new(link)))?;
        tracing::debug!(alias = %alias, target = %target, "queued symlink");
        Ok(())
    }

    /// Remove whatever is stored under `desc`. For a symlink this removes
    /// the alias only.
    pub fn remove<X>(&self, desc: &Desc<X>) -> Result<(), DepotError> {
        let _guard = self.locks.lock(desc.id());
        self.cache.unbind(desc);
        self.merges.forget(desc.id());
        self.queue.submit(&desc.erase(), WriteOp::Remove)?;
        tracing::debug!(id = %desc, "queued remove");
        Ok(())
    }

    /// Remove `value` and, recursively, its modules. Returns false when
    /// `value` has no known descriptor.
    pub fn remove_all<X: Artifact>(&self, value: &Arc<X>) -> Result<bool, DepotError> {
        let Some(desc) = self.desc_of(value) else {
            return Ok(false);
        };
        self.remove(&desc)?;
        let mut seen = HashSet::from([desc.id().to_string()]);
        self.remove_modules(value.modules(), &mut seen)?;
        Ok(true)
    }

    fn remove_modules(&self, modules: Vec<Module>, seen: &mut HashSet<String>) -> Result<(), DepotError> {
        for module in modules {
            let desc = module.desc();
            if !seen.insert(desc.id().to_string()) || desc.is_read_only() {
                continue;
            }
            self.remove(desc)?;
            self.remove_modules(module.value().modules_dyn(), seen)?;
        }
        Ok(())
    }

    /// True if a value is visible for `desc` without loading it.
    pub fn contains<X: Artifact>(&self, desc: &Desc<X>) -> Result<bool, DepotError> {
        if desc.is_symlink() {
            return Ok(self.get(desc)?.is_some());
        }
        if self.cache.get_artifact(desc)?.is_some() {
            return Ok(true);
        }
        match self.queue.pending(desc.id()) {
            Some(WriteOp::Put(_)) => Ok(true),
            Some(WriteOp::Remove) => Ok(false),
            None => Ok(self.store().contains(&desc.erase())?),
        }
    }

    /// Metadata of the durable copy. Pending writes are not reflected.
    pub fn metadata<X>(&self, desc: &Desc<X>) -> Result<Option<MetaData>, DepotError> {
        Ok(self.store().metadata(&desc.erase())?)
    }

    /// Where the durable copy lives on disk.
    pub fn local_path<X>(&self, desc: &Desc<X>) -> Option<PathBuf> {
        self.store().local_path(&desc.erase())
    }

    /// Every stored descriptor of kind `X` matching `partial`.
    pub fn load_keys<X: Artifact>(&self, partial: &Desc<X>) -> Result<Vec<Desc<X>>, DepotError> {
        if !self.queue.is_empty() {
            self.queue.flush();
        }
        let found = self.store().load_keys(&partial.erase())?;
        Ok(found.iter().filter_map(AnyDesc::downcast::<X>).collect())
    }

    /// The descriptor `value` is bound under.
    pub fn desc_of<X: Artifact>(&self, value: &Arc<X>) -> Option<Desc<X>> {
        self.cache.get_description(value)
    }

    /// Register the merger `update` uses for kind `X`.
    pub fn register_merger<X: Artifact>(&self, merger: impl Merger<X> + 'static) {
        self.merges.register::<X>(Arc::new(merger));
    }

    /// Snapshot the current value of `desc` (and its modules) as the base
    /// of a later [`update`](Self::update). False if nothing is stored.
    pub fn mark_for_merge<X: Artifact>(&self, desc: &Desc<X>) -> Result<bool, DepotError> {
        let _guard = self.locks.lock(desc.id());
        let Some(value) = self.get(desc)? else {
            return Ok(false);
        };
        let taken = self.merges.snapshot_tree(&desc.erase(), &*value)?;
        tracing::debug!(id = %desc, snapshots = taken, "marked for merge");
        Ok(true)
    }

    /// Commit an edited value, merging with changes stored since
    /// [`mark_for_merge`](Self::mark_for_merge).
    ///
    /// When the durable copy still equals the snapshot, `value` is stored
    /// as-is; otherwise the registered merger combines snapshot, `value`
    /// and the durable copy. The result is bound, queued and becomes the
    /// next snapshot.
    ///
    /// Modules are committed first, each the same way against its own
    /// snapshot. Modules without a snapshot are stored like in
    /// [`put`](Self::put); unedited ones are left alone.
    pub fn update<X: Artifact>(&self, desc: &Desc<X>, value: Arc<X>) -> Result<Arc<X>, DepotError> {
        if desc.is_read_only() {
            return Err(DepotError::ReadOnly(desc.id().to_string()));
        }
        let _guard = self.locks.lock(desc.id());
        let before = self
            .merges
            .snapshot_of(desc.id())
            .ok_or_else(|| DepotError::NotMarkedForMerge(desc.id().to_string()))?;
        let mut seen = HashSet::from([desc.id().to_string()]);
        self.update_modules(value.modules(), &mut seen)?;
        self.queue.wait_for(desc.id());
        let merged = match self.store().get(&desc.erase())? {
            Some(latest) if latest != before => {
                let merger = self
                    .merges
                    .merger::<X>()
                    .ok_or(DepotError::NoMerger(X::KIND))?;
                let mut merged = merger
                    .merge(&X::decode(&before)?, &value, &X::decode(&latest)?)
                    .map_err(|source| DepotError::Merge {
                        id: desc.id().to_string(),
                        source,
                    })?;
                merged.relink(&Modules(self))?;
                tracing::debug!(id = %desc, "merged concurrent edit");
                Arc::new(merged)
            }
            _ => value,
        };
        self.cache.bind(desc, &merged);
        self.queue.submit(&desc.erase(), WriteOp::Put(merged.clone()))?;
        self.merges.replace_snapshot(desc.id(), merged.encode()?);
        Ok(merged)
    }

    fn update_modules(&self, modules: Vec<Module>, seen: &mut HashSet<String>) -> Result<(), DepotError> {
        for module in modules {
            let desc = module.desc();
            if !seen.insert(desc.id().to_string()) || desc.is_read_only() {
                continue;
            }
            let committed = self
                .update_modules(module.value().modules_dyn(), seen)
                .and_then(|()| self.update_dyn(desc, module.value()));
            match committed {
                Ok(()) => {}
                Err(e) if self.config.allow_module_errors => {
                    tracing::warn!(id = %desc, error = %e, "module not updated");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn update_dyn(&self, desc: &AnyDesc, value: &Arc<dyn DynArtifact>) -> Result<(), DepotError> {
        let _guard = self.locks.lock(desc.id());
        let Some(before) = self.merges.snapshot_of(desc.id()) else {
            return self.put_dyn(desc, value);
        };
        let after = value.encode_dyn()?;
        if after == before {
            return Ok(());
        }
        self.queue.wait_for(desc.id());
        let merged = match self.store().get(desc)? {
            Some(latest) if latest != before => {
                let merger = self
                    .merges
                    .erased(desc.kind())
                    .ok_or(DepotError::NoMerger(value.kind()))?;
                let merged = merger
                    .merge_bytes(&before, &after, &latest, &Modules(self))
                    .map_err(|source| DepotError::Merge {
                        id: desc.id().to_string(),
                        source,
                    })?;
                tracing::debug!(id = %desc, "merged concurrent module edit");
                merged
            }
            _ => Arc::clone(value),
        };
        self.cache.bind_dyn(desc, &merged);
        self.queue.submit(desc, WriteOp::Put(merged.clone()))?;
        self.merges.replace_snapshot(desc.id(), merged.encode_dyn()?);
        Ok(())
    }

    /// True while `desc` has a snapshot awaiting `update`.
    pub fn is_marked_for_merge<X>(&self, desc: &Desc<X>) -> bool {
        self.merges.is_marked(desc.id())
    }

    /// Block until every queued write is durable or dropped.
    pub fn flush(&self) {
        self.queue.flush();
    }

    /// Writes given up on after exhausting retries.
    pub fn dropped_writes(&self) -> u64 {
        self.queue.dropped()
    }
}

/// Resolves module references through the depot, so relinked modules are
/// the cached instances.
pub(crate) struct Modules<'a>(&'a Depot);

impl Resolver for Modules<'_> {
    fn resolve<X: Artifact>(&self, desc: &Desc<X>) -> Result<Option<Arc<X>>, CodecError> {
        self.0.get(desc).map_err(|e| CodecError::Module {
            id: desc.id().to_string(),
            source: Box::new(e),
        })
    }
}

fn downcast_queued<X: Artifact>(id: &str, queued: Arc<dyn DynArtifact>) -> Result<Arc<X>, DepotError> {
    let found = queued.kind();
    queued
        .into_any()
        .downcast::<X>()
        .map_err(|_| DepotError::KindMismatch {
            id: id.to_string(),
            expected: X::KIND,
            found: found.to_string(),
        })
}
