//! # Remote Store Adapter
//!
//! [`RemoteStore`] layers a best-effort remote mirror over a [`FileStore`].
//! The descriptor's [`Server`] hint picks the host:
//!
//! | Hint | Host |
//! |------|------|
//! | `Local` | none, local only |
//! | `Any`, `Central` | the configured default host |
//! | `Host(h)` | `h`, unless `h` is this machine |
//!
//! ## Reads
//!
//! A fresh local copy is served directly. Otherwise the remote is asked and a
//! hit is written through to the local store. If the remote fails, a local
//! copy (even a stale one) is served with a warning; only when there is no
//! local copy does the failure reach the caller.
//!
//! ## Writes
//!
//! Writes land locally and are then pushed on a small background runtime.
//! Pushes are never awaited by the caller; failures are logged.
//! [`RemoteStore::wait_idle`] blocks until outstanding pushes finish.
//!
//! Replication runs on lanes: every id hashes to one lane, and a lane sends
//! its pushes and deletes one at a time in submission order. A delete can
//! therefore never overtake the push it follows. While an id still has
//! replication in flight the local copy is the newest one, so reads of that
//! id skip the remote.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use depot_core::{AnyDesc, Clock, Server, SystemClock, TimeRange};
use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;

use crate::error::{RemoteError, StoreError};
use crate::file::FileStore;
use crate::meta::MetaData;
use crate::store::{Slice, Store};

/// Fetch and push by id against a named host.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch the bytes stored under `id`, `None` if the host has none.
    async fn fetch(&self, host: &str, id: &str) -> Result<Option<Vec<u8>>, RemoteError>;
    /// Store `bytes` under `id`.
    async fn push(&self, host: &str, id: &str, bytes: Vec<u8>) -> Result<(), RemoteError>;
    /// Delete `id`. Deleting something absent is not an error.
    async fn delete(&self, host: &str, id: &str) -> Result<(), RemoteError>;
    /// Child names of the directory `dir_id`.
    async fn list(&self, host: &str, dir_id: &str) -> Result<Vec<String>, RemoteError>;
}

/// Settings for [`RemoteStore`].
#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    /// This machine's name; `Host` hints naming it stay local.
    pub my_host: String,
    /// Host used for `Any` and `Central` hints.
    pub default_host: Option<String>,
    /// Freshness limit for descriptors that carry none.
    pub default_max_age: Option<Duration>,
    /// Threads in the replication runtime.
    pub replication_workers: usize,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            my_host: "localhost".to_string(),
            default_host: None,
            default_max_age: None,
            replication_workers: 2,
        }
    }
}

/// Lanes per replication worker thread.
const LANES_PER_WORKER: usize = 4;

enum Replica {
    Push(Vec<u8>),
    Delete,
}

struct Job {
    host: String,
    id: String,
    op: Replica,
}

impl Job {
    async fn run(self, client: &dyn RemoteClient) {
        let Job { host, id, op } = self;
        match op {
            Replica::Push(bytes) => {
                if let Err(e) = client.push(&host, &id, bytes).await {
                    metrics::counter!("depot_remote_push_failures_total").increment(1);
                    tracing::warn!(id = %id, host = %host, error = %e, "remote push failed");
                }
            }
            Replica::Delete => {
                if let Err(e) = client.delete(&host, &id).await {
                    metrics::counter!("depot_remote_push_failures_total").increment(1);
                    tracing::warn!(id = %id, host = %host, error = %e, "remote delete failed");
                }
            }
        }
    }
}

/// Replication jobs queued or running, counted per id.
#[derive(Default)]
struct InFlight {
    ids: Mutex<HashMap<String, usize>>,
    idle: Condvar,
}

impl InFlight {
    fn start(&self, id: &str) {
        *self.ids.lock().entry(id.to_string()).or_default() += 1;
    }

    fn finish(&self, id: &str) {
        let mut ids = self.ids.lock();
        if let Some(n) = ids.get_mut(id) {
            *n -= 1;
            if *n == 0 {
                ids.remove(id);
            }
        }
        if ids.is_empty() {
            self.idle.notify_all();
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.lock().contains_key(id)
    }
}

/// A local store mirrored to remote hosts.
pub struct RemoteStore {
    local: FileStore,
    client: Arc<dyn RemoteClient>,
    runtime: tokio::runtime::Runtime,
    config: RemoteStoreConfig,
    clock: Arc<dyn Clock>,
    lanes: Vec<mpsc::UnboundedSender<Job>>,
    in_flight: Arc<InFlight>,
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("local", &self.local)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RemoteStore {
    /// Wrap `local` with a remote mirror reached through `client`.
    ///
    /// Must not be called from inside an async runtime: the store owns its
    /// own runtime and blocks on it for fetches.
    pub fn new(
        local: FileStore,
        client: Arc<dyn RemoteClient>,
        config: RemoteStoreConfig,
    ) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.replication_workers.max(1))
            .thread_name("depot-remote")
            .enable_all()
            .build()
            .map_err(|e| StoreError::io(local.root(), e))?;
        let in_flight = Arc::new(InFlight::default());
        let lanes = (0..config.replication_workers.max(1) * LANES_PER_WORKER)
            .map(|_| {
                let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
                let client = Arc::clone(&client);
                let in_flight = Arc::clone(&in_flight);
                runtime.spawn(async move {
                    while let Some(job) = rx.recv().await {
                        let id = job.id.clone();
                        job.run(client.as_ref()).await;
                        in_flight.finish(&id);
                    }
                });
                tx
            })
            .collect();
        Ok(Self {
            local,
            client,
            runtime,
            config,
            clock: Arc::new(SystemClock),
            lanes,
            in_flight,
        })
    }

    /// Use `clock` for freshness checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The wrapped local store.
    pub fn local(&self) -> &FileStore {
        &self.local
    }

    /// Host that `server` resolves to, `None` for local-only.
    pub fn resolve_host(&self, server: &Server) -> Option<String> {
        match server {
            Server::Local => None,
            Server::Any | Server::Central => self.config.default_host.clone(),
            Server::Host(h) if *h == self.config.my_host => None,
            Server::Host(h) => Some(h.clone()),
        }
    }

    /// Block until every push started so far has finished.
    pub fn wait_idle(&self) {
        let mut ids = self.in_flight.ids.lock();
        while !ids.is_empty() {
            self.in_flight.idle.wait(&mut ids);
        }
    }

    /// True while a push or delete of `desc` is queued or running.
    pub fn is_replicating(&self, desc: &AnyDesc) -> bool {
        self.in_flight.contains(desc.id())
    }

    fn is_fresh(&self, desc: &AnyDesc) -> Result<bool, StoreError> {
        let max_age = desc.max_age().or(self.config.default_max_age);
        Ok(self
            .local
            .metadata(desc)?
            .is_some_and(|m| m.is_fresh(max_age, self.clock.now())))
    }

    fn replicate(&self, host: String, desc: &AnyDesc, op: Replica) {
        let id = desc.id().to_string();
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let lane = &self.lanes[(hasher.finish() as usize) % self.lanes.len()];
        self.in_flight.start(&id);
        if let Err(mpsc::error::SendError(job)) = lane.send(Job { host, id, op }) {
            tracing::warn!(id = %job.id, host = %job.host, "replication lane closed, dropping job");
            self.in_flight.finish(&job.id);
        }
    }

    fn fetch_missing_slices(&self, host: &str, desc: &AnyDesc, query: &TimeRange) -> Result<(), RemoteError> {
        let Some((dir_id, _)) = desc.id().rsplit_once('/') else {
            return Ok(());
        };
        let have = self
            .local
            .list_slices(desc)
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        let names = self.runtime.block_on(self.client.list(host, dir_id))?;
        for name in names {
            let segment = if desc.is_compressed() {
                match name.strip_suffix(".gz") {
                    Some(s) => s,
                    None => continue,
                }
            } else {
                name.as_str()
            };
            let Some(range) = TimeRange::parse_segment(segment) else {
                continue;
            };
            if !range.intersects(query) || have.contains(&range) {
                continue;
            }
            let slice = desc.with_range(range);
            if let Some(bytes) = self.runtime.block_on(self.client.fetch(host, slice.id()))? {
                self.local
                    .put(&slice, &bytes)
                    .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
            }
        }
        Ok(())
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        self.wait_idle();
    }
}

impl Store for RemoteStore {
    fn get(&self, desc: &AnyDesc) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(host) = self.resolve_host(desc.server()) else {
            return self.local.get(desc);
        };
        if self.in_flight.contains(desc.id()) || self.is_fresh(desc)? {
            return self.local.get(desc);
        }
        match self.runtime.block_on(self.client.fetch(&host, desc.id())) {
            Ok(Some(bytes)) => {
                tracing::debug!(id = %desc, host = %host, "fetched from remote store");
                self.local.put(desc, &bytes)?;
                Ok(Some(bytes))
            }
            Ok(None) => self.local.get(desc),
            Err(e) => {
                metrics::counter!("depot_remote_fetch_failures_total").increment(1);
                match self.local.get(desc)? {
                    Some(bytes) => {
                        tracing::warn!(id = %desc, host = %host, error = %e, "remote fetch failed, serving local copy");
                        Ok(Some(bytes))
                    }
                    None => Err(StoreError::Remote {
                        id: desc.id().to_string(),
                        source: e,
                    }),
                }
            }
        }
    }

    fn get_range(&self, desc: &AnyDesc) -> Result<Vec<Slice>, StoreError> {
        if let (Some(host), Some(query)) = (self.resolve_host(desc.server()), desc.range()) {
            if let Err(e) = self.fetch_missing_slices(&host, desc, query) {
                metrics::counter!("depot_remote_fetch_failures_total").increment(1);
                tracing::warn!(id = %desc, host = %host, error = %e, "remote slice listing failed, serving local slices");
            }
        }
        self.local.get_range(desc)
    }

    fn put(&self, desc: &AnyDesc, bytes: &[u8]) -> Result<(), StoreError> {
        let host = self.resolve_host(desc.server());
        if host.is_some() && desc.is_read_only() {
            return Err(StoreError::ReadOnly(desc.id().to_string()));
        }
        self.local.put(desc, bytes)?;
        if let Some(host) = host {
            self.replicate(host, desc, Replica::Push(bytes.to_vec()));
        }
        Ok(())
    }

    fn remove(&self, desc: &AnyDesc) -> Result<(), StoreError> {
        self.local.remove(desc)?;
        if let Some(host) = self.resolve_host(desc.server()) {
            if !desc.is_read_only() {
                self.replicate(host, desc, Replica::Delete);
            }
        }
        Ok(())
    }

    fn contains(&self, desc: &AnyDesc) -> Result<bool, StoreError> {
        self.local.contains(desc)
    }

    fn metadata(&self, desc: &AnyDesc) -> Result<Option<MetaData>, StoreError> {
        self.local.metadata(desc)
    }

    fn load_keys(&self, partial: &AnyDesc) -> Result<Vec<AnyDesc>, StoreError> {
        self.local.load_keys(partial)
    }

    fn local_path(&self, desc: &AnyDesc) -> Option<PathBuf> {
        self.local.local_path(desc)
    }
}
