//! Depot over a remote-backed store, with an in-memory remote.

mod common;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use common::*;
use depot::{Blob, Depot, Desc, RemoteClient, Server};
use depot_store::{FileStore, RemoteError};

#[derive(Default)]
struct MemoryRemote {
    data: Mutex<HashMap<(String, String), Vec<u8>>>,
    down: AtomicBool,
}

impl MemoryRemote {
    fn check(&self) -> Result<(), RemoteError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("remote down".into()));
        }
        Ok(())
    }

    fn has(&self, host: &str, id: &str) -> bool {
        self.data.lock().contains_key(&(host.to_string(), id.to_string()))
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn fetch(&self, host: &str, id: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        self.check()?;
        Ok(self.data.lock().get(&(host.to_string(), id.to_string())).cloned())
    }

    async fn push(&self, host: &str, id: &str, bytes: Vec<u8>) -> Result<(), RemoteError> {
        self.check()?;
        self.data.lock().insert((host.to_string(), id.to_string()), bytes);
        Ok(())
    }

    async fn delete(&self, host: &str, id: &str) -> Result<(), RemoteError> {
        self.check()?;
        self.data.lock().remove(&(host.to_string(), id.to_string()));
        Ok(())
    }

    async fn list(&self, host: &str, dir_id: &str) -> Result<Vec<String>, RemoteError> {
        self.check()?;
        let prefix = format!("{dir_id}/");
        Ok(self
            .data
            .lock()
            .keys()
            .filter(|(h, id)| h == host && id.starts_with(&prefix))
            .map(|(_, id)| id[prefix.len()..].to_string())
            .collect())
    }
}

const CENTRAL: &str = "central.example";

fn remote_depot(dir: &Path, remote: &Arc<MemoryRemote>) -> Depot {
    let mut cfg = config(dir);
    cfg.default_remote_host = Some(CENTRAL.into());
    Depot::with_remote(cfg, FileStore::open(dir).unwrap(), remote.clone()).unwrap()
}

fn shared() -> Desc<Blob> {
    Desc::builder("lexicon.txt").tag("nlp").server(Server::Central).build()
}

#[test]
fn central_artifacts_replicate_and_load_elsewhere() {
    let remote = Arc::new(MemoryRemote::default());
    let first = tempfile::tempdir().unwrap();
    {
        let depot = remote_depot(first.path(), &remote);
        depot.put(&shared(), Arc::new(Blob::from("alpha\nbeta\n"))).unwrap();
        depot.close();
    }
    assert!(remote.has(CENTRAL, shared().id()));

    let second = tempfile::tempdir().unwrap();
    let depot = remote_depot(second.path(), &remote);
    let value = depot.get(&shared()).unwrap().unwrap();
    assert_eq!(value.text().unwrap(), "alpha\nbeta\n");
    assert!(depot.local_path(&shared()).unwrap().exists());
}

#[test]
fn local_artifacts_stay_local() {
    let remote = Arc::new(MemoryRemote::default());
    let dir = tempfile::tempdir().unwrap();
    let local: Desc<Blob> = Desc::builder("scratch").build();
    let depot = remote_depot(dir.path(), &remote);
    depot.put(&local, Arc::new(Blob::from("x"))).unwrap();
    depot.close();
    assert!(remote.data.lock().is_empty());
}

#[test]
fn outage_serves_the_local_copy() {
    let remote = Arc::new(MemoryRemote::default());
    let dir = tempfile::tempdir().unwrap();
    let stale: Desc<Blob> = Desc::builder("stale.txt")
        .server(Server::Central)
        .max_age(std::time::Duration::ZERO)
        .build();
    let depot = remote_depot(dir.path(), &remote);
    depot.put(&stale, Arc::new(Blob::from("kept"))).unwrap();
    depot.flush();
    depot.cache().clear();

    remote.down.store(true, Ordering::SeqCst);
    assert_eq!(depot.get(&stale).unwrap().unwrap().text().unwrap(), "kept");

    let missing: Desc<Blob> = Desc::builder("never-seen").server(Server::Central).build();
    assert!(depot.get(&missing).is_err());
}
