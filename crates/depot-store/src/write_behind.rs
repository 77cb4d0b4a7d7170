//! # Write-Behind Queue
//!
//! Decouples durable writes from callers. A `put` on the facade makes the
//! value visible in memory at once and hands the durable write to this
//! queue, which a small set of dedicated worker threads drains into the
//! underlying [`Store`].
//!
//! ## Ordering
//!
//! Jobs are taken in FIFO order, but a worker never starts a job for an id
//! that is already being written. A submission for an id whose previous job
//! has not started replaces that job in place (keeping its position and
//! ready time). Together these mean the last value submitted for an id is
//! the one that lands.
//!
//! ## Read-Your-Writes
//!
//! [`WriteBehind::pending`] exposes queued and in-flight operations so that
//! a read never falls through to storage for an id whose latest write has
//! not landed yet.
//!
//! ## Failures
//!
//! A failed write is retried up to `retries` more times, `backoff` apart,
//! ahead of the rest of the queue. After that it is dropped: logged at
//! `error`, counted in `depot_write_behind_dropped_total` and in
//! [`WriteBehind::dropped`]. The value stays valid in memory.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use depot_core::{AnyDesc, DynArtifact};
use parking_lot::{Condvar, Mutex};
use rand::Rng;

use crate::error::StoreError;
use crate::store::Store;

/// A durable operation waiting to happen.
#[derive(Clone)]
pub enum WriteOp {
    /// Encode and store this value.
    Put(Arc<dyn DynArtifact>),
    /// Delete whatever is stored.
    Remove,
}

impl fmt::Debug for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put(v) => f.debug_tuple("Put").field(&v.kind()).finish(),
            Self::Remove => f.write_str("Remove"),
        }
    }
}

/// Queue tuning.
#[derive(Debug, Clone)]
pub struct WriteBehindConfig {
    /// Worker threads.
    pub workers: usize,
    /// Minimum time a job waits before it is written.
    pub delay: Duration,
    /// Random spread applied to `delay`, as a fraction in `[0, 1]`.
    pub jitter: f64,
    /// Extra attempts after a failed write.
    pub retries: u32,
    /// Wait between attempts.
    pub backoff: Duration,
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            delay: Duration::ZERO,
            jitter: 0.0,
            retries: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

struct Job {
    desc: AnyDesc,
    op: WriteOp,
    ready_at: Instant,
    retry_at: Option<Instant>,
    attempts: u32,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Job>,
    in_flight: HashMap<String, WriteOp>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    work: Condvar,
    idle: Condvar,
    store: Arc<dyn Store>,
    config: WriteBehindConfig,
    flushing: AtomicUsize,
    dropped: AtomicU64,
}

/// Asynchronous durable persistence in front of a [`Store`].
pub struct WriteBehind {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for WriteBehind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBehind")
            .field("config", &self.shared.config)
            .field("queued", &self.len())
            .finish_non_exhaustive()
    }
}

impl WriteBehind {
    /// Start the worker threads.
    pub fn start(store: Arc<dyn Store>, config: WriteBehindConfig) -> Result<Self, StoreError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work: Condvar::new(),
            idle: Condvar::new(),
            store,
            config,
            flushing: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        });
        let mut workers = Vec::new();
        for i in 0..shared.config.workers.max(1) {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("depot-writer-{i}"))
                .spawn(move || worker_loop(&shared))
                .map_err(|e| StoreError::io("depot-writer", e))?;
            workers.push(handle);
        }
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// The store being written to.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.shared.store
    }

    /// Queue `op` for `desc`, coalescing with a queued job for the same id.
    pub fn submit(&self, desc: &AnyDesc, op: WriteOp) -> Result<(), StoreError> {
        let mut st = self.shared.state.lock();
        if st.shutdown {
            return Err(StoreError::QueueClosed);
        }
        if let Some(job) = st.queue.iter_mut().find(|j| j.desc.id() == desc.id()) {
            tracing::trace!(id = %desc, "coalesced queued write");
            job.op = op;
            job.desc = desc.clone();
            job.attempts = 0;
            job.retry_at = None;
        } else {
            let ready_at = Instant::now() + self.jittered_delay();
            st.queue.push_back(Job {
                desc: desc.clone(),
                op,
                ready_at,
                retry_at: None,
                attempts: 0,
            });
        }
        drop(st);
        self.shared.work.notify_one();
        Ok(())
    }

    fn jittered_delay(&self) -> Duration {
        let cfg = &self.shared.config;
        if cfg.delay.is_zero() || cfg.jitter <= 0.0 {
            return cfg.delay;
        }
        let spread = cfg.jitter.min(1.0);
        let factor = 1.0 + rand::thread_rng().gen_range(-spread..=spread);
        cfg.delay.mul_f64(factor.max(0.0))
    }

    /// The newest operation not yet durable for `id`: a queued job wins over
    /// the one being written.
    pub fn pending(&self, id: &str) -> Option<WriteOp> {
        let st = self.shared.state.lock();
        st.queue
            .iter()
            .find(|j| j.desc.id() == id)
            .map(|j| j.op.clone())
            .or_else(|| st.in_flight.get(id).cloned())
    }

    /// True while a job for `id` is queued or being written.
    pub fn is_pending(&self, id: &str) -> bool {
        let st = self.shared.state.lock();
        st.in_flight.contains_key(id) || st.queue.iter().any(|j| j.desc.id() == id)
    }

    /// Block until no job for `id` is queued or in flight.
    pub fn wait_for(&self, id: &str) {
        let mut st = self.shared.state.lock();
        self.shared.flushing.fetch_add(1, Ordering::SeqCst);
        self.shared.work.notify_all();
        while st.in_flight.contains_key(id) || st.queue.iter().any(|j| j.desc.id() == id) {
            self.shared.idle.wait(&mut st);
        }
        drop(st);
        self.shared.flushing.fetch_sub(1, Ordering::SeqCst);
    }

    /// Queued job count (excluding in-flight writes).
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// True when nothing is queued or in flight.
    pub fn is_empty(&self) -> bool {
        let st = self.shared.state.lock();
        st.queue.is_empty() && st.in_flight.is_empty()
    }

    /// Writes given up on since start.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::SeqCst)
    }

    /// Block until every queued write has landed or been dropped. Write
    /// delays are ignored while flushing.
    pub fn flush(&self) {
        let mut st = self.shared.state.lock();
        self.shared.flushing.fetch_add(1, Ordering::SeqCst);
        self.shared.work.notify_all();
        while !(st.queue.is_empty() && st.in_flight.is_empty()) {
            self.shared.idle.wait(&mut st);
        }
        drop(st);
        self.shared.flushing.fetch_sub(1, Ordering::SeqCst);
    }

    /// Flush, then stop the workers. Later submissions fail.
    pub fn shutdown(&self) {
        self.flush();
        self.shared.state.lock().shutdown = true;
        self.shared.work.notify_all();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("write-behind worker panicked");
            }
        }
    }
}

impl Drop for WriteBehind {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut guard = shared.state.lock();
            loop {
                let st = &mut *guard;
                if st.shutdown && st.queue.is_empty() {
                    return;
                }
                let now = Instant::now();
                let force = st.shutdown || shared.flushing.load(Ordering::SeqCst) > 0;
                let mut wake: Option<Instant> = None;
                let pos = st.queue.iter().position(|j| {
                    if st.in_flight.contains_key(j.desc.id()) {
                        return false;
                    }
                    let mut due = j.retry_at;
                    if !force {
                        due = Some(due.map_or(j.ready_at, |r| r.max(j.ready_at)));
                    }
                    match due {
                        Some(t) if t > now => {
                            wake = Some(wake.map_or(t, |w| w.min(t)));
                            false
                        }
                        _ => true,
                    }
                });
                if let Some(job) = pos.and_then(|p| st.queue.remove(p)) {
                    st.in_flight.insert(job.desc.id().to_string(), job.op.clone());
                    break job;
                }
                match wake {
                    Some(t) => {
                        shared.work.wait_until(&mut guard, t);
                    }
                    None => shared.work.wait(&mut guard),
                }
            }
        };

        let result = execute(shared.store.as_ref(), &job);

        let mut st = shared.state.lock();
        st.in_flight.remove(job.desc.id());
        match result {
            Ok(()) => {}
            Err(Failure::Retryable(e)) if job.attempts < shared.config.retries => {
                tracing::warn!(
                    id = %job.desc,
                    attempt = job.attempts + 1,
                    error = %e,
                    "durable write failed, will retry"
                );
                // A newer submission for the id supersedes the failed one.
                if !st.queue.iter().any(|j| j.desc.id() == job.desc.id()) {
                    st.queue.push_front(Job {
                        retry_at: Some(Instant::now() + shared.config.backoff),
                        attempts: job.attempts + 1,
                        ..job
                    });
                }
            }
            Err(Failure::Retryable(e)) | Err(Failure::Fatal(e)) => {
                tracing::error!(
                    id = %job.desc,
                    attempts = job.attempts + 1,
                    error = %e,
                    "dropping durable write; value stays in memory only"
                );
                metrics::counter!("depot_write_behind_dropped_total").increment(1);
                shared.dropped.fetch_add(1, Ordering::SeqCst);
            }
        }
        drop(st);
        shared.work.notify_all();
        shared.idle.notify_all();
    }
}

enum Failure {
    Retryable(StoreError),
    Fatal(StoreError),
}

fn execute(store: &dyn Store, job: &Job) -> Result<(), Failure> {
    match &job.op {
        WriteOp::Put(value) => {
            let bytes = value
                .encode_dyn()
                .map_err(|e| Failure::Fatal(StoreError::Codec(e)))?;
            store.put(&job.desc, &bytes).map_err(classify)
        }
        WriteOp::Remove => store.remove(&job.desc).map_err(classify),
    }
}

fn classify(e: StoreError) -> Failure {
    match e {
        StoreError::ReadOnly(_) | StoreError::InvalidId(_) | StoreError::Codec(_) => Failure::Fatal(e),
        other => Failure::Retryable(other),
    }
}
