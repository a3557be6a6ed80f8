//! Bounded worker pool with per-key affinity.
//!
//! Work submitted under the same string key lands on the same slot and runs
//! in FIFO order with no overlap; distinct keys may run in parallel. The
//! broker keys submissions by client identifier so each client's packets are
//! processed in arrival order without serializing unrelated clients.

use futures::FutureExt;
use std::future::Future;
use std::hash::Hasher;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use twox_hash::XxHash64;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Pending thunks per slot before submission blocks the caller.
const SLOT_QUEUE_DEPTH: usize = 1024;

#[derive(Clone)]
pub struct WorkerPool {
    slots: Arc<Vec<mpsc::Sender<Job>>>,
}

impl WorkerPool {
    /// Spawn `workers` long-lived slot tasks, each consuming its own bounded
    /// FIFO queue. Must be called from within a tokio runtime.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let mut slots = Vec::with_capacity(workers);
        for slot in 0..workers {
            let (tx, mut rx) = mpsc::channel::<Job>(SLOT_QUEUE_DEPTH);
            tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
                        tracing::error!(
                            slot,
                            "worker recovered handler panic: {}",
                            panic_message(&panic)
                        );
                    }
                }
            });
            slots.push(tx);
        }
        Self {
            slots: Arc::new(slots),
        }
    }

    pub fn slot_for(&self, key: &str) -> usize {
        (stable_hash(key) % self.slots.len() as u64) as usize
    }

    /// Queue a thunk on the slot owned by `key`, waiting when that slot's
    /// queue is full. There is no drop path: slot receivers live for the
    /// process lifetime, so a closed queue is unrecoverable.
    pub async fn submit<F>(&self, key: &str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let slot = self.slot_for(key);
        if self.slots[slot].send(Box::pin(job)).await.is_err() {
            panic!("worker slot {slot} queue closed");
        }
    }

    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }
}

/// Deterministic key hash shared by the pool and the registry shards.
pub fn stable_hash(key: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key.as_bytes());
    hasher.finish()
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
