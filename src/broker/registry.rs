//! Concurrent client registry.
//!
//! A fixed array of read/write-locked shards keyed by the stable client-id
//! hash. At most one session is registered per identifier; the handshake
//! enforces this by rejecting a duplicate CONNECT instead of taking over the
//! existing session.

use crate::broker::pool::stable_hash;
use crate::broker::session::Session;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

const SHARD_COUNT: usize = 16;

type Shard = RwLock<HashMap<String, Arc<Session>>>;

#[derive(Clone)]
pub struct ClientRegistry {
    shards: Arc<[Shard; SHARD_COUNT]>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            shards: Arc::new(std::array::from_fn(|_| RwLock::new(HashMap::new()))),
        }
    }

    fn shard(&self, id: &str) -> &Shard {
        &self.shards[(stable_hash(id) % SHARD_COUNT as u64) as usize]
    }

    pub fn add(&self, session: Arc<Session>) {
        let id = session.id().to_string();
        self.shard(&id).write().insert(id, session);
    }

    pub fn load(&self, id: &str) -> Option<Arc<Session>> {
        self.shard(id).read().get(id).cloned()
    }

    /// Remove the entry for this session. A different session registered
    /// under the same identifier is left untouched.
    pub fn remove(&self, session: &Session) {
        let mut shard = self.shard(session.id()).write();
        if let Some(current) = shard.get(session.id()) {
            if std::ptr::eq(Arc::as_ptr(current), session) {
                shard.remove(session.id());
            }
        }
    }

    /// Visit every session registered at some point during the scan. The
    /// callback runs outside any shard lock; a callback error is logged and
    /// iteration continues.
    pub async fn for_each<F, Fut>(&self, mut f: F)
    where
        F: FnMut(Arc<Session>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        for session in self.snapshot() {
            let id = session.id().to_string();
            if let Err(err) = f(session).await {
                tracing::error!(client_id = %id, "process client: {err:#}");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        let mut sessions = Vec::new();
        for shard in self.shards.iter() {
            sessions.extend(shard.read().values().cloned());
        }
        sessions
    }
}
