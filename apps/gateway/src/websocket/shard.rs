//! Lock-partitioned session buckets used for parallel fan-out

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::session::{Session, SessionId};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Shard a session id is placed in; fixed for the session's lifetime
pub fn shard_index(id: &SessionId, shard_count: usize) -> usize {
    if shard_count <= 1 {
        return 0;
    }
    fnv1a(id.as_bytes()) as usize % shard_count
}

type Bucket = HashMap<SessionId, Arc<Session>>;

/// Disjoint partitions of the live session population
///
/// Each bucket has its own lock. Only the dispatch loop writes; broadcast and
/// ping workers take short read locks to snapshot a bucket.
#[derive(Debug)]
pub struct ShardSet {
    buckets: Vec<RwLock<Bucket>>,
}

impl ShardSet {
    pub fn new(shard_count: usize) -> Self {
        let buckets = (0..shard_count.max(1))
            .map(|_| RwLock::new(Bucket::new()))
            .collect();
        Self { buckets }
    }

    /// Number of shards
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn index_of(&self, id: &SessionId) -> usize {
        shard_index(id, self.buckets.len())
    }

    /// Place a session in its shard, returning the shard index
    pub async fn insert(&self, session: Arc<Session>) -> usize {
        let index = self.index_of(&session.id());
        self.buckets[index]
            .write()
            .await
            .insert(session.id(), session);
        index
    }

    pub async fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let index = self.index_of(id);
        self.buckets[index].write().await.remove(id)
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        let index = self.index_of(id);
        self.buckets[index].read().await.contains_key(id)
    }

    /// Snapshot the alive sessions of one shard
    ///
    /// The read lock is released before returning, so callers never hold it
    /// across a send. Out-of-range indices yield an empty list.
    pub async fn live_sessions(&self, index: usize) -> Vec<Arc<Session>> {
        let Some(bucket) = self.buckets.get(index) else {
            return Vec::new();
        };
        bucket
            .read()
            .await
            .values()
            .filter(|session| session.is_alive())
            .cloned()
            .collect()
    }

    /// Session count of every shard, in shard order
    pub async fn sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.buckets.len());
        for bucket in &self.buckets {
            sizes.push(bucket.read().await.len());
        }
        sizes
    }
}
