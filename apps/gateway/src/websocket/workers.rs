//! Broadcast and ping worker pools
//!
//! Both pools pull shard-scoped jobs from a shared bounded queue. Producers
//! (the dispatch loop) never wait on these queues; a job that does not fit is
//! dropped.

use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backpressure::{BackpressurePolicy, Delivery};
use super::shard::ShardSet;

/// Deliver one serialized message to every live session of a shard
#[derive(Debug, Clone)]
pub struct BroadcastJob {
    pub shard: usize,
    pub payload: Bytes,
}

/// Per-job delivery counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub queued: usize,
    pub dropped: usize,
}

/// Run one broadcast job
///
/// The shard is snapshotted under its read lock; sends happen after the lock
/// is released.
pub async fn fan_out(shards: &ShardSet, policy: &BackpressurePolicy, job: BroadcastJob) -> FanOutReport {
    let mut report = FanOutReport::default();

    for session in shards.live_sessions(job.shard).await {
        match policy.deliver(&session, job.payload.clone()).await {
            Delivery::Queued => report.queued += 1,
            Delivery::Dropped | Delivery::Closed => report.dropped += 1,
        }
    }

    if report.dropped > 0 {
        tracing::debug!(
            shard = job.shard,
            queued = report.queued,
            dropped = report.dropped,
            "Broadcast partially dropped"
        );
    }

    report
}

/// Ask every live session of a shard to send a transport ping
pub async fn ping_shard(shards: &ShardSet, shard: usize) -> usize {
    let sessions = shards.live_sessions(shard).await;
    for session in &sessions {
        session.request_ping();
    }
    sessions.len()
}

pub fn spawn_broadcast_pool(
    worker_count: usize,
    jobs: async_channel::Receiver<BroadcastJob>,
    shards: Arc<ShardSet>,
    policy: BackpressurePolicy,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..worker_count.max(1))
        .map(|worker| {
            let jobs = jobs.clone();
            let shards = shards.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                loop {
                    let job = tokio::select! {
                        _ = cancel.cancelled() => break,
                        job = jobs.recv() => match job {
                            Ok(job) => job,
                            Err(_) => break,
                        },
                    };
                    fan_out(&shards, &policy, job).await;
                }
                tracing::debug!(worker, "Broadcast worker stopped");
            })
        })
        .collect()
}

pub fn spawn_ping_pool(
    worker_count: usize,
    jobs: async_channel::Receiver<usize>,
    shards: Arc<ShardSet>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..worker_count.max(1))
        .map(|worker| {
            let jobs = jobs.clone();
            let shards = shards.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                loop {
                    let shard = tokio::select! {
                        _ = cancel.cancelled() => break,
                        shard = jobs.recv() => match shard {
                            Ok(shard) => shard,
                            Err(_) => break,
                        },
                    };
                    let pinged = ping_shard(&shards, shard).await;
                    tracing::trace!(worker, shard, pinged, "Shard pinged");
                }
                tracing::debug!(worker, "Ping worker stopped");
            })
        })
        .collect()
}
