//! Hub lifecycle and the dispatch loop
//!
//! The dispatch loop is the single coordinator of the real-time core. It owns
//! the [`Registry`] outright and is the only task that admits, evicts or
//! routes. Everything else talks to it through bounded queues held by the
//! cloneable [`Hub`] handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use murmur_shared_config::WebSocketConfig;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::backpressure::BackpressurePolicy;
use super::connection::{read_loop, write_loop, LoopSettings};
use super::messages::Message;
use super::registry::Registry;
use super::session::{Session, SessionId};
use super::shard::ShardSet;
use super::transport::{Frame, Transport};
use super::workers::{spawn_broadcast_pool, spawn_ping_pool, BroadcastJob};
use crate::error::{GatewayError, GatewayResult};

/// Capacity of the admission and eviction request queues
const REQUEST_QUEUE_CAPACITY: usize = 1000;

const QUERY_QUEUE_CAPACITY: usize = 64;

/// Point-in-time view of the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub sessions: usize,
    pub users: usize,
    pub shard_sizes: Vec<usize>,
}

struct Admission {
    session: Arc<Session>,
    reply: oneshot::Sender<GatewayResult<()>>,
}

enum Query {
    Stats(oneshot::Sender<HubStats>),
    UserSessions(String, oneshot::Sender<usize>),
}

struct HubInner {
    config: WebSocketConfig,
    admissions: mpsc::Sender<Admission>,
    evictions: mpsc::Sender<SessionId>,
    routes: mpsc::Sender<Message>,
    queries: mpsc::Sender<Query>,
    count: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

/// Handle to a running real-time hub
///
/// Cheap to clone; every clone talks to the same dispatch loop.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Spawn the dispatch loop and worker pools
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: WebSocketConfig) -> Self {
        let config = config.normalized();
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        let shards = Arc::new(ShardSet::new(config.shard_count));
        let policy = BackpressurePolicy::from_config(&config);

        let (admissions_tx, admissions_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let (evictions_tx, evictions_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let (routes_tx, routes_rx) = mpsc::channel(config.message_queue_size);
        let (queries_tx, queries_rx) = mpsc::channel(QUERY_QUEUE_CAPACITY);

        let (jobs_tx, jobs_rx) = async_channel::bounded(config.message_queue_size);
        spawn_broadcast_pool(
            config.broadcast_worker_count,
            jobs_rx,
            shards.clone(),
            policy,
            cancel.clone(),
        );

        let ping_jobs = if config.enable_global_ping {
            let (ping_tx, ping_rx) = async_channel::bounded(config.shard_count);
            spawn_ping_pool(
                config.ping_worker_count,
                ping_rx,
                shards.clone(),
                cancel.clone(),
            );
            Some(ping_tx)
        } else {
            None
        };

        let dispatcher = Dispatcher {
            registry: Registry::new(shards, count.clone(), config.max_connections),
            policy,
            jobs: jobs_tx,
            ping_jobs,
            heartbeat_interval: config.heartbeat_interval,
            connection_timeout_ms: saturating_millis(config.connection_timeout),
        };

        tokio::spawn(dispatcher.run(
            admissions_rx,
            evictions_rx,
            routes_rx,
            queries_rx,
            cancel.clone(),
        ));

        tracing::info!(
            max_connections = config.max_connections,
            shards = config.shard_count,
            broadcast_workers = config.broadcast_worker_count,
            global_ping = config.enable_global_ping,
            "Hub started"
        );

        Self {
            inner: Arc::new(HubInner {
                config,
                admissions: admissions_tx,
                evictions: evictions_tx,
                routes: routes_tx,
                queries: queries_tx,
                count,
                cancel,
            }),
        }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.inner.config
    }

    /// Admit a new client and start its read and write tasks
    ///
    /// On rejection the transport is closed and nothing is indexed.
    pub async fn connect<T>(
        &self,
        user_id: impl Into<String>,
        mut transport: T,
    ) -> GatewayResult<Arc<Session>>
    where
        T: Transport,
    {
        if !self.is_running() {
            close_rejected(&mut transport).await;
            return Err(GatewayError::HubStopped);
        }

        let config = &self.inner.config;
        let (session, outbound) = Session::new(
            user_id,
            config.message_buffer_size,
            config.connect_compression(),
        );
        let session = Arc::new(session);

        let (reply, admitted) = oneshot::channel();
        let admission = Admission {
            session: session.clone(),
            reply,
        };
        let result = match self.inner.admissions.send(admission).await {
            Ok(()) => admitted.await.unwrap_or(Err(GatewayError::HubStopped)),
            Err(_) => Err(GatewayError::HubStopped),
        };

        if let Err(err) = result {
            close_rejected(&mut transport).await;
            return Err(err);
        }

        let settings = LoopSettings::from_config(config);
        let (sink, stream) = transport.split::<Frame>();
        tokio::spawn(write_loop(
            session.clone(),
            sink,
            outbound,
            self.clone(),
            settings,
        ));
        tokio::spawn(read_loop(session.clone(), stream, self.clone(), settings));

        Ok(session)
    }

    /// Route a message: to the sessions of `message.to`, or to everyone when
    /// `to` is empty
    pub async fn submit(&self, message: Message) -> GatewayResult<()> {
        self.inner
            .routes
            .send(message)
            .await
            .map_err(|_| GatewayError::HubStopped)
    }

    /// Request eviction of a session; unknown ids are ignored
    pub async fn unregister(&self, id: SessionId) {
        if self.inner.evictions.send(id).await.is_err() {
            tracing::debug!(session_id = %id, "Hub stopped, eviction skipped");
        }
    }

    pub async fn stats(&self) -> GatewayResult<HubStats> {
        let (tx, rx) = oneshot::channel();
        self.query(Query::Stats(tx)).await?;
        rx.await.map_err(|_| GatewayError::HubStopped)
    }

    pub async fn user_session_count(&self, user_id: impl Into<String>) -> GatewayResult<usize> {
        let (tx, rx) = oneshot::channel();
        self.query(Query::UserSessions(user_id.into(), tx)).await?;
        rx.await.map_err(|_| GatewayError::HubStopped)
    }

    async fn query(&self, query: Query) -> GatewayResult<()> {
        self.inner
            .queries
            .send(query)
            .await
            .map_err(|_| GatewayError::HubStopped)
    }

    /// Number of admitted sessions
    pub fn connection_count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        !self.inner.cancel.is_cancelled() && !self.inner.admissions.is_closed()
    }

    /// Stop the dispatch loop and both worker pools
    ///
    /// Sessions are not closed; their tasks end on their own when the
    /// transport goes away.
    pub fn shutdown(&self) {
        if !self.inner.cancel.is_cancelled() {
            tracing::info!("Hub shutting down");
        }
        self.inner.cancel.cancel();
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("connections", &self.connection_count())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Whole milliseconds in `duration`, saturating at `i64::MAX`
fn saturating_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

async fn close_rejected<T: Transport>(transport: &mut T) {
    if let Err(e) = SinkExt::<Frame>::close(transport).await {
        tracing::debug!(error = %e, "Failed to close rejected transport");
    }
}

/// State owned by the dispatch loop task
struct Dispatcher {
    registry: Registry,
    policy: BackpressurePolicy,
    jobs: async_channel::Sender<BroadcastJob>,
    ping_jobs: Option<async_channel::Sender<usize>>,
    heartbeat_interval: Duration,
    connection_timeout_ms: i64,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut admissions: mpsc::Receiver<Admission>,
        mut evictions: mpsc::Receiver<SessionId>,
        mut routes: mpsc::Receiver<Message>,
        mut queries: mpsc::Receiver<Query>,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Cancellation first, then evictions ahead of admissions so that
            // freed capacity is visible to the next admission.
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.heartbeat().await;
                }
                Some(id) = evictions.recv() => {
                    self.registry.evict(&id).await;
                }
                admission = admissions.recv() => {
                    // Every handle is gone.
                    let Some(admission) = admission else { break };
                    let id = admission.session.id();
                    let result = self.registry.admit(admission.session).await.map(|_| ());
                    let admitted = result.is_ok();
                    // Caller gave up while waiting: nobody will run the session.
                    if admission.reply.send(result).is_err() && admitted {
                        self.registry.evict(&id).await;
                    }
                }
                Some(message) = routes.recv() => {
                    self.route(message).await;
                }
                Some(query) = queries.recv() => {
                    self.answer(query).await;
                }
            }
        }

        // Wakes the worker pools if they are idle on an empty queue.
        self.jobs.close();
        if let Some(ping_jobs) = &self.ping_jobs {
            ping_jobs.close();
        }

        tracing::info!(
            active_connections = self.registry.len(),
            "Dispatch loop stopped"
        );
    }

    /// Serialize once, then deliver directly or fan out per shard
    async fn route(&self, message: Message) {
        let message = message.stamped();
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, kind = %message.message_type(), "Failed to encode message");
                return;
            }
        };

        if message.is_broadcast() {
            for shard in 0..self.registry.shards().len() {
                let job = BroadcastJob {
                    shard,
                    payload: payload.clone(),
                };
                if self.jobs.try_send(job).is_err() {
                    tracing::warn!(shard, "Broadcast job queue saturated, job dropped");
                }
            }
            return;
        }

        let targets = self.registry.sessions_for_user(&message.to);
        if targets.is_empty() {
            tracing::debug!(user_id = %message.to, "No sessions for routed message");
        }
        for session in targets {
            self.policy.deliver(&session, payload.clone()).await;
        }
    }

    async fn answer(&self, query: Query) {
        match query {
            Query::Stats(reply) => {
                let stats = HubStats {
                    sessions: self.registry.len(),
                    users: self.registry.user_count(),
                    shard_sizes: self.registry.shards().sizes().await,
                };
                let _ = reply.send(stats);
            }
            Query::UserSessions(user_id, reply) => {
                let _ = reply.send(self.registry.user_session_count(&user_id));
            }
        }
    }

    /// Close and evict silent sessions; hand out ping jobs in global mode
    async fn heartbeat(&mut self) {
        let now = chrono::Utc::now().timestamp_millis();
        for session in self
            .registry
            .stale_sessions(now, self.connection_timeout_ms)
        {
            tracing::warn!(
                session_id = %session.id(),
                user_id = %session.user_id(),
                error = %GatewayError::HeartbeatTimeout,
                "Closing silent session"
            );
            session.close();
            self.registry.evict(&session.id()).await;
        }

        if let Some(ping_jobs) = &self.ping_jobs {
            for shard in 0..self.registry.shards().len() {
                if ping_jobs.try_send(shard).is_err() {
                    tracing::debug!(shard, "Ping job queue full, skipping shard");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::messages::{Fields, Payload};
    use tracing_test::traced_test;

    fn dispatcher(
        shard_count: usize,
        job_capacity: usize,
    ) -> (Dispatcher, async_channel::Receiver<BroadcastJob>) {
        let (jobs, queued) = async_channel::bounded(job_capacity);
        let dispatcher = Dispatcher {
            registry: Registry::new(
                Arc::new(ShardSet::new(shard_count)),
                Arc::new(AtomicUsize::new(0)),
                10,
            ),
            policy: BackpressurePolicy::new(true, false, Duration::from_millis(50)),
            jobs,
            ping_jobs: None,
            heartbeat_interval: Duration::from_secs(30),
            connection_timeout_ms: 60_000,
        };
        (dispatcher, queued)
    }

    fn broadcast() -> Message {
        Message::new(Payload::Notification(Fields::new()))
    }

    #[tokio::test]
    async fn test_broadcast_enqueues_one_job_per_shard() {
        let (dispatcher, queued) = dispatcher(4, 16);
        dispatcher.route(broadcast()).await;

        let shards: Vec<usize> = std::iter::from_fn(|| queued.try_recv().ok())
            .map(|job| job.shard)
            .collect();
        assert_eq!(shards, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_saturated_job_queue_drops_without_retry() {
        let (dispatcher, queued) = dispatcher(4, 1);
        dispatcher.route(broadcast()).await;

        assert!(logs_contain("Broadcast job queue saturated, job dropped"));
        assert_eq!(queued.try_recv().map(|job| job.shard).ok(), Some(0));

        // Freed capacity is not backfilled with the dropped jobs.
        tokio::task::yield_now().await;
        assert!(queued.is_empty());
    }

    #[tokio::test]
    async fn test_routed_message_skips_dead_sessions() {
        let (mut dispatcher, _queued) = dispatcher(1, 4);
        let (live, mut live_rx) = Session::new("u1", 4, None);
        let (dead, mut dead_rx) = Session::new("u1", 4, None);
        let (live, dead) = (Arc::new(live), Arc::new(dead));
        dispatcher.registry.admit(live).await.unwrap();
        dispatcher.registry.admit(dead.clone()).await.unwrap();
        dead.mark_dead();

        dispatcher.route(broadcast().with_to("u1")).await;

        assert!(live_rx.try_recv().is_ok());
        assert!(dead_rx.try_recv().is_err());
    }

    #[test]
    fn test_saturating_millis() {
        assert_eq!(saturating_millis(Duration::from_secs(60)), 60_000);
        assert_eq!(saturating_millis(Duration::MAX), i64::MAX);
    }
}
