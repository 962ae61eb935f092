//! Authoritative session indices
//!
//! The registry is owned by the dispatch loop and mutated nowhere else, so
//! `sessions` and `users` need no locks of their own. Shards are shared with
//! the worker pools and carry their own per-shard locks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::session::{Session, SessionId};
use super::shard::ShardSet;
use crate::error::{GatewayError, GatewayResult};

#[derive(Debug)]
pub struct Registry {
    sessions: HashMap<SessionId, Arc<Session>>,
    users: HashMap<String, HashSet<SessionId>>,
    shards: Arc<ShardSet>,
    count: Arc<AtomicUsize>,
    max_connections: usize,
}

impl Registry {
    pub fn new(shards: Arc<ShardSet>, count: Arc<AtomicUsize>, max_connections: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            users: HashMap::new(),
            shards,
            count,
            max_connections,
        }
    }

    /// Admit a session, returning the shard it was placed in
    ///
    /// Capacity is checked before anything is mutated; a rejected session
    /// leaves every index untouched.
    pub async fn admit(&mut self, session: Arc<Session>) -> GatewayResult<usize> {
        let active = self.count.load(Ordering::Acquire);
        if active >= self.max_connections {
            tracing::warn!(
                user_id = %session.user_id(),
                active_connections = active,
                max_connections = self.max_connections,
                "Connection limit reached, rejecting session"
            );
            return Err(GatewayError::AdmissionRejected {
                max: self.max_connections,
            });
        }

        let id = session.id();
        self.sessions.insert(id, session.clone());
        self.count.fetch_add(1, Ordering::AcqRel);

        if !session.is_anonymous() {
            self.users
                .entry(session.user_id().to_string())
                .or_default()
                .insert(id);
        }

        let shard = self.shards.insert(session.clone()).await;

        tracing::info!(
            session_id = %id,
            user_id = %session.user_id(),
            shard,
            active_connections = self.count.load(Ordering::Acquire),
            "Session admitted"
        );

        Ok(shard)
    }

    /// Remove a session from every index and close its outbound queue
    ///
    /// Unknown ids are ignored, so evicting twice is harmless.
    pub async fn evict(&mut self, id: &SessionId) -> Option<Arc<Session>> {
        let session = self.sessions.remove(id)?;
        self.count.fetch_sub(1, Ordering::AcqRel);
        self.shards.remove(id).await;

        if let Some(ids) = self.users.get_mut(session.user_id()) {
            ids.remove(id);
            if ids.is_empty() {
                self.users.remove(session.user_id());
            }
        }

        session.mark_dead();
        session.outbound().close();

        tracing::info!(
            session_id = %id,
            user_id = %session.user_id(),
            active_connections = self.count.load(Ordering::Acquire),
            "Session evicted"
        );

        Some(session)
    }

    /// Live sessions of a user; empty for unknown (or anonymous) users
    ///
    /// Sessions already marked dead but not yet evicted are skipped.
    pub fn sessions_for_user(&self, user_id: &str) -> Vec<Arc<Session>> {
        self.users
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.sessions.get(id))
                    .filter(|session| session.is_alive())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn user_session_count(&self, user_id: &str) -> usize {
        self.users.get(user_id).map_or(0, HashSet::len)
    }

    /// Sessions with no liveness signal for longer than `timeout_ms`
    pub fn stale_sessions(&self, now_ms: i64, timeout_ms: i64) -> Vec<Arc<Session>> {
        self.sessions
            .values()
            .filter(|session| session.is_stale(now_ms, timeout_ms))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn shards(&self) -> &ShardSet {
        &self.shards
    }
}
