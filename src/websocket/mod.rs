use crate::auth::VerifiedIdentity;
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{
    mpsc::{self, error::TrySendError, Receiver, Sender},
    RwLock,
};
use uuid::Uuid;

pub mod message_types;
pub mod presence;
pub mod session;
pub mod transport;

use message_types::MemberInfo;

/// Unique identifier for one physical connection
///
/// Lets unregister tell a superseded session apart from the one that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Registry-side view of a session. Holds the only sender of the outbound
/// queue, so dropping the handle closes the queue.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    identity: VerifiedIdentity,
    joined_at: DateTime<Utc>,
    sender: Sender<String>,
}

impl SessionHandle {
    /// Create a handle plus the receiving end of its bounded outbound queue.
    pub fn new(identity: VerifiedIdentity, capacity: usize) -> (Self, Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: SessionId::new(),
            identity,
            joined_at: Utc::now(),
            sender,
        };
        (handle, receiver)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> &VerifiedIdentity {
        &self.identity
    }

    fn member_info(&self) -> MemberInfo {
        MemberInfo {
            user_id: self.identity.user_id.clone(),
            display_name: self.identity.presence_name(),
            email: self.identity.email.clone(),
            joined_at: self.joined_at,
        }
    }

    fn try_enqueue(&self, payload: String) -> Result<(), TrySendError<String>> {
        self.sender.try_send(payload)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Team client limit reached")]
    TeamFull { team_id: String, limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub teams: usize,
    pub total_members: usize,
}

type TeamMap = HashMap<String, HashMap<String, SessionHandle>>;

/// Team -> user -> session routing table
///
/// One `RwLock` guards the whole map: mutations take the write lock, routing
/// takes the read lock. Every enqueue is `try_send`, so no operation ever
/// waits on a recipient while holding the lock.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<TeamMap>>,
    max_per_team: usize,
    send_timeout: Option<Duration>,
}

impl ConnectionRegistry {
    pub fn new(max_per_team: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            max_per_team,
            send_timeout: None,
        }
    }

    /// Let direct sends wait up to `timeout` for queue space, outside the lock.
    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn max_per_team(&self) -> usize {
        self.max_per_team
    }

    /// Insert `handle`, superseding any session already registered for the
    /// same (team, user). The superseded handle is dropped before returning,
    /// which closes its queue. Returns the superseded session id.
    pub async fn register(&self, handle: SessionHandle) -> Option<SessionId> {
        let mut guard = self.inner.write().await;
        Self::insert(&mut guard, handle)
    }

    /// Capacity check and registration in one critical section. A reconnect
    /// that supersedes the same user never counts against the cap.
    pub async fn try_register(&self, handle: SessionHandle) -> Result<Option<SessionId>, RegistryError> {
        let mut guard = self.inner.write().await;

        let team_id = &handle.identity.team_id;
        if let Some(members) = guard.get(team_id) {
            let replacing = members.contains_key(&handle.identity.user_id);
            if !replacing && members.len() >= self.max_per_team {
                tracing::warn!(
                    team_id = %team_id,
                    limit = self.max_per_team,
                    "Team client limit reached"
                );
                return Err(RegistryError::TeamFull {
                    team_id: team_id.clone(),
                    limit: self.max_per_team,
                });
            }
        }

        Ok(Self::insert(&mut guard, handle))
    }

    fn insert(map: &mut TeamMap, handle: SessionHandle) -> Option<SessionId> {
        let team_id = handle.identity.team_id.clone();
        let user_id = handle.identity.user_id.clone();
        let session_id = handle.id;

        let members = map.entry(team_id.clone()).or_default();
        let previous = members.insert(user_id.clone(), handle);
        let team_size = members.len();

        let superseded = previous.map(|old| {
            tracing::info!(
                team_id = %team_id,
                user_id = %user_id,
                old_session = %old.id,
                new_session = %session_id,
                "Superseding existing session"
            );
            old.id
        });

        if superseded.is_none() {
            metrics::session_registered();
        }

        tracing::info!(
            team_id = %team_id,
            user_id = %user_id,
            session_id = %session_id,
            team_size,
            "Client registered"
        );

        superseded
    }

    /// Remove the session if it is still the one registered for (team, user).
    ///
    /// Returns `false` when it was already removed or superseded; the entry is
    /// left untouched in that case.
    pub async fn unregister(&self, team_id: &str, user_id: &str, session_id: SessionId) -> bool {
        let mut guard = self.inner.write().await;

        let Some(members) = guard.get_mut(team_id) else {
            return false;
        };
        match members.get(user_id) {
            Some(current) if current.id == session_id => {}
            _ => return false,
        }

        members.remove(user_id);
        let now_empty = members.is_empty();
        if now_empty {
            guard.remove(team_id);
            tracing::debug!(team_id = %team_id, "Removed empty team");
        }
        metrics::session_unregistered();

        tracing::info!(
            team_id = %team_id,
            user_id = %user_id,
            session_id = %session_id,
            "Client unregistered"
        );
        true
    }

    /// True while `team_id` is below the per-team cap.
    pub async fn can_admit(&self, team_id: &str) -> bool {
        let guard = self.inner.read().await;
        guard
            .get(team_id)
            .map(|members| members.len() < self.max_per_team)
            .unwrap_or(true)
    }

    pub async fn contains(&self, team_id: &str, user_id: &str) -> bool {
        let guard = self.inner.read().await;
        guard
            .get(team_id)
            .map(|members| members.contains_key(user_id))
            .unwrap_or(false)
    }

    /// Deliver to one (team, user). Returns whether the payload was enqueued.
    pub async fn send_to_user(&self, team_id: &str, user_id: &str, payload: String) -> bool {
        let pending = {
            let guard = self.inner.read().await;
            let Some(handle) = guard.get(team_id).and_then(|members| members.get(user_id)) else {
                tracing::debug!(team_id = %team_id, user_id = %user_id, "Target user not connected");
                return false;
            };

            match handle.try_enqueue(payload) {
                Ok(()) => {
                    metrics::record_delivery(1, 0);
                    return true;
                }
                Err(TrySendError::Closed(_)) => {
                    metrics::record_delivery(0, 1);
                    return false;
                }
                Err(TrySendError::Full(payload)) => match self.send_timeout {
                    Some(timeout) => (handle.sender.clone(), payload, timeout),
                    None => {
                        tracing::warn!(
                            team_id = %team_id,
                            user_id = %user_id,
                            "Outbound queue full, dropping message"
                        );
                        metrics::record_delivery(0, 1);
                        return false;
                    }
                },
            }
        };

        let (sender, payload, timeout) = pending;
        let delivered = sender.send_timeout(payload, timeout).await.is_ok();
        if delivered {
            metrics::record_delivery(1, 0);
        } else {
            tracing::warn!(
                team_id = %team_id,
                user_id = %user_id,
                "Outbound queue still full after bounded wait, dropping message"
            );
            metrics::record_delivery(0, 1);
        }
        delivered
    }

    /// Enqueue to every member of `team_id`; full queues are skipped.
    pub async fn broadcast_to_team(&self, team_id: &str, payload: String) -> usize {
        self.broadcast_to_team_filtered(team_id, None, payload).await
    }

    /// Team broadcast that skips `except_user` (presence announcements).
    pub async fn broadcast_to_team_except(&self, team_id: &str, except_user: &str, payload: String) -> usize {
        self.broadcast_to_team_filtered(team_id, Some(except_user), payload).await
    }

    async fn broadcast_to_team_filtered(
        &self,
        team_id: &str,
        except_user: Option<&str>,
        payload: String,
    ) -> usize {
        let guard = self.inner.read().await;
        let Some(members) = guard.get(team_id) else {
            return 0;
        };

        let (delivered, dropped) = fan_out(
            members
                .iter()
                .filter(|(user_id, _)| Some(user_id.as_str()) != except_user)
                .map(|(_, handle)| handle),
            &payload,
        );
        metrics::record_delivery(delivered, dropped);

        tracing::debug!(team_id = %team_id, delivered, dropped, "Team broadcast");
        delivered
    }

    /// Enqueue to every member of every team.
    pub async fn broadcast_to_all(&self, payload: String) -> usize {
        let guard = self.inner.read().await;
        let (delivered, dropped) = fan_out(guard.values().flat_map(|members| members.values()), &payload);
        metrics::record_delivery(delivered, dropped);

        tracing::debug!(teams = guard.len(), delivered, dropped, "Global broadcast");
        delivered
    }

    pub async fn member_count(&self) -> usize {
        let guard = self.inner.read().await;
        guard.values().map(HashMap::len).sum()
    }

    pub async fn team_member_count(&self, team_id: &str) -> usize {
        let guard = self.inner.read().await;
        guard.get(team_id).map(HashMap::len).unwrap_or(0)
    }

    pub async fn health_snapshot(&self) -> HealthSnapshot {
        let guard = self.inner.read().await;
        HealthSnapshot {
            teams: guard.len(),
            total_members: guard.values().map(HashMap::len).sum(),
        }
    }

    /// Online members of `team_id`, oldest first.
    pub async fn roster(&self, team_id: &str) -> Vec<MemberInfo> {
        let guard = self.inner.read().await;
        let mut members: Vec<MemberInfo> = guard
            .get(team_id)
            .map(|members| members.values().map(SessionHandle::member_info).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.user_id.cmp(&b.user_id)));
        members
    }

    /// Returns `false` if `session_id` is no longer the registered session.
    pub async fn update_display_name(
        &self,
        team_id: &str,
        user_id: &str,
        session_id: SessionId,
        display_name: String,
    ) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get_mut(team_id).and_then(|members| members.get_mut(user_id)) {
            Some(handle) if handle.id == session_id => {
                handle.identity.display_name = Some(display_name);
                true
            }
            _ => false,
        }
    }
}

fn fan_out<'a>(handles: impl Iterator<Item = &'a SessionHandle>, payload: &str) -> (usize, usize) {
    let mut delivered = 0;
    let mut dropped = 0;
    for handle in handles {
        match handle.try_enqueue(payload.to_owned()) {
            Ok(()) => delivered += 1,
            Err(_) => dropped += 1,
        }
    }
    (delivered, dropped)
}
