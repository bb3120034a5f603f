//! Join/leave announcements and online rosters, layered on registry fan-out.

use super::message_types::ServerFrame;
use super::ConnectionRegistry;
use crate::auth::VerifiedIdentity;
use tracing::warn;

/// Tell the rest of the team about a new member, then send it the roster.
pub async fn announce_joined(registry: &ConnectionRegistry, identity: &VerifiedIdentity) {
    let joined = ServerFrame::UserJoined {
        user_id: identity.user_id.clone(),
        display_name: identity.presence_name(),
        team_id: identity.team_id.clone(),
    };
    if let Some(payload) = encode(&joined) {
        registry
            .broadcast_to_team_except(&identity.team_id, &identity.user_id, payload)
            .await;
    }

    if let Some(roster) = roster_frame(registry, &identity.team_id).await {
        registry
            .send_to_user(&identity.team_id, &identity.user_id, roster)
            .await;
    }
}

pub async fn announce_left(registry: &ConnectionRegistry, identity: &VerifiedIdentity) {
    let left = ServerFrame::UserLeft {
        user_id: identity.user_id.clone(),
        display_name: identity.presence_name(),
        team_id: identity.team_id.clone(),
    };
    if let Some(payload) = encode(&left) {
        registry.broadcast_to_team(&identity.team_id, payload).await;
    }
}

/// Serialized `onlineUsers` frame for `team_id`.
pub async fn roster_frame(registry: &ConnectionRegistry, team_id: &str) -> Option<String> {
    let frame = ServerFrame::OnlineUsers {
        users: registry.roster(team_id).await,
        team_id: team_id.to_string(),
    };
    encode(&frame)
}

pub async fn broadcast_roster(registry: &ConnectionRegistry, team_id: &str) -> usize {
    match roster_frame(registry, team_id).await {
        Some(roster) => registry.broadcast_to_team(team_id, roster).await,
        None => 0,
    }
}

fn encode(frame: &ServerFrame) -> Option<String> {
    match frame.to_json() {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "Failed to encode presence frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::SessionHandle;
    use serde_json::Value;

    fn identity(user: &str, display_name: Option<&str>) -> VerifiedIdentity {
        VerifiedIdentity {
            user_id: user.into(),
            team_id: "team_1".into(),
            email: String::new(),
            display_name: display_name.map(Into::into),
        }
    }

    #[tokio::test]
    async fn test_join_announcement_skips_newcomer() {
        let registry = ConnectionRegistry::new(100);
        let (old, mut old_rx) = SessionHandle::new(identity("old", None), 8);
        let (new, mut new_rx) = SessionHandle::new(identity("new", Some("Newbie")), 8);
        registry.register(old).await;
        registry.register(new).await;

        announce_joined(&registry, &identity("new", Some("Newbie"))).await;

        let joined: Value = serde_json::from_str(&old_rx.recv().await.unwrap()).unwrap();
        assert_eq!(joined["type"], "userJoined");
        assert_eq!(joined["displayName"], "Newbie");

        let roster: Value = serde_json::from_str(&new_rx.recv().await.unwrap()).unwrap();
        assert_eq!(roster["type"], "onlineUsers");
        assert_eq!(roster["teamId"], "team_1");
        assert_eq!(roster["users"].as_array().unwrap().len(), 2);
        assert!(new_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_uses_user_id_when_nothing_else_known() {
        let registry = ConnectionRegistry::new(100);
        let (stay, mut stay_rx) = SessionHandle::new(identity("stay", None), 8);
        registry.register(stay).await;

        announce_left(&registry, &identity("gone", None)).await;

        let left: Value = serde_json::from_str(&stay_rx.recv().await.unwrap()).unwrap();
        assert_eq!(left["type"], "userLeft");
        assert_eq!(left["displayName"], "gone");
    }

    #[tokio::test]
    async fn test_broadcast_roster_counts_recipients() {
        let registry = ConnectionRegistry::new(100);
        let (a, _a_rx) = SessionHandle::new(identity("a", None), 8);
        let (b, _b_rx) = SessionHandle::new(identity("b", None), 8);
        registry.register(a).await;
        registry.register(b).await;

        assert_eq!(broadcast_roster(&registry, "team_1").await, 2);
        assert_eq!(broadcast_roster(&registry, "empty").await, 0);
    }
}
