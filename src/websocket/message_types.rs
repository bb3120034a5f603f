use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// First frame a client must send on a fresh connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl AuthMessage {
    pub const TYPE: &'static str = "auth";

    pub fn is_auth(&self) -> bool {
        self.kind == Self::TYPE
    }
}

/// Roster entry for presence frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    pub joined_at: DateTime<Utc>,
}

/// Frames produced by the hub itself (notifications are sent as [`crate::models::Message`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "auth_success")]
    AuthSuccess { message: String },

    #[serde(rename = "auth_error")]
    AuthError { message: String },

    #[serde(rename = "userJoined", rename_all = "camelCase")]
    UserJoined {
        user_id: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        display_name: String,
        team_id: String,
    },

    #[serde(rename = "userLeft", rename_all = "camelCase")]
    UserLeft {
        user_id: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        display_name: String,
        team_id: String,
    },

    #[serde(rename = "onlineUsers", rename_all = "camelCase")]
    OnlineUsers {
        users: Vec<MemberInfo>,
        team_id: String,
    },
}

impl ServerFrame {
    pub fn auth_success() -> Self {
        ServerFrame::AuthSuccess {
            message: "Successfully authenticated".to_string(),
        }
    }

    pub fn auth_error(message: impl Into<String>) -> Self {
        ServerFrame::AuthError {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Events an authenticated client may send. Relay events are forwarded verbatim,
/// always within the sender's own team.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "userMessage")]
    UserMessage,

    #[serde(rename = "privateMessage", rename_all = "camelCase")]
    PrivateMessage {
        #[serde(default)]
        recipient_id: String,
    },

    #[serde(rename = "typingStart", rename_all = "camelCase")]
    TypingStart {
        #[serde(default)]
        recipient_id: String,
    },

    #[serde(rename = "typingStop", rename_all = "camelCase")]
    TypingStop {
        #[serde(default)]
        recipient_id: String,
    },

    #[serde(rename = "getOnlineUsers")]
    GetOnlineUsers,

    #[serde(rename = "updateDisplayName", rename_all = "camelCase")]
    UpdateDisplayName {
        #[serde(default)]
        display_name: String,
    },
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_auth_message_decoding() {
        let msg: AuthMessage = serde_json::from_str(
            r#"{"type":"auth","userId":"u1","teamId":"t1","token":"abc","displayName":"Ada"}"#,
        )
        .unwrap();
        assert!(msg.is_auth());
        assert_eq!(msg.user_id, "u1");
        assert_eq!(msg.team_id, "t1");
        assert_eq!(msg.display_name.as_deref(), Some("Ada"));

        let other: AuthMessage = serde_json::from_str(r#"{"type":"hello"}"#).unwrap();
        assert!(!other.is_auth());
    }

    #[test]
    fn test_server_frame_tags() {
        let value: Value = serde_json::from_str(&ServerFrame::auth_success().to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "auth_success");

        let value: Value =
            serde_json::from_str(&ServerFrame::auth_error("invalid token").to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "auth_error");
        assert_eq!(value["message"], "invalid token");

        let joined = ServerFrame::UserJoined {
            user_id: "u1".into(),
            display_name: "Ada".into(),
            team_id: "t1".into(),
        };
        let value: Value = serde_json::from_str(&joined.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "userJoined");
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["teamId"], "t1");
    }

    #[test]
    fn test_client_events() {
        assert_eq!(
            ClientEvent::from_json(r#"{"type":"userMessage","content":"hi","teamId":"other"}"#).unwrap(),
            ClientEvent::UserMessage
        );
        assert_eq!(
            ClientEvent::from_json(r#"{"type":"privateMessage","recipientId":"u2"}"#).unwrap(),
            ClientEvent::PrivateMessage {
                recipient_id: "u2".into()
            }
        );
        assert_eq!(
            ClientEvent::from_json(r#"{"type":"typingStart","userId":"u1"}"#).unwrap(),
            ClientEvent::TypingStart {
                recipient_id: String::new()
            }
        );
        assert_eq!(
            ClientEvent::from_json(r#"{"type":"updateDisplayName","displayName":"Bob"}"#).unwrap(),
            ClientEvent::UpdateDisplayName {
                display_name: "Bob".into()
            }
        );
        assert!(ClientEvent::from_json(r#"{"type":"dance"}"#).is_err());
        assert!(ClientEvent::from_json("not json").is_err());
    }
}
