use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Notification delivered to WebSocket clients (camelCase on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub notification_id: String,
    pub target_team_id: String,
    pub target_user_id: String,
    pub sender_user_id: String,
    pub message_type: String,
    pub body: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl Message {
    pub fn new(
        notification_id: impl Into<String>,
        target_team_id: impl Into<String>,
        target_user_id: impl Into<String>,
        sender_user_id: impl Into<String>,
        message_type: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            notification_id: notification_id.into(),
            target_team_id: target_team_id.into(),
            target_user_id: target_user_id.into(),
            sender_user_id: sender_user_id.into(),
            message_type: message_type.into(),
            body: body.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn from_request(req: &SendRequest) -> Self {
        Self::new(
            req.notification_id.clone(),
            req.target_team_id.clone(),
            req.target_user_id.clone(),
            req.sender_user_id.clone(),
            req.message_type.clone(),
            req.body.clone(),
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Body of `POST /send`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub notification_id: String,
    #[serde(default)]
    pub sender_user_id: String,
    #[serde(default)]
    pub target_team_id: String,
    #[serde(default)]
    pub target_user_id: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub broadcast: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTarget {
    User { team_id: String, user_id: String },
    Team(String),
    All,
}

impl SendRequest {
    /// Boundary rules applied before anything reaches the registry.
    pub fn validate(&self) -> Result<(), String> {
        if self.message_type.is_empty() {
            return Err("Missing required field: message_type".to_string());
        }
        if self.broadcast {
            if !self.target_user_id.is_empty() {
                return Err("Cannot specify target_user_id when broadcast is true".to_string());
            }
        } else if self.target_team_id.is_empty() || self.target_user_id.is_empty() {
            return Err(
                "Must specify target_team_id and target_user_id for non-broadcast messages"
                    .to_string(),
            );
        }
        Ok(())
    }

    /// Only meaningful once `validate` has passed.
    pub fn target(&self) -> DeliveryTarget {
        match (self.broadcast, self.target_team_id.is_empty()) {
            (true, true) => DeliveryTarget::All,
            (true, false) => DeliveryTarget::Team(self.target_team_id.clone()),
            (false, _) => DeliveryTarget::User {
                team_id: self.target_team_id.clone(),
                user_id: self.target_user_id.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    pub delivered: usize,
}

impl SendResponse {
    pub fn from_delivered(delivered: usize) -> Self {
        Self {
            success: delivered > 0,
            delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn request(json: &str) -> SendRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_message_uses_camel_case_on_the_wire() {
        let msg = Message::new("n-1", "team_1", "user_1", "admin", "system_alert", "hello");
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["notificationId"], "n-1");
        assert_eq!(value["targetTeamId"], "team_1");
        assert_eq!(value["targetUserId"], "user_1");
        assert_eq!(value["senderUserId"], "admin");
        assert_eq!(value["messageType"], "system_alert");
        assert!(value["timestamp"].as_i64().unwrap() > 1_600_000_000_000);
    }

    #[test]
    fn test_validate_requires_message_type() {
        let req = request(r#"{"target_team_id":"t","target_user_id":"u"}"#);
        assert!(req.validate().unwrap_err().contains("message_type"));
    }

    #[test]
    fn test_validate_broadcast_rejects_user_target() {
        let req = request(
            r#"{"message_type":"x","broadcast":true,"target_team_id":"t","target_user_id":"u"}"#,
        );
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_direct_requires_team_and_user() {
        let req = request(r#"{"message_type":"x","target_user_id":"u"}"#);
        assert!(req.validate().is_err());

        let req = request(r#"{"message_type":"x","target_team_id":"t"}"#);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_target_resolution() {
        let all = request(r#"{"message_type":"x","broadcast":true}"#);
        assert!(all.validate().is_ok());
        assert_eq!(all.target(), DeliveryTarget::All);

        let team = request(r#"{"message_type":"x","broadcast":true,"target_team_id":"t"}"#);
        assert_eq!(team.target(), DeliveryTarget::Team("t".into()));

        let user = request(r#"{"message_type":"x","target_team_id":"t","target_user_id":"u"}"#);
        assert!(user.validate().is_ok());
        assert_eq!(
            user.target(),
            DeliveryTarget::User {
                team_id: "t".into(),
                user_id: "u".into()
            }
        );
    }

    #[test]
    fn test_send_response_success_tracks_delivered() {
        assert!(!SendResponse::from_delivered(0).success);
        assert!(SendResponse::from_delivered(3).success);
    }
}
