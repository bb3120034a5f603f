use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Identity returned by the backend user-info endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserData {
    pub id: i64,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInfoOutcome {
    Authorized(UserData),
    /// The provider answered and rejected the credential
    Unauthorized,
}

/// Anything other than a definitive answer from the provider.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider unreachable: {0}")]
    Transport(String),

    #[error("authentication failed with status: {0}")]
    Status(u16),

    #[error("invalid user-info response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn user_info(&self, token: &str) -> Result<UserInfoOutcome, IdentityError>;
}

pub struct HttpIdentityProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpIdentityProvider {
    pub fn new(base_url: &str, user_info_path: &str, timeout: Duration) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                user_info_path.trim_start_matches('/')
            ),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn user_info(&self, token: &str) -> Result<UserInfoOutcome, IdentityError> {
        let response = self
            .client
            .get(&self.endpoint)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(status = status.as_u16(), "user-info response");

        match status {
            StatusCode::OK => response
                .json::<UserData>()
                .await
                .map(UserInfoOutcome::Authorized)
                .map_err(|e| IdentityError::Decode(e.to_string())),
            StatusCode::UNAUTHORIZED => Ok(UserInfoOutcome::Unauthorized),
            other => Err(IdentityError::Status(other.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider(server: &MockServer) -> HttpIdentityProvider {
        HttpIdentityProvider::new(&server.uri(), "/user-info", Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_endpoint_join() {
        let p = HttpIdentityProvider::new("http://backend:8000/", "user-info", Duration::from_secs(1))
            .unwrap();
        assert_eq!(p.endpoint(), "http://backend:8000/user-info");
    }

    #[tokio::test]
    async fn test_authorized_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user-info"))
            .and(header("authorization", "Bearer good-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": 42, "email": "ada@example.com"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = provider(&server).await.user_info("good-token").await.unwrap();
        assert_eq!(
            outcome,
            UserInfoOutcome::Authorized(UserData {
                id: 42,
                email: "ada@example.com".into()
            })
        );
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user-info"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let outcome = provider(&server).await.user_info("expired").await.unwrap();
        assert_eq!(outcome, UserInfoOutcome::Unauthorized);
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = provider(&server).await.user_info("token").await.unwrap_err();
        assert!(matches!(err, IdentityError::Status(500)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = provider(&server).await.user_info("token").await.unwrap_err();
        assert!(matches!(err, IdentityError::Decode(_)));
    }
}
