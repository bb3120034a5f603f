use super::identity_client::{IdentityProvider, UserInfoOutcome};
use crate::metrics;
use crate::websocket::message_types::AuthMessage;
use resilience::{CircuitBreaker, CircuitBreakerError, ServiceConfig, TimeoutConfig};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Reserved token accepted without a backend call when the development bypass is on.
pub const DEV_BYPASS_TOKEN: &str = "fake_development_token";

/// Identity fixed for the lifetime of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub team_id: String,
    pub email: String,
    pub display_name: Option<String>,
}

impl VerifiedIdentity {
    /// Display name, falling back to email and then user id.
    pub fn presence_name(&self) -> String {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ if !self.email.is_empty() => self.email.clone(),
            _ => self.user_id.clone(),
        }
    }
}

/// Error text is sent to the peer verbatim in the `auth_error` frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("authentication failed: {0}")]
    Failed(String),

    #[error("circuit breaker open - backend unavailable")]
    Unavailable,
}

impl AuthError {
    fn label(&self) -> &'static str {
        match self {
            AuthError::InvalidToken => "invalid_token",
            AuthError::Failed(_) => "failed",
            AuthError::Unavailable => "unavailable",
        }
    }
}

pub struct AuthGateway {
    provider: Arc<dyn IdentityProvider>,
    breaker: CircuitBreaker,
    bypass_enabled: bool,
    deadline: TimeoutConfig,
}

impl AuthGateway {
    pub fn new(provider: Arc<dyn IdentityProvider>, config: ServiceConfig, bypass_enabled: bool) -> Self {
        if bypass_enabled {
            warn!("Development auth bypass is enabled");
        }
        Self {
            provider,
            breaker: CircuitBreaker::new(config.circuit_breaker),
            bypass_enabled,
            deadline: config.timeout,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn authenticate(&self, msg: &AuthMessage) -> Result<VerifiedIdentity, AuthError> {
        let result = self.verify(msg).await;
        match &result {
            Ok(identity) => {
                metrics::record_auth_outcome("success");
                info!(
                    user_id = %identity.user_id,
                    team_id = %identity.team_id,
                    "Client authenticated"
                );
            }
            Err(e) => {
                metrics::record_auth_outcome(e.label());
                warn!(team_id = %msg.team_id, error = %e, "Authentication failed");
            }
        }
        result
    }

    async fn verify(&self, msg: &AuthMessage) -> Result<VerifiedIdentity, AuthError> {
        if msg.token == DEV_BYPASS_TOKEN {
            // The sentinel is just another bad token unless the bypass is on.
            if !self.bypass_enabled {
                return Err(AuthError::InvalidToken);
            }
            return Ok(VerifiedIdentity {
                user_id: msg.user_id.clone(),
                team_id: msg.team_id.clone(),
                email: format!("fake_{}@example.com", msg.user_id),
                display_name: msg.display_name.clone(),
            });
        }

        let provider = self.provider.clone();
        let token = msg.token.clone();
        let deadline = self.deadline;

        let outcome = self
            .breaker
            .call(|| deadline.run(async move { provider.user_info(&token).await }))
            .await
            .map_err(|e| match e {
                CircuitBreakerError::Open => AuthError::Unavailable,
                CircuitBreakerError::Inner(inner) => AuthError::Failed(inner.to_string()),
            })?;

        match outcome {
            UserInfoOutcome::Authorized(user) => Ok(VerifiedIdentity {
                user_id: user.id.to_string(),
                team_id: msg.team_id.clone(),
                email: user.email,
                display_name: msg.display_name.clone(),
            }),
            UserInfoOutcome::Unauthorized => Err(AuthError::InvalidToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity_client::{IdentityError, UserData};
    use async_trait::async_trait;
    use resilience::{CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Reply {
        Ok,
        Unauthorized,
        ServerError,
        Hang,
    }

    struct StubProvider {
        reply: Reply,
        calls: AtomicU32,
    }

    impl StubProvider {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        async fn user_info(&self, _token: &str) -> Result<UserInfoOutcome, IdentityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Ok => Ok(UserInfoOutcome::Authorized(UserData {
                    id: 7,
                    email: "seven@example.com".into(),
                })),
                Reply::Unauthorized => Ok(UserInfoOutcome::Unauthorized),
                Reply::ServerError => Err(IdentityError::Status(502)),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Err(IdentityError::Transport("unreachable".into()))
                }
            }
        }
    }

    fn gateway(provider: Arc<StubProvider>, bypass: bool) -> AuthGateway {
        let config = ServiceConfig {
            timeout: TimeoutConfig::new(Duration::from_millis(50)),
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                timeout: Duration::from_secs(60),
            },
        };
        AuthGateway::new(provider, config, bypass)
    }

    fn handshake(token: &str) -> AuthMessage {
        AuthMessage {
            kind: "auth".into(),
            user_id: "claimed".into(),
            team_id: "team_1".into(),
            token: token.into(),
            display_name: Some("Ada".into()),
        }
    }

    #[tokio::test]
    async fn test_delegated_verification_adopts_provider_identity() {
        let provider = StubProvider::new(Reply::Ok);
        let identity = gateway(provider.clone(), false)
            .authenticate(&handshake("real"))
            .await
            .unwrap();

        assert_eq!(identity.user_id, "7");
        assert_eq!(identity.team_id, "team_1");
        assert_eq!(identity.email, "seven@example.com");
        assert_eq!(identity.display_name.as_deref(), Some("Ada"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bypass_token_accepted_only_when_enabled() {
        let provider = StubProvider::new(Reply::Ok);

        let identity = gateway(provider.clone(), true)
            .authenticate(&handshake(DEV_BYPASS_TOKEN))
            .await
            .unwrap();
        assert_eq!(identity.user_id, "claimed");
        assert_eq!(identity.email, "fake_claimed@example.com");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        let err = gateway(provider.clone(), false)
            .authenticate(&handshake(DEV_BYPASS_TOKEN))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidToken);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_does_not_trip_breaker() {
        let gw = gateway(StubProvider::new(Reply::Unauthorized), false);
        for _ in 0..3 {
            assert_eq!(
                gw.authenticate(&handshake("expired")).await.unwrap_err(),
                AuthError::InvalidToken
            );
        }
        assert_eq!(gw.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dependency_failures_open_breaker() {
        let provider = StubProvider::new(Reply::ServerError);
        let gw = gateway(provider.clone(), false);

        for _ in 0..2 {
            let err = gw.authenticate(&handshake("t")).await.unwrap_err();
            assert_eq!(
                err,
                AuthError::Failed("authentication failed with status: 502".into())
            );
        }
        assert_eq!(gw.breaker().state(), CircuitState::Open);

        let err = gw.authenticate(&handshake("t")).await.unwrap_err();
        assert_eq!(err, AuthError::Unavailable);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let gw = gateway(StubProvider::new(Reply::Hang), false);
        let err = gw.authenticate(&handshake("t")).await.unwrap_err();
        assert_eq!(err, AuthError::Failed("timed out after 50ms".into()));
        assert_eq!(gw.breaker().failure_count(), 1);
    }

    #[test]
    fn test_presence_name_fallback() {
        let mut identity = VerifiedIdentity {
            user_id: "u1".into(),
            team_id: "t1".into(),
            email: "u1@example.com".into(),
            display_name: Some("Ada".into()),
        };
        assert_eq!(identity.presence_name(), "Ada");

        identity.display_name = Some(String::new());
        assert_eq!(identity.presence_name(), "u1@example.com");

        identity.email.clear();
        identity.display_name = None;
        assert_eq!(identity.presence_name(), "u1");
    }
}
