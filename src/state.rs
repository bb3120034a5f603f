use crate::{
    auth::{AuthGateway, HttpIdentityProvider, IdentityProvider},
    config::Settings,
    error::AppError,
    websocket::{session::SessionConfig, ConnectionRegistry},
};
use resilience::presets;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub gateway: Arc<AuthGateway>,
    pub settings: Arc<Settings>,
    pub session_config: SessionConfig,
}

impl AppState {
    /// Wire the hub against the HTTP identity provider named in `backend`.
    pub fn from_settings(settings: Settings) -> Result<Self, AppError> {
        let provider = HttpIdentityProvider::new(
            &settings.backend.url,
            &settings.backend.user_info_path,
            settings.backend_timeout(),
        )
        .map_err(|e| AppError::Config(e.to_string()))?;

        tracing::info!(endpoint = %provider.endpoint(), "Identity provider configured");
        Ok(Self::with_provider(settings, Arc::new(provider)))
    }

    pub fn with_provider(settings: Settings, provider: Arc<dyn IdentityProvider>) -> Self {
        let mut service_config = presets::identity_provider_config();
        service_config.timeout.duration = settings.backend_timeout();
        service_config.circuit_breaker.failure_threshold = settings.circuit_breaker.threshold;
        service_config.circuit_breaker.timeout = settings.circuit_breaker_timeout();

        let registry = ConnectionRegistry::new(settings.limits.max_clients_per_team)
            .with_send_timeout(settings.send_timeout());
        let gateway = AuthGateway::new(provider, service_config, settings.fake_auth_enabled());

        Self {
            registry,
            gateway: Arc::new(gateway),
            session_config: SessionConfig::from_settings(&settings),
            settings: Arc::new(settings),
        }
    }
}
