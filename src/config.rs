//! Hub configuration
//!
//! Loading order (later sources win):
//! 1. Field defaults
//! 2. YAML file at `CONFIG_PATH` (default `local_settings.yaml`, optional)
//! 3. Environment variables prefixed `HUB_`, sections split by `__`
//!    (e.g. `HUB_SECURITY__API_KEY`, `HUB_ENVIRONMENT__MODE`)

use crate::error::AppError;
use crate::websocket::transport::MAX_FRAME_SIZE;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "local_settings.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub websocket: WebSocketSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub limits: LimitsSettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub environment: EnvironmentSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins accepted for the WebSocket upgrade and CORS; `*` matches any
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    #[serde(default = "default_write_wait")]
    pub write_wait_secs: u64,
    #[serde(default = "default_pong_wait")]
    pub pong_wait_secs: u64,
    /// Derived from `pong_wait_secs` when unset
    #[serde(default)]
    pub ping_period_secs: Option<u64>,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_read_deadline")]
    pub read_deadline_secs: u64,
    /// Broadcast join/leave/roster frames to team members
    #[serde(default = "default_true")]
    pub presence: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecuritySettings {
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_backend_url")]
    pub url: String,
    #[serde(default = "default_user_info_path")]
    pub user_info_path: String,
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSettings {
    #[serde(default = "default_max_clients_per_team")]
    pub max_clients_per_team: usize,
    #[serde(default = "default_send_channel_buffer")]
    pub send_channel_buffer: usize,
    /// Global session cap checked before the upgrade; defaults to 100 teams' worth
    #[serde(default)]
    pub max_total_clients: Option<usize>,
    /// Bounded wait for a full queue on direct sends (0 = never wait)
    #[serde(default)]
    pub send_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_cb_threshold")]
    pub threshold: u32,
    #[serde(default = "default_cb_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    #[default]
    Production,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentSettings {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub allow_all_origins: bool,
    #[serde(default)]
    pub enable_fake_auth: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_write_wait() -> u64 {
    10
}

fn default_pong_wait() -> u64 {
    60
}

fn default_max_message_size() -> usize {
    MAX_FRAME_SIZE
}

fn default_read_deadline() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_user_info_path() -> String {
    "/user-info".to_string()
}

fn default_backend_timeout() -> u64 {
    10
}

fn default_max_clients_per_team() -> usize {
    1000
}

fn default_send_channel_buffer() -> usize {
    256
}

fn default_cb_threshold() -> u32 {
    5
}

fn default_cb_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            write_wait_secs: default_write_wait(),
            pong_wait_secs: default_pong_wait(),
            ping_period_secs: None,
            max_message_size: default_max_message_size(),
            read_deadline_secs: default_read_deadline(),
            presence: true,
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            user_info_path: default_user_info_path(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

impl Default for LimitsSettings {
    fn default() -> Self {
        Self {
            max_clients_per_team: default_max_clients_per_team(),
            send_channel_buffer: default_send_channel_buffer(),
            max_total_clients: None,
            send_timeout_ms: 0,
        }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            threshold: default_cb_threshold(),
            timeout_secs: default_cb_timeout(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

impl Settings {
    /// Load from `.env`, the YAML file named by `CONFIG_PATH` and `HUB_*` variables.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, AppError> {
        let builder = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("HUB")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .try_parsing(true),
            );

        let settings: Settings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AppError::Config(format!("failed to load configuration: {e}")))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.security.api_key.trim().is_empty() {
            return Err(AppError::Config("security.api_key is required".into()));
        }
        if self.backend.url.trim().is_empty() {
            return Err(AppError::Config("backend.url is required".into()));
        }
        if self.websocket.pong_wait_secs == 0 {
            return Err(AppError::Config("websocket.pong_wait_secs must be positive".into()));
        }
        if self.ping_period() >= self.pong_wait() {
            return Err(AppError::Config(
                "websocket.ping_period_secs must be shorter than pong_wait_secs".into(),
            ));
        }
        if self.websocket.max_message_size == 0 || self.websocket.max_message_size > MAX_FRAME_SIZE {
            return Err(AppError::Config(format!(
                "websocket.max_message_size must be between 1 and {MAX_FRAME_SIZE} bytes"
            )));
        }
        if self.limits.send_channel_buffer == 0 {
            return Err(AppError::Config("limits.send_channel_buffer must be positive".into()));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }

    pub fn is_development(&self) -> bool {
        self.environment.mode == Mode::Development
    }

    /// The bypass token is only honoured in development mode.
    pub fn fake_auth_enabled(&self) -> bool {
        self.environment.enable_fake_auth && self.is_development()
    }

    pub fn allow_all_origins(&self) -> bool {
        self.environment.allow_all_origins || self.is_development()
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allow_all_origins()
            || self
                .server
                .allowed_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed == origin)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.websocket.write_wait_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.websocket.pong_wait_secs)
    }

    pub fn ping_period(&self) -> Duration {
        match self.websocket.ping_period_secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => self.pong_wait() * 9 / 10,
        }
    }

    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.websocket.read_deadline_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker.timeout_secs)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        (self.limits.send_timeout_ms > 0).then(|| Duration::from_millis(self.limits.send_timeout_ms))
    }

    pub fn max_total_clients(&self) -> usize {
        self.limits
            .max_total_clients
            .unwrap_or(self.limits.max_clients_per_team.saturating_mul(100))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            websocket: WebSocketSettings::default(),
            security: SecuritySettings::default(),
            backend: BackendSettings::default(),
            limits: LimitsSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            logging: LoggingSettings::default(),
            environment: EnvironmentSettings::default(),
        }
    }
}
