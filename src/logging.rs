use crate::config::{LogFormat, LoggingSettings};
use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` wins over `logging.level` when set.
pub fn init_tracing(settings: &LoggingSettings) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},actix_web=info", settings.level)));

    match settings.format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(false)
            .init(),
        LogFormat::Text => fmt().with_env_filter(env_filter).with_target(false).init(),
    }
}
