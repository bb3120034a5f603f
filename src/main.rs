use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use notify_hub::{config::Settings, logging, metrics::MetricsMiddleware, routes, state::AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;
    logging::init_tracing(&settings.logging);

    if settings.fake_auth_enabled() {
        tracing::warn!("Development auth bypass is enabled; do not run this in production");
    }
    if settings.allow_all_origins() {
        tracing::warn!("All WebSocket origins are accepted");
    }

    let (host, port) = settings.bind_address();
    let state = AppState::from_settings(settings).context("failed to build application state")?;

    tracing::info!(
        host = %host,
        port,
        mode = ?state.settings.environment.mode,
        max_clients_per_team = state.settings.limits.max_clients_per_team,
        "Starting notify-hub"
    );

    HttpServer::new(move || {
        let api_key = state.settings.security.api_key.clone();

        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .wrap(routes::cors(&state.settings))
            .wrap(MetricsMiddleware)
            .configure(|cfg| routes::configure(cfg, &api_key))
    })
    .bind((host.as_str(), port))
    .with_context(|| format!("failed to bind {host}:{port}"))?
    .run()
    .await
    .context("HTTP server error")
}
