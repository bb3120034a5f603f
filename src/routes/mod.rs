pub mod health;
pub mod send;
pub mod wsroute;

use crate::config::Settings;
use crate::metrics;
use crate::middleware::ApiKeyAuth;
use actix_cors::Cors;
use actix_web::http::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE};
use actix_web::web;

/// Mount every endpoint. `/send` sits behind the API key check.
pub fn configure(cfg: &mut web::ServiceConfig, api_key: &str) {
    cfg.route("/ws", web::get().to(wsroute::ws_handler))
        .service(
            web::resource("/send")
                .wrap(ApiKeyAuth::new(api_key))
                .route(web::post().to(send::send_message)),
        )
        .route("/health", web::get().to(health::health))
        .route("/metrics", web::get().to(metrics::serve_metrics));
}

/// CORS policy mirroring the WebSocket origin check.
pub fn cors(settings: &Settings) -> Cors {
    let policy = settings.clone();

    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            origin
                .to_str()
                .map(|o| policy.origin_allowed(o))
                .unwrap_or(false)
        })
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ])
        .max_age(3600)
}
