use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::session::Session;
use crate::websocket::transport;
use actix_web::{http::header::ORIGIN, web, HttpRequest, HttpResponse};
use tracing::{debug, warn};

/// Upgrade to WebSocket and hand the connection to a session driver.
///
/// Origin and global capacity are checked before the upgrade; everything
/// after that (handshake, team cap) happens on the socket.
pub async fn ws_handler(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    // A missing Origin header is only accepted when any origin is.
    let origin = req
        .headers()
        .get(ORIGIN)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    if !state.settings.origin_allowed(origin) {
        warn!(origin = %origin, "WebSocket origin rejected");
        return Err(AppError::Forbidden("Origin not allowed".into()).into());
    }

    let total = state.registry.member_count().await;
    let limit = state.settings.max_total_clients();
    if total >= limit {
        warn!(total, limit, "Global client limit reached");
        return Err(AppError::ServiceUnavailable("Server at capacity".into()).into());
    }

    let (response, ws_session, msg_stream) = actix_ws::handle(&req, body)?;
    let (stream, sink) = transport::split(ws_session, msg_stream);

    let session = Session::new(
        stream,
        sink,
        state.registry.clone(),
        state.gateway.clone(),
        state.session_config,
    );

    actix_web::rt::spawn(async move {
        match session.run().await {
            Ok(cause) => debug!(cause = ?cause, "Session driver finished"),
            Err(e) => debug!(error = %e, "Session ended before activation"),
        }
    });

    Ok(response)
}
