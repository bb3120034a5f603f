use crate::error::{AppError, AppResult};
use crate::models::{DeliveryTarget, Message, SendRequest, SendResponse};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use tracing::info;

/// POST /send
///
/// Routes a notification to one user, one team, or every connected client.
/// Delivery is best effort: `delivered` counts queues that accepted the payload.
pub async fn send_message(state: web::Data<AppState>, body: web::Bytes) -> AppResult<HttpResponse> {
    let req: SendRequest =
        serde_json::from_slice(&body).map_err(|_| AppError::BadRequest("Invalid JSON".into()))?;
    req.validate().map_err(AppError::BadRequest)?;

    let message = Message::from_request(&req);
    let payload = message.to_json().map_err(|e| {
        tracing::error!(error = %e, "Failed to encode message");
        AppError::Internal
    })?;

    let delivered = match req.target() {
        DeliveryTarget::User { team_id, user_id } => {
            let sent = state.registry.send_to_user(&team_id, &user_id, payload).await;
            info!(
                notification_id = %message.notification_id,
                team_id = %team_id,
                user_id = %user_id,
                delivered = sent,
                "Direct message"
            );
            usize::from(sent)
        }
        DeliveryTarget::Team(team_id) => {
            let count = state.registry.broadcast_to_team(&team_id, payload).await;
            info!(
                notification_id = %message.notification_id,
                team_id = %team_id,
                delivered = count,
                "Team broadcast"
            );
            count
        }
        DeliveryTarget::All => {
            let count = state.registry.broadcast_to_all(payload).await;
            info!(
                notification_id = %message.notification_id,
                delivered = count,
                "Global broadcast"
            );
            count
        }
    };

    Ok(HttpResponse::Ok().json(SendResponse::from_delivered(delivered)))
}
