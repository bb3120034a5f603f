use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let snapshot = state.registry.health_snapshot().await;

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "message": "WebSocket server is running",
        "total_teams": snapshot.teams,
        "total_clients": snapshot.total_members,
    }))
}
