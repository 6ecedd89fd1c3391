use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::{
    error::{AppError, Result},
    state::AppState,
    utils::middleware::OptionalAuth,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(websocket_handler))
}

/// Browsers cannot set headers on the upgrade request, so the session
/// token may also travel as `?token=`.
#[derive(Debug, Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

/// WebSocket连接处理器
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    OptionalAuth(user): OptionalAuth,
    Query(query): Query<ConnectQuery>,
) -> Result<Response> {
    let user = match (user, query.token) {
        (Some(user), _) => user,
        (None, Some(token)) => state.auth_service.verify_session_token(&token)?,
        (None, None) => return Err(AppError::unauthorized("Authentication required")),
    };

    info!("WebSocket upgrade request from user: {}", user.id);

    let hub = state.push_hub.clone();
    let user_id = user.id;
    Ok(ws.on_upgrade(move |socket| async move { hub.serve(socket, user_id).await }))
}
