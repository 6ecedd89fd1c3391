use crate::{error::Result, state::AppState, utils::middleware::OptionalAuth};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{delete, get, patch},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notifications", get(list_notifications).delete(delete_all_notifications))
        .route("/notifications/mark-read", patch(mark_all_read))
        .route("/notifications/:id/read", patch(mark_read))
        .route("/notifications/:id", delete(delete_notification))
}

/// 获取当前用户的通知（最新在前）
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    let list = state.notification_service.list(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Notifications fetched successfully",
        "notifications": list.notifications,
        "unreadCount": list.unread_count
    })))
}

async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    state.notification_service.mark_all_read(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "All notifications marked as read"
    })))
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path(notification_id): Path<String>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    let notification = state
        .notification_service
        .mark_read(&user.id, &notification_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Notification marked as read",
        "notification": notification
    })))
}

async fn delete_notification(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path(notification_id): Path<String>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    state
        .notification_service
        .delete(&user.id, &notification_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Notification deleted"
    })))
}

async fn delete_all_notifications(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    let deleted = state.notification_service.delete_all(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "All notifications deleted",
        "deletedCount": deleted
    })))
}
