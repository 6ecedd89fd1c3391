use crate::{
    error::Result,
    models::comment::{CreateCommentRequest, EditCommentRequest},
    state::AppState,
    utils::{middleware::OptionalAuth, validation::validate_request},
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{patch, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/blogs/comment/:id", post(add_comment).delete(delete_comment))
        .route("/comment/:parent_id/:blog_id", post(add_reply))
        .route("/blogs/edit-comment/:id", patch(edit_comment))
        .route("/blogs/like-comment/:id", post(like_comment))
}

async fn add_comment(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path(blog_id): Path<String>,
    Json(request): Json<CreateCommentRequest>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    validate_request(&request)?;

    let comment = state
        .comment_service
        .add_comment(&user.id, &blog_id, &request.comment)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Comment added successfully",
        "newComment": comment
    })))
}

async fn add_reply(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path((parent_id, blog_id)): Path<(String, String)>,
    Json(request): Json<CreateCommentRequest>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    validate_request(&request)?;

    let reply = state
        .comment_service
        .add_reply(&user.id, &parent_id, &blog_id, &request.comment)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Reply added successfully",
        "newReply": reply
    })))
}

async fn edit_comment(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path(comment_id): Path<String>,
    Json(request): Json<EditCommentRequest>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    validate_request(&request)?;

    let comment = state
        .comment_service
        .edit_comment(&user.id, &comment_id, &request.update_comment)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Comment updated successfully",
        "comment": comment
    })))
}

async fn delete_comment(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path(comment_id): Path<String>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    let removed = state.comment_service.delete_comment(&user.id, &comment_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Comment deleted successfully",
        "deletedCount": removed
    })))
}

async fn like_comment(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path(comment_id): Path<String>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    let outcome = state
        .relationship_service
        .toggle_comment_like(&user.id, &comment_id)
        .await?;

    let message = if outcome.active { "Comment liked" } else { "Comment unliked" };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "isLiked": outcome.active
    })))
}
