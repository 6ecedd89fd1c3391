use crate::{
    error::{AppError, Result},
    models::{
        transfer::{TransferAction, TransferOutcome},
        user::{
            ChangePasswordRequest, DeleteAccountRequest, GoogleAuthRequest, SigninRequest,
            SignupRequest, TransferAccountRequest, UpdateProfileRequest, UploadedFile,
            UserListQuery, VisibilityRequest,
        },
    },
    state::AppState,
    utils::middleware::OptionalAuth,
};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // 公开路由
        .route("/signup", post(signup))
        .route("/signin", post(signin))
        .route("/google-auth", post(google_auth))
        .route("/verify-email/:token", get(verify_email))
        .route("/users", get(list_users))
        .route("/confirm-transfer/:action/:token", get(confirm_transfer))
        // GET 按用户名查询，PATCH/DELETE 按用户 id
        .route(
            "/users/:id",
            get(get_user_profile).patch(update_profile).delete(delete_account),
        )
        // 需要认证的路由
        .route("/follow/:id", patch(toggle_follow))
        .route("/change-saved-liked-blog-visibility", patch(change_visibility))
        .route("/change-password", patch(change_password))
        .route("/transfer-account", post(transfer_account))
}

async fn signup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignupRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let outcome = state.user_service.signup(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": outcome.message()
        })),
    ))
}

async fn signin(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SigninRequest>,
) -> Result<Json<Value>> {
    let user = state.user_service.signin(request).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Logged in successfully",
        "user": user
    })))
}

async fn google_auth(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GoogleAuthRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let (user, created) = state.user_service.google_auth(request).await?;
    let (status, message) = if created {
        (StatusCode::CREATED, "Account created successfully")
    } else {
        (StatusCode::OK, "Logged in successfully")
    };
    Ok((
        status,
        Json(json!({
            "success": true,
            "message": message,
            "user": user
        })),
    ))
}

async fn verify_email(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<Value>> {
    state.user_service.verify_email(&token).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Email verified successfully"
    })))
}

/// 获取用户列表
async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Value>> {
    debug!("Fetching users list with query: {:?}", query);
    let users = state.user_service.list(query.search.as_deref()).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Users fetched successfully",
        "users": users
    })))
}

async fn get_user_profile(
    State(state): State<Arc<AppState>>,
    OptionalAuth(viewer): OptionalAuth,
    Path(username): Path<String>,
) -> Result<Json<Value>> {
    let viewer = viewer.as_ref().map(|u| u.id.as_str());
    let user = state.user_service.profile(&username, viewer).await?;
    Ok(Json(json!({
        "success": true,
        "message": "User fetched successfully",
        "user": user
    })))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::BadRequest(format!("Invalid multipart body: {}", e))
}

async fn read_profile_form(mut multipart: Multipart) -> Result<UpdateProfileRequest> {
    let mut request = UpdateProfileRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "image" {
            let file_name = field.file_name().unwrap_or("avatar").to_string();
            let bytes = field.bytes().await.map_err(multipart_error)?.to_vec();
            if !bytes.is_empty() {
                request.image = Some(UploadedFile { file_name, bytes });
            }
            continue;
        }

        let text = field.text().await.map_err(multipart_error)?;
        match name.as_str() {
            "name" => request.name = Some(text),
            "username" => request.username = Some(text),
            "bio" => request.bio = Some(text),
            "profilePic" => request.profile_pic = Some(text),
            other => debug!("Ignoring multipart field {}", other),
        }
    }

    Ok(request)
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path(user_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<Value>> {
    let actor = auth.required()?;
    let request = read_profile_form(multipart).await?;
    let user = state
        .user_service
        .update_profile(&actor.id, &user_id, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Profile updated successfully",
        "user": user.summary()
    })))
}

async fn delete_account(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path(user_id): Path<String>,
    request: Option<Json<DeleteAccountRequest>>,
) -> Result<Json<Value>> {
    let actor = auth.required()?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let report = state
        .account_service
        .delete_account(&actor.id, &user_id, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Account deleted successfully",
        "deletedBlogs": report.deleted_blogs,
        "deletedComments": report.deleted_comments
    })))
}

async fn toggle_follow(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path(target_id): Path<String>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    let outcome = state
        .relationship_service
        .toggle_follow(&user.id, &target_id)
        .await?;

    let message = if outcome.active {
        "Followed successfully"
    } else {
        "Unfollowed successfully"
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "isFollowing": outcome.active
    })))
}

async fn change_visibility(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Json(request): Json<VisibilityRequest>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    let user = state.user_service.set_visibility(&user.id, request).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Visibility updated successfully",
        "showLikedBlogs": user.show_liked_blogs,
        "showSavedBlogs": user.show_saved_blogs
    })))
}

async fn change_password(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    state.user_service.change_password(&user.id, request).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Password changed successfully"
    })))
}

async fn transfer_account(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Json(request): Json<TransferAccountRequest>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    let target = state.account_service.request_transfer(&user.id, request).await?;
    info!("Transfer request sent from {} to {}", user.id, target.id);

    Ok(Json(json!({
        "success": true,
        "message": format!("Transfer request sent to {}", target.email)
    })))
}

async fn confirm_transfer(
    State(state): State<Arc<AppState>>,
    Path((action, token)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let action: TransferAction = action.parse()?;
    let outcome = state.account_service.confirm_transfer(action, &token).await?;

    let message = match &outcome {
        TransferOutcome::Accepted(_) => "Account transferred successfully",
        TransferOutcome::Rejected => "Account transfer rejected",
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "result": outcome
    })))
}
