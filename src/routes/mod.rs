use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Method},
    middleware,
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    error::Result,
    state::AppState,
    utils::middleware::{auth_middleware, request_id_middleware, request_logging_middleware},
};

pub mod blogs;
pub mod comments;
pub mod notifications;
pub mod users;
pub mod websocket;

/// The full HTTP surface with every layer applied.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_origin(
            state
                .config
                .cors_allowed_origins
                .split(',')
                .filter_map(|origin| origin.trim().parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        );

    let api = Router::new()
        .merge(users::router())
        .merge(blogs::router())
        .merge(comments::router())
        .merge(notifications::router())
        .merge(websocket::router());

    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .nest("/api/v1", api)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(DefaultBodyLimit::max(state.config.max_upload_size))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    state.db.ping().await?;
    Ok(Json(json!({
        "success": true,
        "message": "Penstack is running!"
    })))
}
