use crate::{error::AppError, services::auth::AuthUser, state::AppState};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, info};

/// 认证中间件
///
/// A valid bearer session token puts an [`AuthUser`] into the request
/// extensions. Missing or invalid tokens are not rejected here; handlers
/// that need a caller use [`OptionalAuth`] and fail with 401 themselves.
pub async fn auth_middleware(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next<Body>,
) -> Result<Response, AppError> {
    if let Some(token) = bearer_token(&headers) {
        match app_state.auth_service.verify_session_token(token) {
            Ok(user) => {
                debug!("Authenticated user: {} ({})", user.id, user.email);
                request.extensions_mut().insert(user);
            }
            Err(e) => {
                debug!("Session token rejected: {}", e);
            }
        }
    }

    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// 请求日志中间件
pub async fn request_logging_middleware(request: Request<Body>, next: Next<Body>) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);

    let start_time = std::time::Instant::now();

    debug!("Incoming request: {} {} from {}", method, uri, client_ip);

    let response = next.run(request).await;

    info!(
        "Request completed: {} {} {} - {}ms",
        method,
        uri,
        response.status().as_u16(),
        start_time.elapsed().as_millis()
    );

    response
}

/// 请求 ID 中间件
pub async fn request_id_middleware(mut request: Request<Body>, next: Next<Body>) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

/// 获取客户端 IP 地址
fn get_client_ip(request: &Request<Body>) -> String {
    let headers = request.headers();

    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
    {
        return ip.trim().to_string();
    }

    if let Some(ip) = headers.get("x-real-ip").and_then(|h| h.to_str().ok()) {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<SocketAddr>()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// 请求 ID 包装器
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// 可选认证提取器
pub struct OptionalAuth(pub Option<AuthUser>);

impl OptionalAuth {
    /// The caller, or 401.
    pub fn required(self) -> Result<AuthUser, AppError> {
        self.0
            .ok_or_else(|| AppError::unauthorized("Authentication required"))
    }
}

#[async_trait::async_trait]
impl<S> axum::extract::FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts.extensions.get::<AuthUser>().cloned();
        Ok(OptionalAuth(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let request = Request::builder()
            .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(get_client_ip(&request), "10.0.0.1");

        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(get_client_ip(&bare), "unknown");
    }
}
