use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::response::ErrorResponse;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Transaction aborted: {0}")]
    Transaction(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("File upload error: {0}")]
    FileUpload(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Validation error: {0}")]
    ValidatorError(#[from] validator::ValidationErrors),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, "AUTHENTICATION_ERROR"),
            AppError::Authorization(_) => (StatusCode::FORBIDDEN, "AUTHORIZATION_ERROR"),
            AppError::Validation(_) | AppError::ValidatorError(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            AppError::Transaction(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TRANSACTION_FAILED"),
            AppError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            AppError::FileUpload(_) => (StatusCode::BAD_GATEWAY, "FILE_UPLOAD_ERROR"),
            AppError::Email(_) => (StatusCode::BAD_GATEWAY, "EMAIL_ERROR"),
            AppError::ExternalService(_) => (StatusCode::BAD_GATEWAY, "EXTERNAL_SERVICE_ERROR"),
            AppError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            AppError::Request(_) => (StatusCode::BAD_GATEWAY, "REQUEST_ERROR"),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            AppError::Jwt(_) => (StatusCode::UNAUTHORIZED, "JWT_ERROR"),
        }
    }

    /// Message shown to the client. Domain errors carry their own text,
    /// infrastructure errors get a generic one and the raw error goes to `detail`.
    fn public_message(&self) -> String {
        match self {
            AppError::Authentication(msg)
            | AppError::Authorization(msg)
            | AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::BadRequest(msg)
            | AppError::ServiceUnavailable(msg) => msg.clone(),
            AppError::ValidatorError(_) => "Validation failed".to_string(),
            AppError::Jwt(_) => "Invalid or expired token".to_string(),
            AppError::Transaction(_) => "Operation failed, no changes were made".to_string(),
            AppError::FileUpload(_) => "Image upload failed".to_string(),
            AppError::Email(_) => "Email service error".to_string(),
            AppError::ExternalService(_) | AppError::Request(_) => {
                "External service error".to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(code, "{}", self);
        } else {
            tracing::debug!(code, "{}", self);
        }

        let body = match &self {
            AppError::ValidatorError(e) => {
                let details = e
                    .field_errors()
                    .iter()
                    .map(|(field, errors)| {
                        (
                            field.to_string(),
                            errors
                                .iter()
                                .map(|e| {
                                    e.message
                                        .as_ref()
                                        .map(|m| m.to_string())
                                        .unwrap_or_else(|| format!("invalid {}", field))
                                })
                                .collect::<Vec<_>>(),
                        )
                    })
                    .collect::<std::collections::HashMap<String, Vec<String>>>();
                ErrorResponse::with_details(
                    code,
                    self.public_message(),
                    serde_json::json!(details),
                )
            }
            // 事务失败只返回通用信息
            AppError::Transaction(_) => ErrorResponse::new(code, self.public_message()),
            _ if status.is_server_error() => {
                ErrorResponse::with_details(code, self.public_message(), serde_json::json!(self.to_string()))
            }
            _ => ErrorResponse::new(code, self.public_message()),
        };

        (status, Json(body)).into_response()
    }
}

// 便利函数，用于创建常见错误
impl AppError {
    pub fn not_found(resource: &str) -> Self {
        Self::NotFound(format!("{} not found", resource))
    }

    pub fn unauthorized(msg: &str) -> Self {
        Self::Authentication(msg.to_string())
    }

    pub fn forbidden(msg: &str) -> Self {
        Self::Authorization(msg.to_string())
    }

    pub fn bad_request(msg: &str) -> Self {
        Self::BadRequest(msg.to_string())
    }

    pub fn internal(msg: &str) -> Self {
        Self::Internal(msg.to_string())
    }

    pub fn conflict(msg: &str) -> Self {
        Self::Conflict(msg.to_string())
    }

    pub fn validation(msg: &str) -> Self {
        Self::Validation(msg.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status_and_code().0
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    async fn body_of(error: AppError) -> (StatusCode, Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn failed_transactions_stay_generic() {
        let (status, body) = body_of(AppError::Transaction("step merge-blog-sets failed".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], json!("TRANSACTION_FAILED"));
        assert_eq!(body["message"], json!("Operation failed, no changes were made"));
        assert!(body["error"].get("detail").is_none());
        assert!(!body.to_string().contains("merge-blog-sets"));
    }

    #[tokio::test]
    async fn internal_errors_carry_detail() {
        let (status, body) = body_of(AppError::Internal("boom".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], json!("Internal server error"));
        assert!(body["error"]["detail"].as_str().unwrap().contains("boom"));
    }
}
