use serde::{Deserialize, Serialize};

/// 错误响应格式
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: &str, message: String) -> Self {
        Self {
            success: false,
            message,
            error: ErrorDetail {
                code: code.to_string(),
                detail: None,
            },
        }
    }

    pub fn with_details(code: &str, message: String, detail: serde_json::Value) -> Self {
        Self {
            success: false,
            message,
            error: ErrorDetail {
                code: code.to_string(),
                detail: Some(detail),
            },
        }
    }
}
