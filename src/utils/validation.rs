use once_cell::sync::Lazy;
use regex::Regex;
use validator::Validate;

use crate::error::{AppError, Result};

static USERNAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9_.-]+$").expect("valid username pattern")
});

/// Runs the derived validator and flattens the first message into a
/// `Validation` error.
pub fn validate_request<T: Validate>(request: &T) -> Result<()> {
    request.validate().map_err(|errors| {
        let message = errors
            .field_errors()
            .values()
            .flat_map(|errs| errs.iter())
            .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
            .unwrap_or_else(|| errors.to_string());
        AppError::Validation(message)
    })
}

/// 用户名格式检查
pub fn validate_username(username: &str) -> Result<()> {
    let username = username.trim();
    if username.len() < 3 {
        return Err(AppError::validation("Username must be at least 3 characters"));
    }
    if username.len() > 60 {
        return Err(AppError::validation("Username must be at most 60 characters"));
    }
    if !USERNAME_REGEX.is_match(username) {
        return Err(AppError::validation(
            "Username may only contain letters, digits, dots, underscores and hyphens",
        ));
    }
    Ok(())
}

pub fn require_non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("Please enter the {}", field)));
    }
    Ok(())
}

/// 标签：去空白、转小写、去重
pub fn normalize_tags<I, S>(tags: I) -> std::collections::BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
