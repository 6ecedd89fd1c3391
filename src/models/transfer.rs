use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::AppError;

pub const TRANSFER_ACTION: &str = "account-transfer";

/// Capability token payload. Everything phase two needs travels inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferClaims {
    pub current_user_id: String,
    pub current_user_email: String,
    pub new_owner_id: String,
    pub new_owner_email: String,
    pub action: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAction {
    Accept,
    Reject,
}

impl FromStr for TransferAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(TransferAction::Accept),
            "reject" => Ok(TransferAction::Reject),
            other => Err(AppError::BadRequest(format!("Unknown transfer action: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub transferred_blogs: usize,
    pub transferred_comments: usize,
    pub transferred_followers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TransferOutcome {
    Accepted(TransferSummary),
    Rejected,
}
