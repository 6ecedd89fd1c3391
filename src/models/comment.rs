use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use validator::Validate;

use crate::models::user::UserSummary;

/// 评论节点，父子关系通过 id 维护
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub blog: String,
    pub user: String,
    pub comment: String,
    #[serde(default)]
    pub parent_comment: Option<String>,
    #[serde(default)]
    pub replies: Vec<String>,
    #[serde(default)]
    pub likes: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(blog: &str, user: &str, text: &str, parent: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            blog: blog.to_string(),
            user: user.to_string(),
            comment: text.to_string(),
            parent_comment: parent.map(str::to_string),
            replies: Vec::new(),
            likes: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Rendered comment with its replies nested.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentNode {
    pub id: String,
    pub blog: String,
    pub user: Option<UserSummary>,
    pub comment: String,
    pub parent_comment: Option<String>,
    pub likes: BTreeSet<String>,
    pub replies: Vec<CommentNode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCommentRequest {
    #[validate(length(min = 1, message = "Please enter the comment"))]
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EditCommentRequest {
    #[serde(alias = "comment")]
    #[validate(length(min = 1, message = "Please enter the comment"))]
    pub update_comment: String,
}
