use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use validator::Validate;

use crate::models::blog::Blog;

/// 用户文档
///
/// Relationship and content sets are `BTreeSet`s so two snapshots of the same
/// logical state serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub profile_pic: Option<String>,
    #[serde(default)]
    pub profile_pic_id: Option<String>,
    #[serde(default)]
    pub followers: BTreeSet<String>,
    #[serde(default)]
    pub following: BTreeSet<String>,
    #[serde(default)]
    pub blogs: Vec<String>,
    #[serde(default)]
    pub liked_blogs: BTreeSet<String>,
    #[serde(default)]
    pub saved_blogs: BTreeSet<String>,
    #[serde(default)]
    pub show_liked_blogs: bool,
    #[serde(default)]
    pub show_saved_blogs: bool,
    #[serde(default)]
    pub is_google_auth: bool,
    #[serde(default)]
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: &str, email: &str, username: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_string(),
            username: username.to_string(),
            password_hash: None,
            bio: None,
            profile_pic: None,
            profile_pic_id: None,
            followers: BTreeSet::new(),
            following: BTreeSet::new(),
            blogs: Vec::new(),
            liked_blogs: BTreeSet::new(),
            saved_blogs: BTreeSet::new(),
            show_liked_blogs: true,
            show_saved_blogs: true,
            is_google_auth: false,
            is_verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            username: self.username.clone(),
            profile_pic: self.profile_pic.clone(),
        }
    }
}

/// 嵌入在博客、评论和关注列表里的简要用户信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub username: String,
    pub profile_pic: Option<String>,
}

/// 登录成功后返回给本人的账号信息（包含邮箱，不包含密码）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub username: String,
    pub profile_pic: Option<String>,
    pub bio: Option<String>,
    pub followers: BTreeSet<String>,
    pub following: BTreeSet<String>,
    pub show_liked_blogs: bool,
    pub show_saved_blogs: bool,
    pub google_auth: bool,
    pub token: String,
}

impl SessionUser {
    pub fn new(user: &User, token: String) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
            profile_pic: user.profile_pic.clone(),
            bio: user.bio.clone(),
            followers: user.followers.clone(),
            following: user.following.clone(),
            show_liked_blogs: user.show_liked_blogs,
            show_saved_blogs: user.show_saved_blogs,
            google_auth: user.is_google_auth,
            token,
        }
    }
}

/// Public profile. Email, password hash and auth mode are never part of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub username: String,
    pub bio: Option<String>,
    pub profile_pic: Option<String>,
    pub followers: Vec<UserSummary>,
    pub following: Vec<UserSummary>,
    pub blogs: Vec<Blog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liked_blogs: Option<Vec<Blog>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_blogs: Option<Vec<Blog>>,
    pub show_liked_blogs: bool,
    pub show_saved_blogs: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 80, message = "Name is required"))]
    pub name: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SigninRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GoogleAuthRequest {
    #[validate(length(min = 1, message = "Access token is required"))]
    pub access_token: String,
}

/// 资料更新（multipart 表单解析后的结果）
#[derive(Debug, Clone, Default, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 80))]
    pub name: Option<String>,

    #[validate(length(min = 3, max = 60))]
    pub username: Option<String>,

    #[validate(length(max = 300))]
    pub bio: Option<String>,

    /// `Some("")` removes the current avatar.
    pub profile_pic: Option<String>,

    pub image: Option<UploadedFile>,
}

/// 上传文件的原始内容
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRequest {
    pub show_liked_blogs: bool,
    pub show_saved_blogs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub new_password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAccountRequest {
    #[serde(default)]
    pub current_password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TransferAccountRequest {
    #[serde(default)]
    pub current_password: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub new_owner_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserListQuery {
    pub search: Option<String>,
}
