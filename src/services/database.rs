use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::Result,
    models::{
        blog::{Blog, BlogFilter},
        comment::Comment,
        notification::Notification,
        user::User,
    },
};

/// Set-valued fields that can be changed in place without rewriting the
/// whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetField {
    UserFollowers,
    UserFollowing,
    UserBlogs,
    UserLikedBlogs,
    UserSavedBlogs,
    BlogLikes,
    BlogSaves,
    BlogComments,
    CommentLikes,
    CommentReplies,
}

impl SetField {
    pub fn table(&self) -> &'static str {
        match self {
            SetField::UserFollowers
            | SetField::UserFollowing
            | SetField::UserBlogs
            | SetField::UserLikedBlogs
            | SetField::UserSavedBlogs => "user",
            SetField::BlogLikes | SetField::BlogSaves | SetField::BlogComments => "blog",
            SetField::CommentLikes | SetField::CommentReplies => "comment",
        }
    }

    /// 文档中的字段名（camelCase）
    pub fn field(&self) -> &'static str {
        match self {
            SetField::UserFollowers => "followers",
            SetField::UserFollowing => "following",
            SetField::UserBlogs => "blogs",
            SetField::UserLikedBlogs => "likedBlogs",
            SetField::UserSavedBlogs => "savedBlogs",
            SetField::BlogLikes => "likes",
            SetField::BlogSaves => "totalSaves",
            SetField::BlogComments => "comments",
            SetField::CommentLikes => "likes",
            SetField::CommentReplies => "replies",
        }
    }
}

/// 写操作
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    PutUser(User),
    DeleteUser(String),
    PutBlog(Blog),
    DeleteBlog(String),
    PutComment(Comment),
    DeleteComment(String),
    PutNotification(Notification),
    DeleteNotification { recipient: String, id: String },
    DeleteNotificationsFor(String),
    /// Deletes what `sender` sent to `recipient`.
    DeleteNotificationsBetween { sender: String, recipient: String },
    MarkNotificationsRead { recipient: String, id: Option<String> },

    /// Insert `value` into one document's set.
    AddToSet { field: SetField, id: String, value: String },
    /// Remove `value` from one document's set.
    PullFromSet { field: SetField, id: String, value: String },
    /// Remove `value` from the set in every document of the table.
    PullEverywhere { field: SetField, value: String },
    /// Swap `from` for `to` in every document holding `from`. The document
    /// whose own id is `to` only loses `from`, so nobody references itself.
    ReplaceEverywhere { field: SetField, from: String, to: String },

    ReassignBlogs { from: String, to: String },
    ReassignComments { from: String, to: String },
    ReassignNotificationSender { from: String, to: Option<String> },
}

/// One labelled step of an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub struct TxOp {
    pub step: &'static str,
    pub mutation: Mutation,
}

impl TxOp {
    pub fn new(step: &'static str, mutation: Mutation) -> Self {
        Self { step, mutation }
    }
}

/// 文档存储接口
#[async_trait]
pub trait Database: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn get_user(&self, id: &str) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn list_users(&self) -> Result<Vec<User>>;
    async fn get_users(&self, ids: &[String]) -> Result<Vec<User>>;

    async fn get_blog(&self, id: &str) -> Result<Option<Blog>>;
    async fn get_blogs(&self, ids: &[String]) -> Result<Vec<Blog>>;
    /// Newest first. Returns the page and the total number of matches.
    async fn list_blogs(&self, filter: &BlogFilter, skip: u64, limit: u64) -> Result<(Vec<Blog>, u64)>;
    async fn blogs_by_creator(&self, user_id: &str) -> Result<Vec<Blog>>;

    async fn get_comment(&self, id: &str) -> Result<Option<Comment>>;
    async fn comments_for_blog(&self, blog_id: &str) -> Result<Vec<Comment>>;
    async fn comments_by_author(&self, user_id: &str) -> Result<Vec<Comment>>;

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>>;
    /// Newest first.
    async fn list_notifications(&self, recipient: &str) -> Result<Vec<Notification>>;
    async fn count_unread(&self, recipient: &str) -> Result<u64>;

    async fn apply(&self, mutation: Mutation) -> Result<()>;
    /// Applies every op or none of them.
    async fn apply_atomic(&self, ops: Vec<TxOp>) -> Result<()>;
}

pub(crate) fn to_doc<T: serde::Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
