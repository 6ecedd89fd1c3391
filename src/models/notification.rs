use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationType {
    Like,
    Comment,
    Follow,
    Reply,
    CommentLike,
    BlogUpdate,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub recipient: String,
    /// `None` once the sending account has been deleted.
    pub sender: Option<String>,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    #[serde(default)]
    pub blog: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// 待发送的通知
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub recipient: String,
    pub sender: String,
    pub kind: NotificationType,
    pub blog: Option<String>,
    pub comment: Option<String>,
    pub message: String,
}

impl NotificationDraft {
    pub fn new(recipient: &str, sender: &str, kind: NotificationType, message: impl Into<String>) -> Self {
        Self {
            recipient: recipient.to_string(),
            sender: sender.to_string(),
            kind,
            blog: None,
            comment: None,
            message: message.into(),
        }
    }

    pub fn with_blog(mut self, blog: &str) -> Self {
        self.blog = Some(blog.to_string());
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    pub fn into_notification(self) -> Notification {
        Notification {
            id: uuid::Uuid::new_v4().to_string(),
            recipient: self.recipient,
            sender: Some(self.sender),
            kind: self.kind,
            blog: self.blog,
            comment: self.comment,
            message: self.message,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

/// 收件箱中的一条通知，附带发送者信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    #[serde(flatten)]
    pub notification: Notification,
    pub sender_info: Option<crate::models::user::UserSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationList {
    pub notifications: Vec<NotificationView>,
    pub unread_count: u64,
}

/// 推送通道里的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum PushEvent {
    NewNotification(Notification),
    UnreadCountUpdate { count: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notification_types_use_wire_names() {
        assert_eq!(serde_json::to_value(NotificationType::CommentLike).unwrap(), json!("comment-like"));
        assert_eq!(serde_json::to_value(NotificationType::BlogUpdate).unwrap(), json!("blog-update"));
        assert_eq!(serde_json::to_value(NotificationType::Custom).unwrap(), json!("custom"));
    }

    #[test]
    fn push_events_are_tagged() {
        let value = serde_json::to_value(PushEvent::UnreadCountUpdate { count: 3 }).unwrap();
        assert_eq!(value, json!({ "event": "unreadCountUpdate", "data": { "count": 3 } }));
    }
}
