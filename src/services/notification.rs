use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, Result},
    models::notification::{Notification, NotificationDraft, NotificationList, NotificationView, PushEvent},
    services::{
        database::{Database, Mutation},
        realtime::Notifier,
    },
};

/// 通知服务：写入收件箱并推送
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<dyn Database>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationService {
    pub fn new(db: Arc<dyn Database>, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    /// Stores and pushes one notification.
    ///
    /// Returns the stored notification, or `None` when nothing was stored:
    /// either the sender is the recipient or the store write failed. Store
    /// failures are logged and never reach the caller.
    pub async fn dispatch(&self, draft: NotificationDraft) -> Option<Notification> {
        if draft.sender == draft.recipient {
            debug!("Skipping self notification for {}", draft.recipient);
            return None;
        }

        let notification = draft.into_notification();
        let recipient = notification.recipient.clone();

        if let Err(e) = self.db.apply(Mutation::PutNotification(notification.clone())).await {
            warn!("Failed to store {:?} notification for {}: {}", notification.kind, recipient, e);
            return None;
        }

        self.notifier
            .notify(&recipient, PushEvent::NewNotification(notification.clone()));
        match self.db.count_unread(&recipient).await {
            Ok(count) => self.notifier.notify(&recipient, PushEvent::UnreadCountUpdate { count }),
            Err(e) => warn!("Failed to count unread notifications for {}: {}", recipient, e),
        }

        Some(notification)
    }

    /// One notification per recipient. Returns how many were stored.
    pub async fn fan_out<I>(&self, drafts: I) -> usize
    where
        I: IntoIterator<Item = NotificationDraft>,
    {
        let mut stored = 0;
        for draft in drafts {
            if self.dispatch(draft).await.is_some() {
                stored += 1;
            }
        }
        stored
    }

    pub async fn list(&self, recipient: &str) -> Result<NotificationList> {
        let notifications = self.db.list_notifications(recipient).await?;
        let unread_count = notifications.iter().filter(|n| !n.is_read).count() as u64;

        let mut sender_ids: Vec<String> = notifications.iter().filter_map(|n| n.sender.clone()).collect();
        sender_ids.sort();
        sender_ids.dedup();
        let senders: HashMap<String, _> = self
            .db
            .get_users(&sender_ids)
            .await?
            .into_iter()
            .map(|u| (u.id.clone(), u.summary()))
            .collect();

        let notifications = notifications
            .into_iter()
            .map(|notification| {
                let sender_info = notification.sender.as_ref().and_then(|s| senders.get(s).cloned());
                NotificationView {
                    notification,
                    sender_info,
                }
            })
            .collect();

        Ok(NotificationList {
            notifications,
            unread_count,
        })
    }

    pub async fn mark_all_read(&self, recipient: &str) -> Result<()> {
        self.db
            .apply(Mutation::MarkNotificationsRead {
                recipient: recipient.to_string(),
                id: None,
            })
            .await?;
        self.push_unread_count(recipient).await;
        info!("Marked all notifications read for {}", recipient);
        Ok(())
    }

    /// Already read is a successful no-op.
    pub async fn mark_read(&self, recipient: &str, id: &str) -> Result<Notification> {
        let mut notification = self.owned(recipient, id).await?;
        if notification.is_read {
            return Ok(notification);
        }

        self.db
            .apply(Mutation::MarkNotificationsRead {
                recipient: recipient.to_string(),
                id: Some(id.to_string()),
            })
            .await?;
        self.push_unread_count(recipient).await;

        notification.is_read = true;
        Ok(notification)
    }

    pub async fn delete(&self, recipient: &str, id: &str) -> Result<()> {
        self.owned(recipient, id).await?;
        self.db
            .apply(Mutation::DeleteNotification {
                recipient: recipient.to_string(),
                id: id.to_string(),
            })
            .await?;
        self.push_unread_count(recipient).await;
        Ok(())
    }

    pub async fn delete_all(&self, recipient: &str) -> Result<usize> {
        let count = self.db.list_notifications(recipient).await?.len();
        self.db
            .apply(Mutation::DeleteNotificationsFor(recipient.to_string()))
            .await?;
        self.push_unread_count(recipient).await;
        info!("Deleted {} notifications for {}", count, recipient);
        Ok(count)
    }

    async fn owned(&self, recipient: &str, id: &str) -> Result<Notification> {
        match self.db.get_notification(id).await? {
            Some(n) if n.recipient == recipient => Ok(n),
            _ => Err(AppError::not_found("Notification")),
        }
    }

    async fn push_unread_count(&self, recipient: &str) {
        match self.db.count_unread(recipient).await {
            Ok(count) => self.notifier.notify(recipient, PushEvent::UnreadCountUpdate { count }),
            Err(e) => warn!("Failed to count unread notifications for {}: {}", recipient, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::NotificationType;
    use crate::services::{memory_store::MemoryDatabase, realtime::PushHub};

    fn service() -> (NotificationService, Arc<MemoryDatabase>, Arc<PushHub>) {
        let db = Arc::new(MemoryDatabase::new());
        let hub = Arc::new(PushHub::new(16));
        (NotificationService::new(db.clone(), hub.clone()), db, hub)
    }

    #[tokio::test]
    async fn self_notification_is_never_stored() {
        let (svc, db, _) = service();
        let stored = svc
            .dispatch(NotificationDraft::new("u1", "u1", NotificationType::Like, "liked your blog"))
            .await;
        assert!(stored.is_none());
        assert!(db.list_notifications("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatch_pushes_notification_then_count() {
        let (svc, _, hub) = service();
        let (_, mut rx) = hub.register("u1");

        let stored = svc
            .dispatch(NotificationDraft::new("u1", "u2", NotificationType::Follow, "started following you"))
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(PushEvent::NewNotification(stored)));
        assert_eq!(rx.recv().await, Some(PushEvent::UnreadCountUpdate { count: 1 }));
    }

    #[tokio::test]
    async fn inbox_lifecycle() {
        let (svc, _, _) = service();
        let first = svc
            .dispatch(NotificationDraft::new("u1", "u2", NotificationType::Follow, "a"))
            .await
            .unwrap();
        svc.dispatch(NotificationDraft::new("u1", "u3", NotificationType::Like, "b"))
            .await
            .unwrap();

        let inbox = svc.list("u1").await.unwrap();
        assert_eq!(inbox.notifications.len(), 2);
        assert_eq!(inbox.unread_count, 2);

        let read = svc.mark_read("u1", &first.id).await.unwrap();
        assert!(read.is_read);
        // second call is a no-op
        assert!(svc.mark_read("u1", &first.id).await.unwrap().is_read);
        assert_eq!(svc.list("u1").await.unwrap().unread_count, 1);

        assert!(matches!(svc.delete("u9", &first.id).await, Err(AppError::NotFound(_))));
        svc.delete("u1", &first.id).await.unwrap();

        assert_eq!(svc.delete_all("u1").await.unwrap(), 1);
        assert!(svc.list("u1").await.unwrap().notifications.is_empty());
    }

    #[tokio::test]
    async fn mark_all_read_clears_unread_count() {
        let (svc, db, _) = service();
        svc.fan_out(vec![
            NotificationDraft::new("u1", "u2", NotificationType::Follow, "a"),
            NotificationDraft::new("u1", "u3", NotificationType::Follow, "b"),
        ])
        .await;
        svc.mark_all_read("u1").await.unwrap();
        assert_eq!(db.count_unread("u1").await.unwrap(), 0);
    }
}
