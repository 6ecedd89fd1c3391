use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    error::{AppError, Result},
    models::{
        notification::{NotificationDraft, NotificationType},
        user::User,
    },
    services::{
        database::{Database, Mutation, SetField},
        notification::NotificationService,
    },
};

/// Membership after the toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleOutcome {
    pub active: bool,
}

/// 关注、点赞、收藏的切换操作
#[derive(Clone)]
pub struct RelationshipService {
    db: Arc<dyn Database>,
    notifications: NotificationService,
}

impl RelationshipService {
    pub fn new(db: Arc<dyn Database>, notifications: NotificationService) -> Self {
        Self { db, notifications }
    }

    async fn actor(&self, id: &str) -> Result<User> {
        self.db
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))
    }

    /// Inserts or removes both sides of a relationship.
    async fn flip(&self, active: bool, sides: [(SetField, &str, &str); 2]) -> Result<()> {
        for (field, id, value) in sides {
            let (id, value) = (id.to_string(), value.to_string());
            let mutation = if active {
                Mutation::PullFromSet { field, id, value }
            } else {
                Mutation::AddToSet { field, id, value }
            };
            self.db.apply(mutation).await?;
        }
        Ok(())
    }

    pub async fn toggle_follow(&self, actor_id: &str, target_id: &str) -> Result<ToggleOutcome> {
        if actor_id == target_id {
            return Err(AppError::conflict("You cannot follow yourself"));
        }

        let target = self
            .db
            .get_user(target_id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))?;
        let actor = self.actor(actor_id).await?;

        let active = actor.following.contains(target_id);
        self.flip(
            active,
            [
                (SetField::UserFollowing, actor_id, target_id),
                (SetField::UserFollowers, target_id, actor_id),
            ],
        )
        .await?;

        if !active {
            self.notifications
                .dispatch(NotificationDraft::new(
                    &target.id,
                    &actor.id,
                    NotificationType::Follow,
                    format!("{} started following you", actor.name),
                ))
                .await;
        }

        info!("User {} {} {}", actor_id, if active { "unfollowed" } else { "followed" }, target_id);
        Ok(ToggleOutcome { active: !active })
    }

    pub async fn toggle_blog_like(&self, actor_id: &str, blog_id: &str) -> Result<ToggleOutcome> {
        let blog = self
            .db
            .get_blog(blog_id)
            .await?
            .ok_or_else(|| AppError::not_found("Blog"))?;
        let actor = self.actor(actor_id).await?;

        let active = blog.likes.contains(actor_id);
        self.flip(
            active,
            [
                (SetField::BlogLikes, blog_id, actor_id),
                (SetField::UserLikedBlogs, actor_id, blog_id),
            ],
        )
        .await?;

        if !active {
            self.notifications
                .dispatch(
                    NotificationDraft::new(
                        &blog.creator,
                        &actor.id,
                        NotificationType::Like,
                        format!("{} liked your blog", actor.name),
                    )
                    .with_blog(blog_id),
                )
                .await;
        }

        debug!("Blog {} like by {} now {}", blog_id, actor_id, !active);
        Ok(ToggleOutcome { active: !active })
    }

    pub async fn toggle_blog_save(&self, actor_id: &str, blog_id: &str) -> Result<ToggleOutcome> {
        let blog = self
            .db
            .get_blog(blog_id)
            .await?
            .ok_or_else(|| AppError::not_found("Blog"))?;
        let actor = self.actor(actor_id).await?;

        let active = blog.total_saves.contains(actor_id);
        self.flip(
            active,
            [
                (SetField::BlogSaves, blog_id, actor_id),
                (SetField::UserSavedBlogs, actor_id, blog_id),
            ],
        )
        .await?;

        if !active {
            self.notifications
                .dispatch(
                    NotificationDraft::new(
                        &blog.creator,
                        &actor.id,
                        NotificationType::Custom,
                        format!("{} saved your blog", actor.name),
                    )
                    .with_blog(blog_id),
                )
                .await;
        }

        debug!("Blog {} save by {} now {}", blog_id, actor_id, !active);
        Ok(ToggleOutcome { active: !active })
    }

    pub async fn toggle_comment_like(&self, actor_id: &str, comment_id: &str) -> Result<ToggleOutcome> {
        let comment = self
            .db
            .get_comment(comment_id)
            .await?
            .ok_or_else(|| AppError::not_found("Comment"))?;
        let actor = self.actor(actor_id).await?;

        let active = comment.likes.contains(actor_id);
        let (id, value) = (comment_id.to_string(), actor_id.to_string());
        let field = SetField::CommentLikes;
        self.db
            .apply(if active {
                Mutation::PullFromSet { field, id, value }
            } else {
                Mutation::AddToSet { field, id, value }
            })
            .await?;

        if !active {
            self.notifications
                .dispatch(
                    NotificationDraft::new(
                        &comment.user,
                        &actor.id,
                        NotificationType::CommentLike,
                        format!("{} liked your comment", actor.name),
                    )
                    .with_comment(comment_id)
                    .with_blog(&comment.blog),
                )
                .await;
        }

        Ok(ToggleOutcome { active: !active })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{blog::Blog, comment::Comment},
        services::{memory_store::MemoryDatabase, realtime::NullNotifier},
        test_support::{seed_blog, seed_comment, seed_user},
    };
    use proptest::prelude::*;

    struct Fixture {
        db: Arc<MemoryDatabase>,
        svc: RelationshipService,
        users: Vec<String>,
        blog: String,
        comment: String,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(MemoryDatabase::new());
        let notifications = NotificationService::new(db.clone(), Arc::new(NullNotifier));
        let svc = RelationshipService::new(db.clone(), notifications);

        let mut users = Vec::new();
        for name in ["ann", "bob", "cid"] {
            users.push(seed_user(db.as_ref(), name).await.id);
        }
        let blog = seed_blog(db.as_ref(), &users[0], "Hello", false).await.id;
        let comment = seed_comment(db.as_ref(), &blog, &users[1], None).await.id;

        Fixture { db, svc, users, blog, comment }
    }

    type Snapshot = (Vec<User>, Option<Blog>, Option<Comment>);

    async fn snapshot(f: &Fixture) -> Snapshot {
        (
            f.db.get_users(&f.users).await.unwrap(),
            f.db.get_blog(&f.blog).await.unwrap(),
            f.db.get_comment(&f.comment).await.unwrap(),
        )
    }

    async fn toggle(f: &Fixture, kind: u8, actor: usize, target: usize) -> Result<ToggleOutcome> {
        let actor = &f.users[actor];
        match kind {
            0 => f.svc.toggle_follow(actor, &f.users[target]).await,
            1 => f.svc.toggle_blog_like(actor, &f.blog).await,
            2 => f.svc.toggle_blog_save(actor, &f.blog).await,
            _ => f.svc.toggle_comment_like(actor, &f.comment).await,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn toggling_twice_restores_state(
            history in proptest::collection::vec((0u8..4, 0usize..3, 0usize..3), 0..10),
            probe in (0u8..4, 0usize..3, 0usize..3),
        ) {
            tokio_test::block_on(async {
                let f = fixture().await;
                for (kind, actor, target) in history {
                    let _ = toggle(&f, kind, actor, target).await;
                }

                let before = snapshot(&f).await;
                let first = toggle(&f, probe.0, probe.1, probe.2).await;
                let second = toggle(&f, probe.0, probe.1, probe.2).await;
                let after = snapshot(&f).await;

                assert_eq!(first.is_ok(), second.is_ok());
                if let (Ok(a), Ok(b)) = (first, second) {
                    assert_ne!(a.active, b.active);
                }
                assert_eq!(before, after);
            });
        }
    }

    #[tokio::test]
    async fn self_follow_is_rejected_before_mutation() {
        let f = fixture().await;
        let before = snapshot(&f).await;
        let result = f.svc.toggle_follow(&f.users[0], &f.users[0]).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(before, snapshot(&f).await);
    }

    #[tokio::test]
    async fn follow_updates_both_sides_and_notifies_once() {
        let f = fixture().await;
        let outcome = f.svc.toggle_follow(&f.users[1], &f.users[0]).await.unwrap();
        assert!(outcome.active);

        let ann = f.db.get_user(&f.users[0]).await.unwrap().unwrap();
        let bob = f.db.get_user(&f.users[1]).await.unwrap().unwrap();
        assert!(ann.followers.contains(&bob.id));
        assert!(bob.following.contains(&ann.id));

        let inbox = f.db.list_notifications(&ann.id).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationType::Follow);

        // unfollow emits nothing
        f.svc.toggle_follow(&f.users[1], &f.users[0]).await.unwrap();
        assert_eq!(f.db.list_notifications(&ann.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn liking_own_blog_is_silent() {
        let f = fixture().await;
        let outcome = f.svc.toggle_blog_like(&f.users[0], &f.blog).await.unwrap();
        assert!(outcome.active);
        assert!(f.db.list_notifications(&f.users[0]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_emits_custom_notification() {
        let f = fixture().await;
        f.svc.toggle_blog_save(&f.users[2], &f.blog).await.unwrap();

        let inbox = f.db.list_notifications(&f.users[0]).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationType::Custom);
        assert_eq!(inbox[0].blog.as_deref(), Some(f.blog.as_str()));
    }

    #[tokio::test]
    async fn comment_like_references_comment_and_blog() {
        let f = fixture().await;
        f.svc.toggle_comment_like(&f.users[0], &f.comment).await.unwrap();

        let inbox = f.db.list_notifications(&f.users[1]).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationType::CommentLike);
        assert_eq!(inbox[0].comment.as_deref(), Some(f.comment.as_str()));
        assert_eq!(inbox[0].blog.as_deref(), Some(f.blog.as_str()));
    }

    #[tokio::test]
    async fn missing_target_is_not_found_without_mutation() {
        let f = fixture().await;
        let before = snapshot(&f).await;
        assert!(matches!(
            f.svc.toggle_blog_like(&f.users[0], "nope").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            f.svc.toggle_follow(&f.users[0], "nope").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            f.svc.toggle_blog_like("ghost", &f.blog).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(before, snapshot(&f).await);
    }
}
