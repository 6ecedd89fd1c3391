use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    error::{AppError, Result},
    models::{
        transfer::{TransferAction, TransferClaims, TransferOutcome, TransferSummary},
        user::{DeleteAccountRequest, TransferAccountRequest, User},
    },
    services::{
        auth::AuthService,
        blog::BlogService,
        comment::CommentService,
        database::{Database, Mutation, SetField, TxOp},
        mail::EmailService,
        media::{release_assets, ImageStore},
        user::check_credentials,
    },
    utils::validation::validate_request,
};

pub const STEP_REASSIGN_BLOGS: &str = "reassign-blogs";
pub const STEP_REASSIGN_COMMENTS: &str = "reassign-comments";
pub const STEP_REPLACE_FOLLOWER_REFS: &str = "replace-follower-refs";
pub const STEP_ADOPT_FOLLOWING: &str = "adopt-following";
pub const STEP_MERGE_BLOG_SETS: &str = "merge-blog-sets";
pub const STEP_DELETE_SOURCE: &str = "delete-source";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    pub deleted_blogs: usize,
    pub deleted_comments: usize,
}

/// 账号删除与转让
#[derive(Clone)]
pub struct AccountService {
    db: Arc<dyn Database>,
    auth: AuthService,
    emails: EmailService,
    images: Arc<dyn ImageStore>,
    blogs: BlogService,
    comments: CommentService,
}

impl AccountService {
    pub fn new(
        db: Arc<dyn Database>,
        auth: AuthService,
        emails: EmailService,
        images: Arc<dyn ImageStore>,
        blogs: BlogService,
        comments: CommentService,
    ) -> Self {
        Self {
            db,
            auth,
            emails,
            images,
            blogs,
            comments,
        }
    }

    async fn user(&self, id: &str) -> Result<User> {
        self.db
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))
    }

    async fn pull_everywhere(&self, field: SetField, user_id: &str) -> Result<()> {
        self.db
            .apply(Mutation::PullEverywhere {
                field,
                value: user_id.to_string(),
            })
            .await
    }

    /// Removes the account and everything hanging off it.
    ///
    /// Steps run one after another and are not rolled back: a failure stops
    /// the sequence and leaves the earlier steps applied.
    pub async fn delete_account(&self, actor_id: &str, user_id: &str, request: DeleteAccountRequest) -> Result<DeletionReport> {
        if actor_id != user_id {
            return Err(AppError::forbidden("You can only delete your own account"));
        }
        let user = self.user(user_id).await?;
        check_credentials(&self.auth, &user, request.current_password.as_deref())?;

        let report = self.purge(&user).await.map_err(|e| {
            error!("Account deletion for {} stopped: {}", user_id, e);
            e
        })?;

        self.emails.send_account_deleted(&user).await;
        info!(
            "Account {} deleted ({} blogs, {} comments)",
            user_id, report.deleted_blogs, report.deleted_comments
        );
        Ok(report)
    }

    async fn purge(&self, user: &User) -> Result<DeletionReport> {
        let id = user.id.as_str();
        let mut report = DeletionReport::default();

        for blog in self.db.blogs_by_creator(id).await? {
            report.deleted_comments += self.blogs.purge(&blog).await?;
            report.deleted_blogs += 1;
        }
        info!("[delete {}] blogs removed: {}", id, report.deleted_blogs);

        for comment in self.db.comments_by_author(id).await? {
            report.deleted_comments += self.comments.delete_subtree(&comment.id).await?;
        }
        info!("[delete {}] comments removed: {}", id, report.deleted_comments);

        self.pull_everywhere(SetField::CommentLikes, id).await?;
        info!("[delete {}] comment likes stripped", id);

        self.pull_everywhere(SetField::UserFollowers, id).await?;
        self.pull_everywhere(SetField::UserFollowing, id).await?;
        info!("[delete {}] follower references stripped", id);

        for followed in &user.following {
            self.db
                .apply(Mutation::PullFromSet {
                    field: SetField::UserFollowers,
                    id: followed.clone(),
                    value: id.to_string(),
                })
                .await?;
        }
        info!("[delete {}] removed from {} followed users", id, user.following.len());

        self.pull_everywhere(SetField::BlogLikes, id).await?;
        info!("[delete {}] blog likes stripped", id);
        self.pull_everywhere(SetField::BlogSaves, id).await?;
        info!("[delete {}] blog saves stripped", id);

        self.db.apply(Mutation::DeleteNotificationsFor(id.to_string())).await?;
        self.db
            .apply(Mutation::ReassignNotificationSender {
                from: id.to_string(),
                to: None,
            })
            .await?;
        info!("[delete {}] notifications cleared", id);

        if let Some(pic) = &user.profile_pic_id {
            release_assets(self.images.as_ref(), std::slice::from_ref(pic)).await;
        }

        self.db.apply(Mutation::DeleteUser(id.to_string())).await?;
        info!("[delete {}] user record removed", id);
        Ok(report)
    }

    /// Phase one: mails the target a signed accept/reject link.
    pub async fn request_transfer(&self, user_id: &str, request: TransferAccountRequest) -> Result<User> {
        validate_request(&request)?;
        let source = self.user(user_id).await?;
        check_credentials(&self.auth, &source, request.current_password.as_deref())?;

        let target = self
            .db
            .find_user_by_email(request.new_owner_email.trim())
            .await?
            .ok_or_else(|| AppError::not_found("New owner"))?;
        if target.id == source.id {
            return Err(AppError::conflict("You cannot transfer your account to yourself"));
        }
        if target.username == source.username {
            return Err(AppError::conflict("Both accounts share the same username"));
        }

        let token = self.auth.issue_transfer_token(&source, &target)?;
        self.emails
            .send_transfer_request(&source, &target, source.blogs.len(), &token)
            .await?;
        self.emails.send_transfer_sent(&source, &target).await;

        info!("Transfer of {} to {} requested", source.id, target.id);
        Ok(target)
    }

    /// Phase two. A rejection changes nothing; an acceptance moves everything
    /// in one atomic batch.
    pub async fn confirm_transfer(&self, action: TransferAction, token: &str) -> Result<TransferOutcome> {
        let claims = self.auth.verify_transfer_token(token)?;

        match action {
            TransferAction::Reject => {
                self.emails
                    .send_transfer_rejected(&claims.current_user_email, &claims.new_owner_email)
                    .await;
                info!("Transfer of {} rejected", claims.current_user_id);
                Ok(TransferOutcome::Rejected)
            }
            TransferAction::Accept => self.accept(&claims).await.map(TransferOutcome::Accepted),
        }
    }

    async fn accept(&self, claims: &TransferClaims) -> Result<TransferSummary> {
        let source = self
            .db
            .get_user(&claims.current_user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Account to transfer"))?;
        let target = self
            .db
            .get_user(&claims.new_owner_id)
            .await?
            .ok_or_else(|| AppError::not_found("New owner"))?;

        let summary = TransferSummary {
            transferred_blogs: self.db.blogs_by_creator(&source.id).await?.len(),
            transferred_comments: self.db.comments_by_author(&source.id).await?.len(),
            transferred_followers: source.followers.iter().filter(|f| **f != target.id).count(),
        };

        if let Err(e) = self.db.apply_atomic(transfer_ops(&source, &target)).await {
            warn!("Transfer of {} to {} aborted: {}", source.id, target.id, e);
            return Err(e);
        }

        if let Some(pic) = &source.profile_pic_id {
            release_assets(self.images.as_ref(), std::slice::from_ref(pic)).await;
        }
        self.emails.send_transfer_completed(&source, &target, &summary).await;

        info!(
            "Account {} transferred to {} ({} blogs, {} comments, {} followers)",
            source.id,
            target.id,
            summary.transferred_blogs,
            summary.transferred_comments,
            summary.transferred_followers
        );
        Ok(summary)
    }
}

fn transfer_ops(source: &User, target: &User) -> Vec<TxOp> {
    let (from, to) = (source.id.clone(), target.id.clone());
    let add = |field, value: &String| Mutation::AddToSet {
        field,
        id: to.clone(),
        value: value.clone(),
    };
    let replace = |field| Mutation::ReplaceEverywhere {
        field,
        from: from.clone(),
        to: to.clone(),
    };

    let mut ops = vec![
        TxOp::new(STEP_REASSIGN_BLOGS, Mutation::ReassignBlogs { from: from.clone(), to: to.clone() }),
        TxOp::new(STEP_REASSIGN_COMMENTS, Mutation::ReassignComments { from: from.clone(), to: to.clone() }),
        TxOp::new(STEP_REPLACE_FOLLOWER_REFS, replace(SetField::UserFollowers)),
        TxOp::new(STEP_REPLACE_FOLLOWER_REFS, replace(SetField::UserFollowing)),
    ];

    ops.extend(
        source
            .followers
            .iter()
            .filter(|id| **id != to)
            .map(|id| TxOp::new(STEP_ADOPT_FOLLOWING, add(SetField::UserFollowers, id))),
    );
    ops.extend(
        source
            .following
            .iter()
            .filter(|id| **id != to)
            .map(|id| TxOp::new(STEP_ADOPT_FOLLOWING, add(SetField::UserFollowing, id))),
    );

    ops.extend(source.blogs.iter().map(|id| TxOp::new(STEP_MERGE_BLOG_SETS, add(SetField::UserBlogs, id))));
    ops.extend(
        source
            .liked_blogs
            .iter()
            .map(|id| TxOp::new(STEP_MERGE_BLOG_SETS, add(SetField::UserLikedBlogs, id))),
    );
    ops.extend(
        source
            .saved_blogs
            .iter()
            .map(|id| TxOp::new(STEP_MERGE_BLOG_SETS, add(SetField::UserSavedBlogs, id))),
    );
    for field in [SetField::BlogLikes, SetField::BlogSaves, SetField::CommentLikes] {
        ops.push(TxOp::new(STEP_MERGE_BLOG_SETS, replace(field)));
    }

    ops.push(TxOp::new(STEP_DELETE_SOURCE, Mutation::DeleteNotificationsFor(from.clone())));
    // 目标收到的来自源账号的通知转交后会变成自己发给自己
    ops.push(TxOp::new(
        STEP_DELETE_SOURCE,
        Mutation::DeleteNotificationsBetween {
            sender: from.clone(),
            recipient: to.clone(),
        },
    ));
    ops.push(TxOp::new(
        STEP_DELETE_SOURCE,
        Mutation::ReassignNotificationSender {
            from: from.clone(),
            to: Some(to.clone()),
        },
    ));
    ops.push(TxOp::new(STEP_DELETE_SOURCE, Mutation::DeleteUser(from.clone())));
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        models::{
            blog::Blog,
            comment::Comment,
            notification::{NotificationDraft, NotificationType},
        },
        services::{
            mail::MockMailer,
            media::MockImageStore,
            memory_store::MemoryDatabase,
            notification::NotificationService,
            realtime::NullNotifier,
        },
        test_support::{seed_blog, seed_comment, seed_user, seed_user_with_password},
    };

    const ALL_STEPS: [&str; 6] = [
        STEP_REASSIGN_BLOGS,
        STEP_REASSIGN_COMMENTS,
        STEP_REPLACE_FOLLOWER_REFS,
        STEP_ADOPT_FOLLOWING,
        STEP_MERGE_BLOG_SETS,
        STEP_DELETE_SOURCE,
    ];

    struct Fixture {
        db: Arc<MemoryDatabase>,
        svc: AccountService,
        auth: AuthService,
        notifications: NotificationService,
    }

    fn fixture() -> Fixture {
        let config = Config::default();
        let db = Arc::new(MemoryDatabase::new());
        let mut mailer = MockMailer::new();
        mailer.expect_send().returning(|_, _, _| Ok(()));
        let mut images = MockImageStore::new();
        images.expect_delete().returning(|_| Ok(()));
        let images: Arc<dyn ImageStore> = Arc::new(images);

        let auth = AuthService::new(&config);
        let emails = EmailService::new(Arc::new(mailer), &config).unwrap();
        let notifications = NotificationService::new(db.clone(), Arc::new(NullNotifier));
        let comments = CommentService::new(db.clone(), notifications.clone(), config.max_comment_length);
        let blogs = BlogService::new(db.clone(), images.clone(), notifications.clone(), comments.clone(), &config);
        let svc = AccountService::new(db.clone(), auth.clone(), emails, images, blogs, comments);
        Fixture {
            db,
            svc,
            auth,
            notifications,
        }
    }

    async fn follow(db: &MemoryDatabase, follower: &str, followed: &str) {
        db.apply(Mutation::AddToSet {
            field: SetField::UserFollowing,
            id: follower.to_string(),
            value: followed.to_string(),
        })
        .await
        .unwrap();
        db.apply(Mutation::AddToSet {
            field: SetField::UserFollowers,
            id: followed.to_string(),
            value: follower.to_string(),
        })
        .await
        .unwrap();
    }

    /// Source and target with content, relationships and likes in both directions.
    async fn populated(f: &Fixture) -> (User, User, User) {
        let source = seed_user_with_password(f.db.as_ref(), "source", "secret1").await;
        let target = seed_user(f.db.as_ref(), "target").await;
        let fan = seed_user(f.db.as_ref(), "fan").await;

        follow(&f.db, &fan.id, &source.id).await;
        follow(&f.db, &source.id, &fan.id).await;
        follow(&f.db, &target.id, &source.id).await;

        let blog = seed_blog(f.db.as_ref(), &source.id, "Source post", false).await;
        let fan_blog = seed_blog(f.db.as_ref(), &fan.id, "Fan post", false).await;
        let root = seed_comment(f.db.as_ref(), &fan_blog.id, &source.id, None).await;
        seed_comment(f.db.as_ref(), &fan_blog.id, &fan.id, Some(&root.id)).await;

        for (field, id, value) in [
            (SetField::BlogLikes, fan_blog.id.as_str(), source.id.as_str()),
            (SetField::UserLikedBlogs, source.id.as_str(), fan_blog.id.as_str()),
            (SetField::BlogSaves, blog.id.as_str(), fan.id.as_str()),
            (SetField::CommentLikes, root.id.as_str(), source.id.as_str()),
        ] {
            f.db.apply(Mutation::AddToSet {
                field,
                id: id.to_string(),
                value: value.to_string(),
            })
            .await
            .unwrap();
        }

        f.notifications
            .dispatch(NotificationDraft::new(&fan.id, &source.id, NotificationType::Follow, "hi"))
            .await;
        f.notifications
            .dispatch(NotificationDraft::new(&source.id, &fan.id, NotificationType::Follow, "hey"))
            .await;

        let source = f.db.get_user(&source.id).await.unwrap().unwrap();
        let target = f.db.get_user(&target.id).await.unwrap().unwrap();
        let fan = f.db.get_user(&fan.id).await.unwrap().unwrap();
        (source, target, fan)
    }

    async fn snapshot(f: &Fixture, source: &str, target: &str) -> Vec<u8> {
        let users = f.db.get_users(&[source.to_string(), target.to_string()]).await.unwrap();
        let blogs: Vec<Blog> = f.db.blogs_by_creator(source).await.unwrap();
        let comments: Vec<Comment> = f.db.comments_by_author(source).await.unwrap();
        serde_json::to_vec(&(users, blogs, comments)).unwrap()
    }

    #[tokio::test]
    async fn transfer_is_all_or_nothing_at_every_step() {
        let f = fixture();
        let (source, target, _) = populated(&f).await;
        let token = f.auth.issue_transfer_token(&source, &target).unwrap();

        for step in ALL_STEPS {
            let before = snapshot(&f, &source.id, &target.id).await;
            f.db.fail_at_step(step);
            let result = f.svc.confirm_transfer(TransferAction::Accept, &token).await;
            assert!(matches!(result, Err(AppError::Transaction(_))), "step {}", step);
            assert_eq!(before, snapshot(&f, &source.id, &target.id).await, "step {}", step);
        }
    }

    #[tokio::test]
    async fn transfer_never_leaves_self_addressed_notifications() {
        let f = fixture();
        let source = seed_user_with_password(f.db.as_ref(), "source", "secret1").await;
        let target = seed_user(f.db.as_ref(), "target").await;
        let fan = seed_user(f.db.as_ref(), "fan").await;
        follow(&f.db, &source.id, &target.id).await;
        f.notifications
            .dispatch(NotificationDraft::new(&target.id, &source.id, NotificationType::Follow, "followed you"))
            .await;
        f.notifications
            .dispatch(NotificationDraft::new(&fan.id, &source.id, NotificationType::Like, "liked"))
            .await;

        let source = f.db.get_user(&source.id).await.unwrap().unwrap();
        let token = f.auth.issue_transfer_token(&source, &target).unwrap();
        f.svc.confirm_transfer(TransferAction::Accept, &token).await.unwrap();

        let inbox = f.db.list_notifications(&target.id).await.unwrap();
        assert!(inbox.iter().all(|n| n.sender.as_deref() != Some(target.id.as_str())));
        assert!(inbox.is_empty());

        let fan_inbox = f.db.list_notifications(&fan.id).await.unwrap();
        assert_eq!(fan_inbox.len(), 1);
        assert_eq!(fan_inbox[0].sender.as_deref(), Some(target.id.as_str()));
    }

    #[tokio::test]
    async fn accepted_transfer_moves_everything() {
        let f = fixture();
        let (source, target, fan) = populated(&f).await;
        let token = f.auth.issue_transfer_token(&source, &target).unwrap();

        let outcome = f.svc.confirm_transfer(TransferAction::Accept, &token).await.unwrap();
        assert_eq!(
            outcome,
            TransferOutcome::Accepted(TransferSummary {
                transferred_blogs: 1,
                transferred_comments: 1,
                transferred_followers: 1,
            })
        );

        assert!(f.db.get_user(&source.id).await.unwrap().is_none());
        let target = f.db.get_user(&target.id).await.unwrap().unwrap();
        assert_eq!(target.blogs.len(), 1);
        assert!(target.followers.contains(&fan.id));
        assert!(target.following.contains(&fan.id));
        assert!(!target.following.contains(&target.id));
        assert!(!target.followers.contains(&target.id));
        assert_eq!(target.liked_blogs.len(), 1);

        let fan = f.db.get_user(&fan.id).await.unwrap().unwrap();
        assert!(fan.following.contains(&target.id));
        assert!(!fan.following.contains(&source.id));
        assert!(fan.followers.contains(&target.id));

        let fan_blog = f.db.get_blog(&fan.blogs[0]).await.unwrap().unwrap();
        assert!(fan_blog.likes.contains(&target.id));
        assert_eq!(f.db.blogs_by_creator(&target.id).await.unwrap().len(), 1);
        assert_eq!(f.db.comments_by_author(&target.id).await.unwrap().len(), 1);

        let fan_inbox = f.db.list_notifications(&fan.id).await.unwrap();
        assert_eq!(fan_inbox[0].sender.as_deref(), Some(target.id.as_str()));

        // token already spent
        assert!(matches!(
            f.svc.confirm_transfer(TransferAction::Accept, &token).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejected_transfer_changes_nothing() {
        let f = fixture();
        let (source, target, _) = populated(&f).await;
        let before = snapshot(&f, &source.id, &target.id).await;
        let token = f.auth.issue_transfer_token(&source, &target).unwrap();

        let outcome = f.svc.confirm_transfer(TransferAction::Reject, &token).await.unwrap();
        assert_eq!(outcome, TransferOutcome::Rejected);
        assert_eq!(before, snapshot(&f, &source.id, &target.id).await);
    }

    #[tokio::test]
    async fn transfer_request_validation() {
        let f = fixture();
        let (source, target, _) = populated(&f).await;
        let request = |email: &str, password: &str| TransferAccountRequest {
            current_password: Some(password.to_string()),
            new_owner_email: email.to_string(),
        };

        assert!(matches!(
            f.svc.request_transfer(&source.id, request(&target.email, "wrong!")).await,
            Err(AppError::Authentication(_))
        ));
        assert!(matches!(
            f.svc.request_transfer(&source.id, request(&source.email, "secret1")).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            f.svc.request_transfer(&source.id, request("ghost@example.com", "secret1")).await,
            Err(AppError::NotFound(_))
        ));
        let named = f.svc.request_transfer(&source.id, request(&target.email, "secret1")).await.unwrap();
        assert_eq!(named.id, target.id);
    }

    #[tokio::test]
    async fn tampered_transfer_token_is_rejected() {
        let f = fixture();
        let (source, target, _) = populated(&f).await;
        let session = f.auth.issue_session_token(&source).unwrap();
        assert!(f.svc.confirm_transfer(TransferAction::Accept, &session).await.is_err());
        assert!(f.db.get_user(&source.id).await.unwrap().is_some());
        assert!(f.db.get_user(&target.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deletion_cascades_through_every_reference() {
        let f = fixture();
        let (source, target, fan) = populated(&f).await;

        let wrong = DeleteAccountRequest {
            current_password: Some("nope".to_string()),
        };
        assert!(f.svc.delete_account(&source.id, &source.id, wrong).await.is_err());
        assert!(matches!(
            f.svc
                .delete_account(&target.id, &source.id, DeleteAccountRequest::default())
                .await,
            Err(AppError::Authorization(_))
        ));

        let request = DeleteAccountRequest {
            current_password: Some("secret1".to_string()),
        };
        let report = f.svc.delete_account(&source.id, &source.id, request).await.unwrap();
        assert_eq!(report.deleted_blogs, 1);
        // the source's comment and the fan's reply beneath it
        assert_eq!(report.deleted_comments, 2);

        assert!(f.db.get_user(&source.id).await.unwrap().is_none());
        let fan = f.db.get_user(&fan.id).await.unwrap().unwrap();
        assert!(!fan.followers.contains(&source.id));
        assert!(!fan.following.contains(&source.id));
        let target = f.db.get_user(&target.id).await.unwrap().unwrap();
        assert!(!target.following.contains(&source.id));

        let fan_blog = f.db.get_blog(&fan.blogs[0]).await.unwrap().unwrap();
        assert!(fan_blog.likes.is_empty());
        assert!(fan_blog.comments.is_empty());
        assert!(f.db.list_notifications(&source.id).await.unwrap().is_empty());
        let fan_inbox = f.db.list_notifications(&fan.id).await.unwrap();
        assert_eq!(fan_inbox.len(), 1);
        assert!(fan_inbox[0].sender.is_none());
    }
}
