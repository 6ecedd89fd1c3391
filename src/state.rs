use std::sync::Arc;

use crate::{
    config::Config,
    error::Result,
    services::{
        account::AccountService,
        auth::AuthService,
        blog::BlogService,
        comment::CommentService,
        database::Database,
        identity::FederatedIdentityProvider,
        mail::{EmailService, Mailer},
        media::ImageStore,
        notification::NotificationService,
        realtime::PushHub,
        relationship::RelationshipService,
        user::UserService,
    },
};

/// 应用程序的共享状态
/// 包含所有服务和配置的引用
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 文档存储
    pub db: Arc<dyn Database>,

    /// 认证服务
    pub auth_service: AuthService,

    /// 用户服务
    pub user_service: UserService,

    /// 账号删除与转让
    pub account_service: AccountService,

    /// 博客服务
    pub blog_service: BlogService,

    /// 评论服务
    pub comment_service: CommentService,

    /// 关注、点赞、收藏
    pub relationship_service: RelationshipService,

    /// 通知服务
    pub notification_service: NotificationService,

    /// WebSocket 推送
    pub push_hub: Arc<PushHub>,
}

/// External collaborators chosen at start-up.
pub struct Collaborators {
    pub db: Arc<dyn Database>,
    pub images: Arc<dyn ImageStore>,
    pub mailer: Arc<dyn Mailer>,
    pub identity: Option<Arc<dyn FederatedIdentityProvider>>,
}

impl AppState {
    /// Wires every service around the given collaborators.
    pub fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        let Collaborators {
            db,
            images,
            mailer,
            identity,
        } = collaborators;

        let push_hub = Arc::new(PushHub::new(config.push_buffer_size));
        let auth_service = AuthService::new(&config);
        let emails = EmailService::new(mailer, &config)?;

        let notification_service = NotificationService::new(db.clone(), push_hub.clone());
        let comment_service = CommentService::new(db.clone(), notification_service.clone(), config.max_comment_length);
        let blog_service = BlogService::new(
            db.clone(),
            images.clone(),
            notification_service.clone(),
            comment_service.clone(),
            &config,
        );
        let relationship_service = RelationshipService::new(db.clone(), notification_service.clone());
        let user_service = UserService::new(
            db.clone(),
            auth_service.clone(),
            emails.clone(),
            images.clone(),
            identity,
        );
        let account_service = AccountService::new(
            db.clone(),
            auth_service.clone(),
            emails,
            images,
            blog_service.clone(),
            comment_service.clone(),
        );

        Ok(Self {
            config,
            db,
            auth_service,
            user_service,
            account_service,
            blog_service,
            comment_service,
            relationship_service,
            notification_service,
            push_hub,
        })
    }
}
