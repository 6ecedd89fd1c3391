use async_trait::async_trait;
use handlebars::Handlebars;
use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{AppError, Result},
    models::{transfer::TransferSummary, user::User},
};

/// 邮件发送
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &Config, host: &str) -> Result<Self> {
        let credentials = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| AppError::Email(format!("Invalid SMTP relay {}: {}", host, e)))?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            transport,
            from: format!("{} <{}>", config.smtp_from_name, config.smtp_from_email),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        let message = Message::builder()
            .from(self.from.parse().map_err(|e| AppError::Email(format!("Invalid sender: {}", e)))?)
            .to(to.parse().map_err(|e| AppError::Email(format!("Invalid recipient {}: {}", to, e)))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| AppError::Email(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::Email(e.to_string()))?;

        debug!("Sent '{}' to {}", subject, to);
        Ok(())
    }
}

/// Writes mail to the log instead of sending it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        info!(to, subject, "Email (not sent, SMTP not configured): {}", html);
        Ok(())
    }
}

pub fn build_mailer(config: &Config) -> Result<Arc<dyn Mailer>> {
    match &config.smtp_host {
        Some(host) => Ok(Arc::new(SmtpMailer::new(config, host)?)),
        None => {
            warn!("SMTP_HOST not set, emails will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}

const VERIFICATION: &str = r#"<h1>Verify your email</h1>
<p>Hi {{name}},</p>
<p>Please confirm your email address to finish setting up your account.</p>
<a href="{{link}}">Verify Email</a>"#;

const TRANSFER_REQUEST: &str = r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
<h1>Account Transfer Request</h1>
<p>{{source_name}} ({{source_email}}) wants to transfer their account to you.</p>
<p>This will give you ownership of:</p>
<ul>
  <li>All their blogs ({{blog_count}} posts)</li>
  <li>All their comments</li>
  <li>Their followers and following relationships</li>
</ul>
<p><a href="{{accept_link}}">Accept Transfer</a> | <a href="{{reject_link}}">Reject Transfer</a></p>
<p>If you didn't expect this, reject the transfer or ignore this email. The links expire in {{ttl_hours}} hours.</p>
</div>"#;

const TRANSFER_SENT: &str = r#"<p>You've requested to transfer your account to {{target_email}}.</p>
<p>They've been notified and must accept the transfer for it to complete.</p>
<p>You'll receive another email once the transfer is completed or rejected.</p>"#;

const TRANSFER_REJECTED_SOURCE: &str = r#"<p>The recipient ({{target_email}}) has rejected your account transfer request.</p>
<p>Your account remains unchanged.</p>"#;

const TRANSFER_REJECTED_TARGET: &str = r#"<p>You've rejected the account transfer request from {{source_email}}.</p>
<p>No changes have been made to either account.</p>"#;

const TRANSFER_COMPLETED_SOURCE: &str = r#"<p>Your account has been successfully transferred to {{target_name}} ({{target_email}}).</p>
<p>All your content is now owned by them.</p>
<p>You can no longer access this account.</p>"#;

const TRANSFER_COMPLETED_TARGET: &str = r#"<h2>Transfer Complete</h2>
<p>You've accepted the account transfer from {{source_name}} ({{source_email}}).</p>
<p>You now own:</p>
<ul>
  <li>{{blogs}} blog posts</li>
  <li>{{comments}} comments</li>
  <li>{{followers}} followers</li>
</ul>"#;

const ACCOUNT_DELETED: &str = r#"<h1>Account Deleted</h1>
<p>Your account has been successfully deleted.</p>
<p>We're sorry to see you go.</p>"#;

/// 模板化的业务邮件
#[derive(Clone)]
pub struct EmailService {
    mailer: Arc<dyn Mailer>,
    templates: Arc<Handlebars<'static>>,
    frontend_url: String,
    transfer_ttl_hours: i64,
}

impl EmailService {
    pub fn new(mailer: Arc<dyn Mailer>, config: &Config) -> Result<Self> {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(true);
        for (name, source) in [
            ("verification", VERIFICATION),
            ("transfer_request", TRANSFER_REQUEST),
            ("transfer_sent", TRANSFER_SENT),
            ("transfer_rejected_source", TRANSFER_REJECTED_SOURCE),
            ("transfer_rejected_target", TRANSFER_REJECTED_TARGET),
            ("transfer_completed_source", TRANSFER_COMPLETED_SOURCE),
            ("transfer_completed_target", TRANSFER_COMPLETED_TARGET),
            ("account_deleted", ACCOUNT_DELETED),
        ] {
            templates
                .register_template_string(name, source)
                .map_err(|e| AppError::Internal(format!("Invalid email template {}: {}", name, e)))?;
        }

        Ok(Self {
            mailer,
            templates: Arc::new(templates),
            frontend_url: config.frontend_url.trim_end_matches('/').to_string(),
            transfer_ttl_hours: config.transfer_ttl_hours,
        })
    }

    async fn render_and_send(&self, to: &str, subject: &str, template: &str, data: serde_json::Value) -> Result<()> {
        let html = self
            .templates
            .render(template, &data)
            .map_err(|e| AppError::Internal(format!("Failed to render {}: {}", template, e)))?;
        self.mailer.send(to, subject, &html).await
    }

    /// Best effort: failures are logged and dropped.
    async fn send_quietly(&self, to: &str, subject: &str, template: &str, data: serde_json::Value) {
        if let Err(e) = self.render_and_send(to, subject, template, data).await {
            warn!("Failed to send '{}' email to {}: {}", subject, to, e);
        }
    }

    pub async fn send_verification(&self, user: &User, token: &str) -> Result<()> {
        self.render_and_send(
            &user.email,
            "Email Verification",
            "verification",
            json!({
                "name": user.name,
                "link": format!("{}/verify-email/{}", self.frontend_url, token),
            }),
        )
        .await
    }

    /// Part of the request itself: a failure here fails the transfer request.
    pub async fn send_transfer_request(&self, source: &User, target: &User, blog_count: usize, token: &str) -> Result<()> {
        self.render_and_send(
            &target.email,
            "Account Transfer Request",
            "transfer_request",
            json!({
                "source_name": source.name,
                "source_email": source.email,
                "blog_count": blog_count,
                "accept_link": format!("{}/confirm-transfer/accept/{}", self.frontend_url, token),
                "reject_link": format!("{}/confirm-transfer/reject/{}", self.frontend_url, token),
                "ttl_hours": self.transfer_ttl_hours,
            }),
        )
        .await
    }

    pub async fn send_transfer_sent(&self, source: &User, target: &User) {
        self.send_quietly(
            &source.email,
            "Transfer Request Sent",
            "transfer_sent",
            json!({ "target_email": target.email }),
        )
        .await
    }

    pub async fn send_transfer_rejected(&self, source_email: &str, target_email: &str) {
        self.send_quietly(
            source_email,
            "Transfer Rejected",
            "transfer_rejected_source",
            json!({ "target_email": target_email }),
        )
        .await;
        self.send_quietly(
            target_email,
            "Transfer Rejected",
            "transfer_rejected_target",
            json!({ "source_email": source_email }),
        )
        .await;
    }

    pub async fn send_transfer_completed(&self, source: &User, target: &User, summary: &TransferSummary) {
        self.send_quietly(
            &source.email,
            "Account Transfer Completed",
            "transfer_completed_source",
            json!({ "target_name": target.name, "target_email": target.email }),
        )
        .await;
        self.send_quietly(
            &target.email,
            "Account Transfer Completed",
            "transfer_completed_target",
            json!({
                "source_name": source.name,
                "source_email": source.email,
                "blogs": summary.transferred_blogs,
                "comments": summary.transferred_comments,
                "followers": summary.transferred_followers,
            }),
        )
        .await;
    }

    pub async fn send_account_deleted(&self, user: &User) {
        self.send_quietly(&user.email, "Account Deletion Confirmation", "account_deleted", json!({}))
            .await
    }
}
