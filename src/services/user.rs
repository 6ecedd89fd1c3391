use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, Result},
    models::{
        blog::Blog,
        user::{
            ChangePasswordRequest, GoogleAuthRequest, SessionUser, SigninRequest, SignupRequest,
            UpdateProfileRequest, User, UserProfile, UserSummary, VisibilityRequest,
        },
    },
    services::{
        auth::AuthService,
        database::{Database, Mutation},
        identity::FederatedIdentityProvider,
        mail::EmailService,
        media::{release_assets, ImageStore},
    },
    utils::{
        slug::username_from_email,
        validation::{validate_request, validate_username},
    },
};

/// Re-authentication before destructive account actions. Federated accounts
/// are let through based on the stored auth mode only.
pub(crate) fn check_credentials(auth: &AuthService, user: &User, password: Option<&str>) -> Result<()> {
    if user.is_google_auth {
        return Ok(());
    }
    let password = password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::validation("Please enter your current password"))?;
    let hash = user
        .password_hash
        .as_deref()
        .ok_or_else(|| AppError::unauthorized("Incorrect password"))?;
    if !auth.verify_password(password, hash)? {
        return Err(AppError::unauthorized("Incorrect password"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignupOutcome {
    Created,
    VerificationResent,
}

impl SignupOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            SignupOutcome::Created => "Email Sent! Please verify it to continue...",
            SignupOutcome::VerificationResent => "Please Check Your Email to verify your account",
        }
    }
}

/// 注册、登录和个人资料
#[derive(Clone)]
pub struct UserService {
    db: Arc<dyn Database>,
    auth: AuthService,
    emails: EmailService,
    images: Arc<dyn ImageStore>,
    identity: Option<Arc<dyn FederatedIdentityProvider>>,
}

impl UserService {
    pub fn new(
        db: Arc<dyn Database>,
        auth: AuthService,
        emails: EmailService,
        images: Arc<dyn ImageStore>,
        identity: Option<Arc<dyn FederatedIdentityProvider>>,
    ) -> Self {
        Self {
            db,
            auth,
            emails,
            images,
            identity,
        }
    }

    async fn user(&self, id: &str) -> Result<User> {
        self.db
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))
    }

    async fn send_verification(&self, user: &User) -> Result<()> {
        let token = self.auth.issue_verification_token(user)?;
        self.emails.send_verification(user, &token).await
    }

    async fn unique_username(&self, email: &str) -> Result<String> {
        for _ in 0..5 {
            let candidate = username_from_email(email);
            if self.db.find_user_by_username(&candidate).await?.is_none() {
                return Ok(candidate);
            }
        }
        Err(AppError::internal("Could not generate a unique username"))
    }

    pub async fn signup(&self, request: SignupRequest) -> Result<SignupOutcome> {
        validate_request(&request)?;
        let email = request.email.trim().to_lowercase();

        if let Some(existing) = self.db.find_user_by_email(&email).await? {
            if existing.is_google_auth {
                return Err(AppError::conflict(
                    "This email is already registered with Google. Please continue with Google",
                ));
            }
            if existing.is_verified {
                return Err(AppError::conflict("User already registered with this email"));
            }
            self.send_verification(&existing).await?;
            debug!("Verification resent to {}", existing.id);
            return Ok(SignupOutcome::VerificationResent);
        }

        let username = self.unique_username(&email).await?;
        let mut user = User::new(request.name.trim(), &email, &username);
        user.password_hash = Some(self.auth.hash_password(&request.password)?);
        self.db.apply(Mutation::PutUser(user.clone())).await?;
        self.send_verification(&user).await?;

        info!("User {} registered as {}", user.id, user.username);
        Ok(SignupOutcome::Created)
    }

    pub async fn verify_email(&self, token: &str) -> Result<()> {
        let claims = self.auth.verify_verification_token(token)?;
        let mut user = self.user(&claims.sub).await?;
        if !user.is_verified {
            user.is_verified = true;
            user.updated_at = Utc::now();
            self.db.apply(Mutation::PutUser(user)).await?;
        }
        info!("Email verified for user {}", claims.sub);
        Ok(())
    }

    pub async fn signin(&self, request: SigninRequest) -> Result<SessionUser> {
        validate_request(&request)?;
        let user = self
            .db
            .find_user_by_email(request.email.trim())
            .await?
            .ok_or_else(|| AppError::not_found("User"))?;

        if user.is_google_auth {
            return Err(AppError::conflict(
                "This email is already registered with Google. Please continue with Google",
            ));
        }
        let hash = user
            .password_hash
            .as_deref()
            .ok_or_else(|| AppError::unauthorized("Incorrect password"))?;
        if !self.auth.verify_password(&request.password, hash)? {
            return Err(AppError::unauthorized("Incorrect password"));
        }
        if !user.is_verified {
            self.send_verification(&user).await?;
            return Err(AppError::unauthorized("Please verify your email"));
        }

        let token = self.auth.issue_session_token(&user)?;
        info!("User {} signed in", user.id);
        Ok(SessionUser::new(&user, token))
    }

    /// Signs in a federated account, registering it on first sight.
    pub async fn google_auth(&self, request: GoogleAuthRequest) -> Result<(SessionUser, bool)> {
        validate_request(&request)?;
        let provider = self
            .identity
            .as_ref()
            .ok_or_else(|| AppError::ServiceUnavailable("Google sign-in is not configured".to_string()))?;
        let identity = provider.verify_id_token(&request.access_token).await?;
        let email = identity.email.trim().to_lowercase();

        if let Some(user) = self.db.find_user_by_email(&email).await? {
            if !user.is_google_auth {
                return Err(AppError::conflict(
                    "This email is already registered without Google. Please use the login form",
                ));
            }
            let token = self.auth.issue_session_token(&user)?;
            return Ok((SessionUser::new(&user, token), false));
        }

        let username = self.unique_username(&email).await?;
        let mut user = User::new(&identity.name, &email, &username);
        user.is_google_auth = true;
        user.is_verified = true;
        self.db.apply(Mutation::PutUser(user.clone())).await?;

        info!("User {} registered through Google", user.id);
        let token = self.auth.issue_session_token(&user)?;
        Ok((SessionUser::new(&user, token), true))
    }

    pub async fn list(&self, search: Option<&str>) -> Result<Vec<UserSummary>> {
        let needle = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
        Ok(self
            .db
            .list_users()
            .await?
            .into_iter()
            .filter(|u| match &needle {
                Some(n) => u.name.to_lowercase().contains(n) || u.username.to_lowercase().contains(n),
                None => true,
            })
            .map(|u| u.summary())
            .collect())
    }

    async fn visible_blogs(&self, ids: &[String], viewer: Option<&str>) -> Result<Vec<Blog>> {
        Ok(self
            .db
            .get_blogs(ids)
            .await?
            .into_iter()
            .filter(|b| b.is_published() || viewer == Some(b.creator.as_str()))
            .collect())
    }

    async fn summaries<'a>(&self, ids: impl Iterator<Item = &'a String>) -> Result<Vec<UserSummary>> {
        let ids: Vec<String> = ids.cloned().collect();
        Ok(self.db.get_users(&ids).await?.iter().map(User::summary).collect())
    }

    /// Liked and saved lists are only included when the owner shows them or
    /// the owner is looking.
    pub async fn profile(&self, username: &str, viewer: Option<&str>) -> Result<UserProfile> {
        let user = self
            .db
            .find_user_by_username(username)
            .await?
            .ok_or_else(|| AppError::not_found("User"))?;
        let is_owner = viewer == Some(user.id.as_str());

        let liked_ids: Vec<String> = user.liked_blogs.iter().cloned().collect();
        let saved_ids: Vec<String> = user.saved_blogs.iter().cloned().collect();
        let liked_blogs = if user.show_liked_blogs || is_owner {
            Some(self.visible_blogs(&liked_ids, viewer).await?)
        } else {
            None
        };
        let saved_blogs = if user.show_saved_blogs || is_owner {
            Some(self.visible_blogs(&saved_ids, viewer).await?)
        } else {
            None
        };

        Ok(UserProfile {
            followers: self.summaries(user.followers.iter()).await?,
            following: self.summaries(user.following.iter()).await?,
            blogs: self.visible_blogs(&user.blogs, viewer).await?,
            liked_blogs,
            saved_blogs,
            id: user.id,
            name: user.name,
            username: user.username,
            bio: user.bio,
            profile_pic: user.profile_pic,
            show_liked_blogs: user.show_liked_blogs,
            show_saved_blogs: user.show_saved_blogs,
            created_at: user.created_at,
        })
    }

    pub async fn update_profile(&self, actor_id: &str, user_id: &str, request: UpdateProfileRequest) -> Result<User> {
        if actor_id != user_id {
            return Err(AppError::forbidden("You can only update your own profile"));
        }
        validate_request(&request)?;
        let mut user = self.user(user_id).await?;

        if let Some(username) = request.username.as_deref().map(str::trim) {
            if username != user.username {
                validate_username(username)?;
                if self.db.find_user_by_username(username).await?.is_some() {
                    return Err(AppError::conflict("Username already taken"));
                }
                user.username = username.to_string();
            }
        }
        if let Some(name) = request.name.as_deref().map(str::trim) {
            user.name = name.to_string();
        }
        if let Some(bio) = request.bio {
            user.bio = Some(bio.trim().to_string()).filter(|b| !b.is_empty());
        }

        let previous_pic = user.profile_pic_id.clone();
        let mut uploaded = None;
        if request.profile_pic.as_deref() == Some("") {
            user.profile_pic = None;
            user.profile_pic_id = None;
        } else if let Some(image) = request.image {
            let stored = self.images.upload(image.bytes, &image.file_name).await?;
            user.profile_pic = Some(stored.url);
            user.profile_pic_id = Some(stored.asset_id.clone());
            uploaded = Some(stored.asset_id);
        }

        user.updated_at = Utc::now();
        if let Err(e) = self.db.apply(Mutation::PutUser(user.clone())).await {
            release_assets(self.images.as_ref(), &uploaded.into_iter().collect::<Vec<_>>()).await;
            return Err(e);
        }

        if let Some(old) = previous_pic.filter(|old| user.profile_pic_id.as_ref() != Some(old)) {
            release_assets(self.images.as_ref(), &[old]).await;
        }

        info!("Profile updated for user {}", user_id);
        Ok(user)
    }

    pub async fn set_visibility(&self, user_id: &str, request: VisibilityRequest) -> Result<User> {
        let mut user = self.user(user_id).await?;
        user.show_liked_blogs = request.show_liked_blogs;
        user.show_saved_blogs = request.show_saved_blogs;
        user.updated_at = Utc::now();
        self.db.apply(Mutation::PutUser(user.clone())).await?;
        debug!("Visibility changed for {}", user_id);
        Ok(user)
    }

    pub async fn change_password(&self, user_id: &str, request: ChangePasswordRequest) -> Result<()> {
        validate_request(&request)?;
        let mut user = self.user(user_id).await?;
        if user.is_google_auth {
            return Err(AppError::bad_request("Google accounts do not have a password"));
        }

        let hash = user.password_hash.as_deref().unwrap_or_default();
        if hash.is_empty() || !self.auth.verify_password(&request.current_password, hash)? {
            warn!("Password change rejected for {}", user_id);
            return Err(AppError::unauthorized("Current password is incorrect"));
        }

        user.password_hash = Some(self.auth.hash_password(&request.new_password)?);
        user.updated_at = Utc::now();
        self.db.apply(Mutation::PutUser(user)).await?;
        info!("Password changed for user {}", user_id);
        Ok(())
    }
}
