use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        transfer::{TransferClaims, TRANSFER_ACTION},
        user::User,
    },
};

const SESSION_PURPOSE: &str = "session";
const VERIFY_EMAIL_PURPOSE: &str = "verify-email";

/// 凭证与令牌服务
#[derive(Clone)]
pub struct AuthService {
    secret: String,
    session_ttl: Duration,
    verification_ttl: Duration,
    transfer_ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,     // 用户ID
    pub email: String,
    pub purpose: String, // session / verify-email
    pub iat: i64,
    pub exp: i64,
}

/// 已认证的请求方，由认证中间件放入请求扩展
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

impl AuthService {
    pub fn new(config: &Config) -> Self {
        Self {
            secret: config.jwt_secret.clone(),
            session_ttl: Duration::hours(config.session_ttl_hours),
            verification_ttl: Duration::hours(config.verification_ttl_hours),
            transfer_ttl: Duration::hours(config.transfer_ttl_hours),
        }
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Stored password hash is invalid: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    /// Signs any claim set with the service secret.
    pub fn issue_token<T: Serialize>(&self, claims: &T) -> Result<String> {
        let token = encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Checks signature and expiry. Purpose checks are up to the caller.
    pub fn verify_token<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<T>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => {
                warn!("JWT verification failed: {}", e);
                Err(AppError::Authentication("Invalid or expired token".to_string()))
            }
        }
    }

    fn claims_for(&self, user: &User, purpose: &str, ttl: Duration) -> Claims {
        let now = Utc::now();
        Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            purpose: purpose.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    fn verify_purpose(&self, token: &str, purpose: &str) -> Result<Claims> {
        let claims: Claims = self.verify_token(token)?;
        if claims.purpose != purpose {
            warn!("Token with purpose {} presented as {}", claims.purpose, purpose);
            return Err(AppError::Authentication("Invalid token".to_string()));
        }
        debug!("JWT token verified for user: {}", claims.sub);
        Ok(claims)
    }

    pub fn issue_session_token(&self, user: &User) -> Result<String> {
        self.issue_token(&self.claims_for(user, SESSION_PURPOSE, self.session_ttl))
    }

    pub fn verify_session_token(&self, token: &str) -> Result<AuthUser> {
        let claims = self.verify_purpose(token, SESSION_PURPOSE)?;
        Ok(AuthUser {
            id: claims.sub,
            email: claims.email,
        })
    }

    pub fn issue_verification_token(&self, user: &User) -> Result<String> {
        self.issue_token(&self.claims_for(user, VERIFY_EMAIL_PURPOSE, self.verification_ttl))
    }

    pub fn verify_verification_token(&self, token: &str) -> Result<Claims> {
        self.verify_purpose(token, VERIFY_EMAIL_PURPOSE)
    }

    pub fn issue_transfer_token(&self, source: &User, target: &User) -> Result<String> {
        let now = Utc::now();
        self.issue_token(&TransferClaims {
            current_user_id: source.id.clone(),
            current_user_email: source.email.clone(),
            new_owner_id: target.id.clone(),
            new_owner_email: target.email.clone(),
            action: TRANSFER_ACTION.to_string(),
            iat: now.timestamp(),
            exp: (now + self.transfer_ttl).timestamp(),
        })
    }

    pub fn verify_transfer_token(&self, token: &str) -> Result<TransferClaims> {
        let claims: TransferClaims = self.verify_token(token)?;
        if claims.action != TRANSFER_ACTION {
            return Err(AppError::Authentication("Invalid transfer token".to_string()));
        }
        Ok(claims)
    }
}
