use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::{
    config::Config,
    error::{AppError, Result},
};

/// 第三方身份校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    pub email: String,
    pub name: String,
}

#[async_trait]
pub trait FederatedIdentityProvider: Send + Sync {
    async fn verify_id_token(&self, token: &str) -> Result<FederatedIdentity>;
}

/// Google ID token verification through the tokeninfo endpoint.
pub struct GoogleIdentityProvider {
    http_client: Client,
    tokeninfo_url: String,
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    email: String,
    #[serde(default)]
    email_verified: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl GoogleIdentityProvider {
    pub fn new(tokeninfo_url: &str, client_id: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            tokeninfo_url: tokeninfo_url.to_string(),
            client_id: client_id.to_string(),
        })
    }

    /// `None` when no Google client id is configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        match &config.google_client_id {
            Some(client_id) => Ok(Some(Self::new(&config.google_tokeninfo_url, client_id)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FederatedIdentityProvider for GoogleIdentityProvider {
    async fn verify_id_token(&self, token: &str) -> Result<FederatedIdentity> {
        let response = self
            .http_client
            .get(&self.tokeninfo_url)
            .query(&[("id_token", token)])
            .send()
            .await
            .map_err(|e| {
                error!("Failed to reach Google tokeninfo: {}", e);
                AppError::ExternalService("Identity provider unavailable".to_string())
            })?;

        if response.status().is_client_error() {
            warn!("Google rejected ID token: {}", response.status());
            return Err(AppError::Authentication("Invalid Google token".to_string()));
        }
        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "Identity provider returned {}",
                response.status()
            )));
        }

        let info: TokenInfo = response.json().await.map_err(|e| {
            error!("Failed to parse tokeninfo response: {}", e);
            AppError::ExternalService("Invalid response from identity provider".to_string())
        })?;

        if info.aud != self.client_id {
            warn!("ID token audience mismatch: {}", info.aud);
            return Err(AppError::Authentication("Invalid Google token".to_string()));
        }
        if info.email_verified.as_deref() == Some("false") {
            return Err(AppError::Authentication("Google email is not verified".to_string()));
        }

        debug!("Google identity verified for {}", info.email);
        let name = info
            .name
            .unwrap_or_else(|| info.email.split('@').next().unwrap_or_default().to_string());
        Ok(FederatedIdentity {
            email: info.email,
            name,
        })
    }
}
