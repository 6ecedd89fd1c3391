use async_trait::async_trait;
use chrono::Utc;
use reqwest::{multipart, Client};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    error::{AppError, Result},
};

/// 上传后的图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub url: String,
    pub asset_id: String,
}

/// 图片存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<UploadedImage>;
    async fn delete(&self, asset_id: &str) -> Result<()>;
}

pub fn build_image_store(config: &Config) -> Result<Arc<dyn ImageStore>> {
    match config.storage_type.as_str() {
        "cloudinary" => {
            let store = CloudinaryImageStore::from_config(config)?;
            info!("Using Cloudinary image store");
            Ok(Arc::new(store))
        }
        "local" => {
            info!("Using local image store at {}", config.local_media_dir);
            Ok(Arc::new(LocalImageStore::new(
                &config.local_media_dir,
                &config.local_media_base_url,
            )))
        }
        other => Err(AppError::Internal(format!("Unknown storage type: {}", other))),
    }
}

/// Deletes every asset, logging failures instead of returning them.
pub async fn release_assets(store: &dyn ImageStore, asset_ids: &[String]) {
    for asset_id in asset_ids {
        if let Err(e) = store.delete(asset_id).await {
            warn!("Failed to release image {}: {}", asset_id, e);
        }
    }
}

/// Cloudinary signed upload API
pub struct CloudinaryImageStore {
    http_client: Client,
    api_base: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct CloudinaryUpload {
    secure_url: String,
    public_id: String,
}

impl CloudinaryImageStore {
    pub fn new(api_base: &str, cloud_name: &str, api_key: &str, api_secret: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_base: api_base.trim_end_matches('/').to_string(),
            cloud_name: cloud_name.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        match (
            &config.cloudinary_cloud_name,
            &config.cloudinary_api_key,
            &config.cloudinary_api_secret,
        ) {
            (Some(cloud), Some(key), Some(secret)) => {
                Self::new(&config.cloudinary_api_base, cloud, key, secret)
            }
            _ => Err(AppError::Internal(
                "CLOUDINARY_CLOUD_NAME, CLOUDINARY_API_KEY and CLOUDINARY_API_SECRET are required".to_string(),
            )),
        }
    }

    /// `params` must already be sorted by key.
    fn sign(&self, params: &[(&str, &str)]) -> String {
        let to_sign = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let mut hasher = Sha256::new();
        hasher.update(to_sign.as_bytes());
        hasher.update(self.api_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}/image/{}", self.api_base, self.cloud_name, action)
    }
}

#[async_trait]
impl ImageStore for CloudinaryImageStore {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<UploadedImage> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&[("timestamp", timestamp.as_str())]);

        let file = multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = multipart::Form::new()
            .part("file", file)
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature", signature)
            .text("signature_algorithm", "sha256");

        let response = self
            .http_client
            .post(self.endpoint("upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!("Cloudinary upload request failed: {}", e);
                AppError::FileUpload(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Cloudinary upload returned {}: {}", status, body);
            return Err(AppError::FileUpload(format!("upload returned {}", status)));
        }

        let uploaded: CloudinaryUpload = response
            .json()
            .await
            .map_err(|e| AppError::FileUpload(format!("invalid upload response: {}", e)))?;

        debug!("Uploaded image {}", uploaded.public_id);
        Ok(UploadedImage {
            url: uploaded.secure_url,
            asset_id: uploaded.public_id,
        })
    }

    async fn delete(&self, asset_id: &str) -> Result<()> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&[("public_id", asset_id), ("timestamp", timestamp.as_str())]);

        let form = multipart::Form::new()
            .text("public_id", asset_id.to_string())
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature", signature)
            .text("signature_algorithm", "sha256");

        let response = self
            .http_client
            .post(self.endpoint("destroy"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("image delete failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "image delete returned {}",
                response.status()
            )));
        }

        debug!("Deleted image {}", asset_id);
        Ok(())
    }
}

/// 本地磁盘存储，开发环境使用
pub struct LocalImageStore {
    root: PathBuf,
    base_url: String,
}

impl LocalImageStore {
    pub fn new(root: &str, base_url: &str) -> Self {
        Self {
            root: PathBuf::from(root),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Asset ids are bare file names, nothing that could escape the root.
    fn path_for(&self, asset_id: &str) -> Result<PathBuf> {
        if asset_id.is_empty() || asset_id.contains('/') || asset_id.contains('\\') || asset_id.contains("..") {
            return Err(AppError::BadRequest(format!("Invalid asset id: {}", asset_id)));
        }
        Ok(self.root.join(asset_id))
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<UploadedImage> {
        tokio::fs::create_dir_all(&self.root).await?;

        let extension = std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin");
        let asset_id = format!("{}.{}", uuid::Uuid::new_v4(), extension);

        tokio::fs::write(self.path_for(&asset_id)?, bytes)
            .await
            .map_err(|e| AppError::FileUpload(e.to_string()))?;

        debug!("Stored image {} locally", asset_id);
        Ok(UploadedImage {
            url: format!("{}/{}", self.base_url, asset_id),
            asset_id,
        })
    }

    async fn delete(&self, asset_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(asset_id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn store(server: &MockServer) -> CloudinaryImageStore {
        CloudinaryImageStore::new(&server.uri(), "demo", "key", "secret").unwrap()
    }

    #[test]
    fn signature_is_sha256_of_sorted_params_and_secret() {
        let store = CloudinaryImageStore::new("http://x", "demo", "key", "secret").unwrap();
        let expected = hex::encode(Sha256::digest(b"public_id=abc&timestamp=1700000000secret"));
        assert_eq!(store.sign(&[("public_id", "abc"), ("timestamp", "1700000000")]), expected);
    }

    #[tokio::test]
    async fn upload_returns_secure_url_and_public_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/demo/image/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "secure_url": "https://res.cloudinary.com/demo/image/upload/v1/cover.png",
                "public_id": "cover"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let uploaded = store(&server).upload(vec![1, 2, 3], "cover.png").await.unwrap();
        assert_eq!(uploaded.asset_id, "cover");
        assert!(uploaded.url.ends_with("cover.png"));
    }

    #[tokio::test]
    async fn upload_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/demo/image/upload"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = store(&server).upload(vec![1], "x.png").await;
        assert!(matches!(result, Err(AppError::FileUpload(_))));
    }

    #[tokio::test]
    async fn destroy_hits_the_destroy_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/demo/image/destroy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "ok" })))
            .expect(1)
            .mount(&server)
            .await;

        store(&server).delete("cover").await.unwrap();
    }

    #[tokio::test]
    async fn local_store_writes_and_removes_files() {
        let dir = std::env::temp_dir().join(format!("penstack-test-{}", uuid::Uuid::new_v4()));
        let store = LocalImageStore::new(dir.to_str().unwrap(), "http://localhost/media/");

        let uploaded = store.upload(b"png".to_vec(), "avatar.png").await.unwrap();
        assert!(uploaded.asset_id.ends_with(".png"));
        assert_eq!(uploaded.url, format!("http://localhost/media/{}", uploaded.asset_id));
        assert!(dir.join(&uploaded.asset_id).exists());

        store.delete(&uploaded.asset_id).await.unwrap();
        assert!(!dir.join(&uploaded.asset_id).exists());
        // deleting twice is fine
        store.delete(&uploaded.asset_id).await.unwrap();
    }

    #[tokio::test]
    async fn local_store_rejects_path_traversal() {
        let store = LocalImageStore::new("/tmp/penstack", "http://localhost/media");
        assert!(store.delete("../etc/passwd").await.is_err());
    }
}
