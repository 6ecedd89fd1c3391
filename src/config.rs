use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub log_level: String,
    pub log_format: String,

    // Database configuration
    pub database_backend: String,
    pub database_url: String,
    pub database_namespace: String,
    pub database_name: String,
    pub database_username: String,
    pub database_password: String,

    // Authentication configuration
    pub jwt_secret: String,
    pub session_ttl_hours: i64,
    pub verification_ttl_hours: i64,
    pub transfer_ttl_hours: i64,
    pub google_client_id: Option<String>,
    pub google_tokeninfo_url: String,

    // Image storage configuration
    pub storage_type: String,
    pub local_media_dir: String,
    pub local_media_base_url: String,
    pub cloudinary_cloud_name: Option<String>,
    pub cloudinary_api_key: Option<String>,
    pub cloudinary_api_secret: Option<String>,
    pub cloudinary_api_base: String,
    pub max_upload_size: usize,

    // Email configuration
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_from_name: String,
    pub smtp_from_email: String,

    // Frontend URLs
    pub frontend_url: String,

    // Content settings
    pub max_comment_length: usize,
    pub default_blogs_per_page: usize,
    pub max_blogs_per_page: usize,

    // Realtime
    pub push_buffer_size: usize,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) => secret,
            Err(_) if environment != "production" => "penstack-development-secret".to_string(),
            Err(_) => anyhow::bail!("JWT_SECRET must be set in production"),
        };

        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()?,
            environment,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),

            database_backend: env::var("DATABASE_BACKEND")
                .unwrap_or_else(|_| "surreal".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            database_namespace: env::var("DATABASE_NAMESPACE")
                .unwrap_or_else(|_| "penstack".to_string()),
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "blog".to_string()),
            database_username: env::var("DATABASE_USERNAME")
                .unwrap_or_else(|_| "root".to_string()),
            database_password: env::var("DATABASE_PASSWORD")
                .unwrap_or_else(|_| "root".to_string()),

            jwt_secret,
            session_ttl_hours: env::var("SESSION_TTL_HOURS")
                .unwrap_or_else(|_| "168".to_string())
                .parse()?,
            verification_ttl_hours: env::var("VERIFICATION_TTL_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()?,
            transfer_ttl_hours: env::var("TRANSFER_TTL_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()?,
            google_client_id: env::var("GOOGLE_CLIENT_ID").ok(),
            google_tokeninfo_url: env::var("GOOGLE_TOKENINFO_URL")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/tokeninfo".to_string()),

            storage_type: env::var("STORAGE_TYPE")
                .unwrap_or_else(|_| "local".to_string()),
            local_media_dir: env::var("LOCAL_MEDIA_DIR")
                .unwrap_or_else(|_| "./media".to_string()),
            local_media_base_url: env::var("LOCAL_MEDIA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:5000/media".to_string()),
            cloudinary_cloud_name: env::var("CLOUDINARY_CLOUD_NAME").ok(),
            cloudinary_api_key: env::var("CLOUDINARY_API_KEY").ok(),
            cloudinary_api_secret: env::var("CLOUDINARY_API_SECRET").ok(),
            cloudinary_api_base: env::var("CLOUDINARY_API_BASE")
                .unwrap_or_else(|_| "https://api.cloudinary.com/v1_1".to_string()),
            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .unwrap_or_else(|_| "10485760".to_string())
                .parse()?,

            smtp_host: env::var("SMTP_HOST").ok(),
            smtp_port: env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()?,
            smtp_username: env::var("SMTP_USERNAME")
                .unwrap_or_default(),
            smtp_password: env::var("SMTP_PASSWORD")
                .unwrap_or_default(),
            smtp_from_name: env::var("SMTP_FROM_NAME")
                .unwrap_or_else(|_| "Penstack".to_string()),
            smtp_from_email: env::var("SMTP_FROM_EMAIL")
                .unwrap_or_else(|_| "noreply@penstack.dev".to_string()),

            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),

            max_comment_length: env::var("MAX_COMMENT_LENGTH")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()?,
            default_blogs_per_page: env::var("DEFAULT_BLOGS_PER_PAGE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            max_blogs_per_page: env::var("MAX_BLOGS_PER_PAGE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,

            push_buffer_size: env::var("PUSH_BUFFER_SIZE")
                .unwrap_or_else(|_| "64".to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn uses_memory_database(&self) -> bool {
        self.database_backend == "memory"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 5000,
            environment: "test".to_string(),
            log_level: "debug".to_string(),
            log_format: "pretty".to_string(),
            database_backend: "memory".to_string(),
            database_url: "http://localhost:8000".to_string(),
            database_namespace: "penstack".to_string(),
            database_name: "blog".to_string(),
            database_username: "root".to_string(),
            database_password: "root".to_string(),
            jwt_secret: "penstack-test-secret".to_string(),
            session_ttl_hours: 168,
            verification_ttl_hours: 24,
            transfer_ttl_hours: 24,
            google_client_id: None,
            google_tokeninfo_url: "https://oauth2.googleapis.com/tokeninfo".to_string(),
            storage_type: "local".to_string(),
            local_media_dir: std::env::temp_dir()
                .join("penstack-media")
                .to_string_lossy()
                .into_owned(),
            local_media_base_url: "http://localhost:5000/media".to_string(),
            cloudinary_cloud_name: None,
            cloudinary_api_key: None,
            cloudinary_api_secret: None,
            cloudinary_api_base: "https://api.cloudinary.com/v1_1".to_string(),
            max_upload_size: 10 * 1024 * 1024,
            smtp_host: None,
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_from_name: "Penstack".to_string(),
            smtp_from_email: "noreply@penstack.dev".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            max_comment_length: 5000,
            default_blogs_per_page: 10,
            max_blogs_per_page: 50,
            push_buffer_size: 64,
            cors_allowed_origins: "http://localhost:5173".to_string(),
        }
    }
}
