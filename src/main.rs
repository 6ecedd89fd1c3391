use std::sync::Arc;

use penstack::{
    config::Config,
    routes,
    services::{
        database::Database,
        identity::{FederatedIdentityProvider, GoogleIdentityProvider},
        mail::build_mailer,
        media::build_image_store,
        MemoryDatabase, SurrealDatabase,
    },
    state::{AppState, Collaborators},
};
use tower_http::services::ServeDir;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 初始化日志
    let filter = tracing_subscriber::EnvFilter::new(format!(
        "penstack={},tower_http={}",
        config.log_level, config.log_level
    ));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting Penstack service ({})...", config.environment);

    // 初始化数据库连接
    let db: Arc<dyn Database> = if config.uses_memory_database() {
        warn!("Using the in-memory database, data is lost on restart");
        Arc::new(MemoryDatabase::new())
    } else {
        let db = SurrealDatabase::new(&config).await?;
        db.ping().await?;
        info!("Database connection established successfully");
        Arc::new(db)
    };

    let images = build_image_store(&config)?;
    let mailer = build_mailer(&config)?;
    let identity = GoogleIdentityProvider::from_config(&config)?
        .map(|provider| Arc::new(provider) as Arc<dyn FederatedIdentityProvider>);
    if identity.is_none() {
        warn!("GOOGLE_CLIENT_ID not set, Google sign-in is disabled");
    }

    // 创建应用状态
    let app_state = Arc::new(AppState::new(
        config.clone(),
        Collaborators {
            db,
            images,
            mailer,
            identity,
        },
    )?);

    let mut app = routes::app(app_state);
    if config.storage_type == "local" {
        app = app.nest_service("/media", ServeDir::new(&config.local_media_dir));
    }

    // 启动主服务器
    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on http://{}", addr);

    axum::Server::bind(&addr.parse()?)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
