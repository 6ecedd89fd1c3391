pub mod account;
pub mod auth;
pub mod blog;
pub mod comment;
pub mod database;
pub mod identity;
pub mod mail;
pub mod media;
pub mod memory_store;
pub mod notification;
pub mod realtime;
pub mod relationship;
pub mod surreal_store;
pub mod user;

// 重新导出常用类型
pub use account::AccountService;
pub use auth::AuthService;
pub use blog::BlogService;
pub use comment::CommentService;
pub use database::Database;
pub use memory_store::MemoryDatabase;
pub use notification::NotificationService;
pub use relationship::RelationshipService;
pub use surreal_store::SurrealDatabase;
pub use user::UserService;
