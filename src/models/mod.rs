pub mod blog;
pub mod comment;
pub mod content;
pub mod notification;
pub mod response;
pub mod transfer;
pub mod user;
