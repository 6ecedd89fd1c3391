pub mod middleware;
pub mod slug;
pub mod validation;
