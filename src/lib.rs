pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

#[cfg(test)]
pub mod test_support;
