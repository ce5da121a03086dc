pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod openapi;
pub mod reference;
pub mod render;
pub mod repo;
pub mod routes;
pub mod storage;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
