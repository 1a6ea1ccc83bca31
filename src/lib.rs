pub mod config;
pub mod error;
pub mod lifecycle;
pub mod store;
