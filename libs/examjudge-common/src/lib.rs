pub mod config;
pub mod error;
pub mod payload;
pub mod types;
