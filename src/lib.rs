pub mod config;
pub mod http_api;
pub mod ice;
pub mod media;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod stats;

pub use config::AppConfig;
