pub mod config;

pub use config::{PlaybackConfig, ServerConfig};
