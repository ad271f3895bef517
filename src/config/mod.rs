//! Configuration management for the social arena service
//!
//! Loading from environment variables or a TOML file, validation, and
//! default values.

pub mod app;

pub use app::{
    validate_config, AppConfig, AuthSettings, MatchmakingSettings, ServiceSettings,
    StoreSettings, TransportSettings,
};
