//! Connection profiles and application settings.

pub mod manager;

pub use manager::{AppSettings, Config, ConfigManager, ConnectionProfile, Credential};
