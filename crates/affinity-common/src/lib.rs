//! affinity-common — Shared errors, configuration, settings and external-tool
//! plumbing used across all Affinity crates.

pub mod config;
pub mod error;
pub mod settings;
pub mod telemetry;
pub mod tools;

pub use config::Config;
pub use error::{Result, ScreeningError};
pub use settings::{CachedSettings, MemorySettings, SettingsProvider};
