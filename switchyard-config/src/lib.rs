//! Configuration library for Switchyard.
//!
//! Composes the effective [`Config`] from environment variables, an optional
//! TOML file and built-in defaults, in that order of precedence. A `.env`
//! file is read first so its values participate as environment variables.
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, error::ConfigLoadError};
pub use models::sources::{EnvConfig, FileConfig};
pub use models::{
    Config, ConfigMetadata, DatabaseConfig, RateLimitConfig, RedisConfig,
    SchedulerConfig, ServerConfig, TempUnschedConfig, TempUnschedRuleConfig,
};
pub use validation::{ConfigWarning, ConfigWarnings};
