pub mod sources;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchyard_model::FailureMode;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub scheduler: SchedulerConfig,
    pub temp_unsched: TempUnschedConfig,
    pub rate_limit: RateLimitConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Address the health endpoint binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8088,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Required to serve; commands that only inspect configuration run
    /// without it.
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: i64,
    pub rebuild_lock_ttl: Duration,
    /// Zero disables the periodic refresh.
    pub full_refresh_interval: Duration,
    pub snapshot_max_age: Option<Duration>,
    pub store_timeout: Duration,
    pub failure_mode: FailureMode,
    pub load_batch_chunk: usize,
    pub slot_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            outbox_poll_interval: Duration::from_secs(1),
            outbox_batch_size: 200,
            rebuild_lock_ttl: Duration::from_secs(30),
            full_refresh_interval: Duration::from_secs(5 * 60),
            snapshot_max_age: None,
            store_timeout: Duration::from_secs(3),
            failure_mode: FailureMode::Open,
            load_batch_chunk: 200,
            slot_ttl: Duration::from_secs(15 * 60),
        }
    }
}

/// Error rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TempUnschedRuleConfig {
    pub error_code: u16,
    pub keywords: Vec<String>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempUnschedConfig {
    pub rules: Vec<TempUnschedRuleConfig>,
    pub timeout_threshold: u32,
    pub timeout_window_minutes: u32,
    pub timeout_ban_minutes: u32,
}

impl Default for TempUnschedConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            timeout_threshold: 3,
            timeout_window_minutes: 10,
            timeout_ban_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub key_prefix: String,
    pub failure_mode: FailureMode,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            key_prefix: "rate_limit:".to_string(),
            failure_mode: FailureMode::Open,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
