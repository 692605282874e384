use serde::{Deserialize, Serialize};

use crate::util::{env_var, parse_env};

use super::TempUnschedRuleConfig;

/// Raw configuration as defined in a TOML file.
///
/// Durations are humantime strings (`"5s"`, `"250ms"`) and are validated by
/// the loader.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    pub redis: Option<FileRedisConfig>,
    #[serde(default)]
    pub scheduler: FileSchedulerConfig,
    #[serde(default)]
    pub temp_unsched: FileTempUnschedConfig,
    #[serde(default)]
    pub rate_limit: FileRateLimitConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSchedulerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox_poll_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox_batch_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebuild_lock_ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_refresh_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_max_age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_batch_chunk: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_ttl: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileTempUnschedConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<TempUnschedRuleConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_window_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ban_minutes: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRateLimitConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_mode: Option<String>,
}

/// Environment-derived configuration values. Durations and modes stay raw
/// strings so the loader can report which variable was malformed.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<String>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub database_max_connections: Option<u32>,
    pub redis_url: Option<String>,
    pub outbox_poll_interval: Option<String>,
    pub outbox_batch_size: Option<i64>,
    pub rebuild_lock_ttl: Option<String>,
    pub full_refresh_interval: Option<String>,
    pub snapshot_max_age: Option<String>,
    pub store_timeout: Option<String>,
    pub failure_mode: Option<String>,
    pub load_batch_chunk: Option<usize>,
    pub slot_ttl: Option<String>,
    pub timeout_threshold: Option<u32>,
    pub timeout_window_minutes: Option<u32>,
    pub timeout_ban_minutes: Option<u32>,
    pub rate_limit_key_prefix: Option<String>,
    pub rate_limit_failure_mode: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: env_var("SWITCHYARD_CONFIG"),
            server_host: env_var("SWITCHYARD_HOST"),
            server_port: parse_env("SWITCHYARD_PORT"),
            database_url: env_var("DATABASE_URL"),
            database_max_connections: parse_env("SWITCHYARD_DATABASE_MAX_CONNECTIONS"),
            redis_url: env_var("REDIS_URL"),
            outbox_poll_interval: env_var("SWITCHYARD_OUTBOX_POLL_INTERVAL"),
            outbox_batch_size: parse_env("SWITCHYARD_OUTBOX_BATCH_SIZE"),
            rebuild_lock_ttl: env_var("SWITCHYARD_REBUILD_LOCK_TTL"),
            full_refresh_interval: env_var("SWITCHYARD_FULL_REFRESH_INTERVAL"),
            snapshot_max_age: env_var("SWITCHYARD_SNAPSHOT_MAX_AGE"),
            store_timeout: env_var("SWITCHYARD_STORE_TIMEOUT"),
            failure_mode: env_var("SWITCHYARD_FAILURE_MODE"),
            load_batch_chunk: parse_env("SWITCHYARD_LOAD_BATCH_CHUNK"),
            slot_ttl: env_var("SWITCHYARD_SLOT_TTL"),
            timeout_threshold: parse_env("SWITCHYARD_TIMEOUT_THRESHOLD"),
            timeout_window_minutes: parse_env("SWITCHYARD_TIMEOUT_WINDOW_MINUTES"),
            timeout_ban_minutes: parse_env("SWITCHYARD_TIMEOUT_BAN_MINUTES"),
            rate_limit_key_prefix: env_var("SWITCHYARD_RATE_LIMIT_PREFIX"),
            rate_limit_failure_mode: env_var("SWITCHYARD_RATE_LIMIT_FAILURE_MODE"),
        }
    }
}
