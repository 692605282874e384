pub mod error;

use std::path::{Path, PathBuf};
use std::time::Duration;

use switchyard_model::FailureMode;
use tracing::debug;
use url::Url;

use self::error::ConfigLoadError;
use crate::models::sources::{EnvConfig, FileConfig};
use crate::models::{
    Config, ConfigMetadata, DatabaseConfig, RateLimitConfig, RedisConfig, SchedulerConfig,
    ServerConfig, TempUnschedConfig,
};
use crate::util::parse_duration;
use crate::validation::{ConfigWarning, ConfigWarnings};

/// Locations searched when no config path is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["switchyard.toml", "config/switchyard.toml"];

const MAX_OUTBOX_BATCH: i64 = 5_000;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// The effective configuration plus anything worth telling the operator.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
    load_env_file: bool,
    env: Option<EnvConfig>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_file: None,
            load_env_file: true,
            env: None,
        }
    }

    /// Explicit TOML file; it must exist.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    pub fn skip_env_file(mut self) -> Self {
        self.load_env_file = false;
        self
    }

    /// Uses `env` instead of reading the process environment.
    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.env = Some(env);
        self
    }

    pub fn load(self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = if self.load_env_file {
            load_env_file(self.env_file.as_deref())?
        } else {
            false
        };
        let env = self.env.unwrap_or_else(EnvConfig::gather);

        let path = resolve_config_path(self.config_path, env.config_path.as_deref())?;
        let file = match &path {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };
        debug!(config_path = ?path, env_file_loaded, "composing configuration");

        let metadata = ConfigMetadata {
            config_path: path,
            env_file_loaded,
        };
        compose(&env, file, metadata)
    }
}

fn load_env_file(path: Option<&Path>) -> Result<bool, ConfigLoadError> {
    let result = match path {
        Some(path) => dotenvy::from_path(path).map(|()| ()),
        None => dotenvy::dotenv().map(|_| ()),
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(source) => Err(ConfigLoadError::EnvFile { source }),
    }
}

fn resolve_config_path(
    explicit: Option<PathBuf>,
    from_env: Option<&str>,
) -> Result<Option<PathBuf>, ConfigLoadError> {
    if let Some(path) = explicit.or_else(|| from_env.map(PathBuf::from)) {
        if !path.exists() {
            return Err(ConfigLoadError::MissingConfig { path });
        }
        return Ok(Some(path));
    }
    Ok(DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file()))
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

fn duration_field(
    field: &'static str,
    env: Option<&String>,
    file: Option<&String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    Ok(optional_duration_field(field, env, file)?.unwrap_or(default))
}

fn optional_duration_field(
    field: &'static str,
    env: Option<&String>,
    file: Option<&String>,
) -> Result<Option<Duration>, ConfigLoadError> {
    let Some(raw) = env.or(file) else {
        return Ok(None);
    };
    parse_duration(raw)
        .map(Some)
        .map_err(|source| ConfigLoadError::InvalidDuration {
            field,
            value: raw.clone(),
            source,
        })
}

fn failure_mode_field(
    field: &'static str,
    env: Option<&String>,
    file: Option<&String>,
) -> Result<FailureMode, ConfigLoadError> {
    let Some(raw) = env.or(file) else {
        return Ok(FailureMode::default());
    };
    raw.parse().map_err(|e: switchyard_model::ModelError| ConfigLoadError::InvalidValue {
        field,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

fn compose(
    env: &EnvConfig,
    file: FileConfig,
    metadata: ConfigMetadata,
) -> Result<ConfigLoad, ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    let server_defaults = ServerConfig::default();
    let server = ServerConfig {
        host: env
            .server_host
            .clone()
            .or(file.server.host)
            .unwrap_or(server_defaults.host),
        port: env.server_port.or(file.server.port).unwrap_or(server_defaults.port),
    };

    let database_url = env.database_url.clone().or(file.database.url);
    if let Some(url) = &database_url {
        Url::parse(url).map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })?;
    }
    let database = DatabaseConfig {
        url: database_url,
        max_connections: env
            .database_max_connections
            .or(file.database.max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .max(1),
    };

    let redis_url = env.redis_url.clone().or(file.redis.map(|r| r.url));
    let redis = match redis_url {
        Some(url) => {
            Url::parse(&url).map_err(|e| ConfigLoadError::InvalidValue {
                field: "redis.url",
                value: url.clone(),
                reason: e.to_string(),
            })?;
            Some(RedisConfig { url })
        }
        None => {
            warnings.push(ConfigWarning::InMemoryStores);
            None
        }
    };

    let defaults = SchedulerConfig::default();
    let fs = &file.scheduler;
    let requested_batch = env
        .outbox_batch_size
        .or(fs.outbox_batch_size)
        .unwrap_or(defaults.outbox_batch_size);
    let outbox_batch_size = requested_batch.clamp(1, MAX_OUTBOX_BATCH);
    if outbox_batch_size != requested_batch {
        warnings.push(ConfigWarning::BatchSizeClamped {
            requested: requested_batch,
            effective: outbox_batch_size,
        });
    }

    let scheduler = SchedulerConfig {
        outbox_poll_interval: duration_field(
            "scheduler.outbox_poll_interval",
            env.outbox_poll_interval.as_ref(),
            fs.outbox_poll_interval.as_ref(),
            defaults.outbox_poll_interval,
        )?,
        outbox_batch_size,
        rebuild_lock_ttl: duration_field(
            "scheduler.rebuild_lock_ttl",
            env.rebuild_lock_ttl.as_ref(),
            fs.rebuild_lock_ttl.as_ref(),
            defaults.rebuild_lock_ttl,
        )?,
        full_refresh_interval: duration_field(
            "scheduler.full_refresh_interval",
            env.full_refresh_interval.as_ref(),
            fs.full_refresh_interval.as_ref(),
            defaults.full_refresh_interval,
        )?,
        snapshot_max_age: optional_duration_field(
            "scheduler.snapshot_max_age",
            env.snapshot_max_age.as_ref(),
            fs.snapshot_max_age.as_ref(),
        )?
        .filter(|age| !age.is_zero()),
        store_timeout: duration_field(
            "scheduler.store_timeout",
            env.store_timeout.as_ref(),
            fs.store_timeout.as_ref(),
            defaults.store_timeout,
        )?,
        failure_mode: failure_mode_field(
            "scheduler.failure_mode",
            env.failure_mode.as_ref(),
            fs.failure_mode.as_ref(),
        )?,
        load_batch_chunk: env
            .load_batch_chunk
            .or(fs.load_batch_chunk)
            .unwrap_or(defaults.load_batch_chunk)
            .max(1),
        slot_ttl: duration_field(
            "scheduler.slot_ttl",
            env.slot_ttl.as_ref(),
            fs.slot_ttl.as_ref(),
            defaults.slot_ttl,
        )?,
    };

    if scheduler.outbox_poll_interval.is_zero() {
        return Err(ConfigLoadError::InvalidValue {
            field: "scheduler.outbox_poll_interval",
            value: "0s".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    if scheduler.rebuild_lock_ttl.is_zero() {
        return Err(ConfigLoadError::InvalidValue {
            field: "scheduler.rebuild_lock_ttl",
            value: "0s".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    if scheduler.rebuild_lock_ttl < scheduler.store_timeout {
        warnings.push(ConfigWarning::LockTtlBelowStoreTimeout);
    }

    let tu_defaults = TempUnschedConfig::default();
    let tu = file.temp_unsched;
    for (index, rule) in tu.rules.iter().enumerate() {
        if rule.keywords.iter().all(|k| k.trim().is_empty()) {
            warnings.push(ConfigWarning::RuleWithoutKeywords { index });
        }
    }
    let temp_unsched = TempUnschedConfig {
        rules: tu.rules,
        timeout_threshold: env
            .timeout_threshold
            .or(tu.timeout_threshold)
            .unwrap_or(tu_defaults.timeout_threshold),
        timeout_window_minutes: env
            .timeout_window_minutes
            .or(tu.timeout_window_minutes)
            .unwrap_or(tu_defaults.timeout_window_minutes),
        timeout_ban_minutes: env
            .timeout_ban_minutes
            .or(tu.timeout_ban_minutes)
            .unwrap_or(tu_defaults.timeout_ban_minutes),
    };

    let rate_limit = RateLimitConfig {
        key_prefix: env
            .rate_limit_key_prefix
            .clone()
            .or(file.rate_limit.key_prefix)
            .unwrap_or_else(|| RateLimitConfig::default().key_prefix),
        failure_mode: failure_mode_field(
            "rate_limit.failure_mode",
            env.rate_limit_failure_mode.as_ref(),
            file.rate_limit.failure_mode.as_ref(),
        )?,
    };

    Ok(ConfigLoad {
        config: Config {
            server,
            database,
            redis,
            scheduler,
            temp_unsched,
            rate_limit,
            metadata,
        },
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn loader(env: EnvConfig) -> ConfigLoader {
        ConfigLoader::new().skip_env_file().with_env(env)
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn defaults_apply_without_sources() {
        let load = loader(EnvConfig::default()).load().unwrap();
        let config = load.config;

        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.temp_unsched, TempUnschedConfig::default());
        assert_eq!(config.rate_limit.key_prefix, "rate_limit:");
        assert!(config.redis.is_none());
        assert!(load.warnings.contains(&ConfigWarning::InMemoryStores));
    }

    #[test]
    fn file_values_are_parsed() {
        let file = write_config(
            r#"
            [server]
            port = 9000

            [database]
            url = "postgres://switchyard@localhost/switchyard"

            [redis]
            url = "redis://127.0.0.1:6379/0"

            [scheduler]
            outbox_poll_interval = "250ms"
            full_refresh_interval = "0s"
            snapshot_max_age = "10m"
            failure_mode = "closed"

            [[temp_unsched.rules]]
            error_code = 529
            keywords = ["overloaded"]
            duration_minutes = 30
            "#,
        );

        let load = loader(EnvConfig::default())
            .with_config_path(file.path())
            .load()
            .unwrap();
        let config = load.config;

        assert_eq!(config.server.port, 9000);
        assert!(config.redis.is_some());
        assert_eq!(config.scheduler.outbox_poll_interval, Duration::from_millis(250));
        assert!(config.scheduler.full_refresh_interval.is_zero());
        assert_eq!(config.scheduler.snapshot_max_age, Some(Duration::from_secs(600)));
        assert_eq!(config.scheduler.failure_mode, FailureMode::Closed);
        assert_eq!(config.temp_unsched.rules.len(), 1);
        assert_eq!(config.metadata.config_path.as_deref(), Some(file.path()));
        assert!(load.warnings.is_empty());
    }

    #[test]
    fn environment_overrides_file() {
        let file = write_config(
            r#"
            [server]
            port = 9000

            [scheduler]
            store_timeout = "5s"
            "#,
        );
        let env = EnvConfig {
            server_port: Some(9100),
            store_timeout: Some("1s".into()),
            timeout_threshold: Some(5),
            ..EnvConfig::default()
        };

        let config = loader(env).with_config_path(file.path()).load().unwrap().config;

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.scheduler.store_timeout, Duration::from_secs(1));
        assert_eq!(config.temp_unsched.timeout_threshold, 5);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = loader(EnvConfig::default())
            .with_config_path("/nonexistent/switchyard.toml")
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let env = EnvConfig {
            outbox_poll_interval: Some("soon".into()),
            ..EnvConfig::default()
        };
        let err = loader(env).load().unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidDuration {
                field: "scheduler.outbox_poll_interval",
                ..
            }
        ));

        let env = EnvConfig {
            failure_mode: Some("sometimes".into()),
            ..EnvConfig::default()
        };
        let err = loader(env).load().unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidValue {
                field: "scheduler.failure_mode",
                ..
            }
        ));

        let file = write_config("[scheduler\nbroken");
        let err = loader(EnvConfig::default())
            .with_config_path(file.path())
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse { .. }));
    }

    #[test]
    fn questionable_values_produce_warnings() {
        let file = write_config(
            r#"
            [scheduler]
            outbox_batch_size = 0
            rebuild_lock_ttl = "1s"
            store_timeout = "3s"

            [[temp_unsched.rules]]
            error_code = 500
            keywords = ["  "]
            duration_minutes = 5
            "#,
        );
        let env = EnvConfig {
            redis_url: Some("redis://localhost".into()),
            ..EnvConfig::default()
        };

        let load = loader(env).with_config_path(file.path()).load().unwrap();

        assert_eq!(load.config.scheduler.outbox_batch_size, 1);
        assert!(load.warnings.contains(&ConfigWarning::BatchSizeClamped {
            requested: 0,
            effective: 1,
        }));
        assert!(load.warnings.contains(&ConfigWarning::LockTtlBelowStoreTimeout));
        assert!(load.warnings.contains(&ConfigWarning::RuleWithoutKeywords { index: 0 }));
        assert!(!load.warnings.contains(&ConfigWarning::InMemoryStores));
    }
}
