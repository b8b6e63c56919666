//! Configuration loading and representation.
//!
//! Every setting has a default; `QUESTDESK_*` environment variables override
//! them (see [`PersistenceConfig::from_env`]).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Legacy flat-store key holding the pre-SQLite editor state.
pub const DEFAULT_LEGACY_KEY: &str = "questdesk-storage";

/// Which drain strategy the scheduler may use.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SchedulerMode {
    /// Idle windows when the host offers them, fixed interval otherwise.
    #[default]
    Auto,
    /// Ask for idle windows (falls back to the interval with a warning).
    Idle,
    /// Always poll on a fixed interval.
    Interval,
}

impl std::str::FromStr for SchedulerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(SchedulerMode::Auto),
            "idle" => Ok(SchedulerMode::Idle),
            "interval" => Ok(SchedulerMode::Interval),
            other => Err(ConfigError::Invalid {
                key: "QUESTDESK_SCHEDULER",
                value: other.to_string(),
            }),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub mode: SchedulerMode,
    /// Tick period of the fixed-interval strategy.
    pub poll_interval: Duration,
    /// Budget of one idle window.
    pub idle_window: Duration,
    /// Inactivity required before the host counts as idle.
    pub idle_quiet_period: Duration,
    /// Longest wait for an idle window before one is forced.
    pub idle_max_wait: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: SchedulerMode::Auto,
            poll_interval: Duration::from_secs(1),
            idle_window: Duration::from_millis(50),
            idle_quiet_period: Duration::from_millis(200),
            idle_max_wait: Duration::from_secs(2),
        }
    }
}

impl SchedulerConfig {
    pub fn with_mode(mut self, mode: SchedulerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_idle_window(mut self, window: Duration) -> Self {
        self.idle_window = window;
        self
    }

    pub fn with_idle_quiet_period(mut self, quiet: Duration) -> Self {
        self.idle_quiet_period = quiet;
        self
    }

    pub fn with_idle_max_wait(mut self, max_wait: Duration) -> Self {
        self.idle_max_wait = max_wait;
        self
    }
}

/// Persistence core configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Root directory for the database and the flat key/value store.
    pub data_dir: PathBuf,
    /// SQLite file name inside `data_dir`.
    pub database_file: String,
    pub legacy_key: String,
    /// Prefix of the keys written by the save queue.
    pub save_key_prefix: String,
    pub scheduler: SchedulerConfig,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("failed to resolve data directory: {0:#}")]
    DataDir(anyhow::Error),
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self::in_dir(default_data_dir().unwrap_or_else(|_| PathBuf::from(".questdesk")))
    }
}

impl PersistenceConfig {
    /// Defaults rooted at `data_dir`.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database_file: "questdesk.db".to_string(),
            legacy_key: DEFAULT_LEGACY_KEY.to_string(),
            save_key_prefix: crate::queue::DEFAULT_KEY_PREFIX.to_string(),
            scheduler: SchedulerConfig::default(),
        }
    }

    pub fn with_legacy_key(mut self, key: impl Into<String>) -> Self {
        self.legacy_key = key.into();
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Path of the SQLite project database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Directory of the flat key/value store (save queue + legacy blob).
    pub fn kv_dir(&self) -> PathBuf {
        self.data_dir.join("kv")
    }

    /// Load configuration from `QUESTDESK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = match lookup("QUESTDESK_DATA_DIR") {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => default_data_dir().map_err(ConfigError::DataDir)?,
        };

        let mut config = Self::in_dir(data_dir);

        if let Some(key) = lookup("QUESTDESK_LEGACY_KEY") {
            if key.is_empty() {
                return Err(ConfigError::Invalid {
                    key: "QUESTDESK_LEGACY_KEY",
                    value: key,
                });
            }
            config.legacy_key = key;
        }
        if let Some(mode) = lookup("QUESTDESK_SCHEDULER") {
            config.scheduler.mode = mode.parse()?;
        }
        if let Some(ms) = millis(&lookup, "QUESTDESK_POLL_INTERVAL_MS")? {
            config.scheduler.poll_interval = ms;
        }
        if let Some(ms) = millis(&lookup, "QUESTDESK_IDLE_WINDOW_MS")? {
            config.scheduler.idle_window = ms;
        }
        if let Some(ms) = millis(&lookup, "QUESTDESK_IDLE_QUIET_MS")? {
            config.scheduler.idle_quiet_period = ms;
        }
        if let Some(ms) = millis(&lookup, "QUESTDESK_IDLE_MAX_WAIT_MS")? {
            config.scheduler.idle_max_wait = ms;
        }

        Ok(config)
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Some(Duration::from_millis(ms))),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}

/// Resolve the default data directory: `{app_data_dir}/questdesk`.
pub fn default_data_dir() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    Ok(base.join("questdesk"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = PersistenceConfig::from_lookup(lookup(&[("QUESTDESK_DATA_DIR", "/tmp/qd")])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/qd"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/qd/questdesk.db"));
        assert_eq!(config.kv_dir(), PathBuf::from("/tmp/qd/kv"));
        assert_eq!(config.legacy_key, DEFAULT_LEGACY_KEY);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = PersistenceConfig::from_lookup(lookup(&[
            ("QUESTDESK_DATA_DIR", "/tmp/qd"),
            ("QUESTDESK_SCHEDULER", "Interval"),
            ("QUESTDESK_POLL_INTERVAL_MS", "250"),
            ("QUESTDESK_IDLE_WINDOW_MS", "30"),
            ("QUESTDESK_LEGACY_KEY", "old-editor"),
        ]))
        .unwrap();

        assert_eq!(config.scheduler.mode, SchedulerMode::Interval);
        assert_eq!(config.scheduler.poll_interval, Duration::from_millis(250));
        assert_eq!(config.scheduler.idle_window, Duration::from_millis(30));
        assert_eq!(config.legacy_key, "old-editor");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = PersistenceConfig::from_lookup(lookup(&[
            ("QUESTDESK_DATA_DIR", "/tmp/qd"),
            ("QUESTDESK_POLL_INTERVAL_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "QUESTDESK_POLL_INTERVAL_MS", .. }));

        let err = PersistenceConfig::from_lookup(lookup(&[
            ("QUESTDESK_DATA_DIR", "/tmp/qd"),
            ("QUESTDESK_SCHEDULER", "eager"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "QUESTDESK_SCHEDULER", .. }));
    }
}
