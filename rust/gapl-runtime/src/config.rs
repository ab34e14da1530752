//! Runtime configuration, normally read from `gapl.toml`.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working runtime:
//!
//! ```toml
//! stack_capacity = 256
//! log_filter = "gapl_runtime=info,gapl_vm=warn"
//!
//! [timer]
//! enabled = true
//! interval_ms = 1000
//! topic = "Timer"
//!
//! [ids]
//! start = 12345
//! limit = 2000000000
//! ```

use crate::logging::DEFAULT_FILTER;
use gapl_vm::DEFAULT_STACK_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Operand stack slots per automaton.
    pub stack_capacity: usize,
    pub timer: TimerConfig,
    pub ids: IdConfig,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_capacity: DEFAULT_STACK_CAPACITY,
            timer: TimerConfig::default(),
            ids: IdConfig::default(),
            log_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

/// Periodic publication of the current time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub topic: String,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
            topic: "Timer".to_string(),
        }
    }
}

impl TimerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Automaton ids are drawn from `start..limit`, wrapping back to `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdConfig {
    pub start: u64,
    pub limit: u64,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            start: 12345,
            limit: 2_000_000_000,
        }
    }
}

impl RuntimeConfig {
    /// Parse from a TOML string (useful for testing).
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Install the tracing subscriber with `log_filter`. False if one was
    /// already installed.
    pub fn init_tracing(&self) -> bool {
        crate::logging::init_tracing(&self.log_filter)
    }

    /// Same as the default, minus the timer thread.
    pub fn without_timer() -> Self {
        let mut config = Self::default();
        config.timer.enabled = false;
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_capacity == 0 {
            return Err(ConfigError::Invalid("stack_capacity must be positive".into()));
        }
        if self.timer.enabled && self.timer.interval_ms == 0 {
            return Err(ConfigError::Invalid("timer.interval_ms must be positive".into()));
        }
        if self.log_filter.parse::<EnvFilter>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "log_filter {:?} is not a valid filter",
                self.log_filter
            )));
        }
        if self.timer.topic.is_empty() {
            return Err(ConfigError::Invalid("timer.topic is empty".into()));
        }
        if self.ids.start >= self.ids.limit {
            return Err(ConfigError::Invalid(format!(
                "ids.start ({}) must be below ids.limit ({})",
                self.ids.start, self.ids.limit
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.stack_capacity, 256);
        assert_eq!(config.ids.start, 12345);
        assert_eq!(config.timer.interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
stack_capacity = 64

[timer]
interval_ms = 250
"#,
        )
        .unwrap();
        assert_eq!(config.stack_capacity, 64);
        assert_eq!(config.timer.interval_ms, 250);
        assert!(config.timer.enabled);
        assert_eq!(config.timer.topic, "Timer");
        assert_eq!(config.log_filter, DEFAULT_FILTER);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("stack_capacity = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_toml_str("[ids]\nstart = 10\nlimit = 5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_toml_str("stack_capacity = \"big\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_unparsable_log_filter() {
        let err = RuntimeConfig::from_toml_str("log_filter = \"gapl_runtime=loud\"").unwrap_err();
        assert!(err.to_string().contains("log_filter"), "{}", err);
        assert!(RuntimeConfig::from_toml_str("log_filter = \"gapl_vm=trace\"").is_ok());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = RuntimeConfig::load_from(Path::new("/nonexistent/gapl.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/gapl.toml"));
    }

    #[test]
    fn disabled_timer_may_have_zero_interval() {
        let config = RuntimeConfig::from_toml_str("[timer]\nenabled = false\ninterval_ms = 0").unwrap();
        assert!(!config.timer.enabled);
        assert!(!RuntimeConfig::without_timer().timer.enabled);
    }
}
