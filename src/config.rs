//! Reactor configuration, persisted as TOML.
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchMode;
use crate::error::{ConfigError, ConfigResult};

/// Top-level reactor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactorConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub actions: ActionConfig,
    /// Tracing filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

/// Scheduling of agent callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub mode: DispatchMode,
    /// Lane count in parallel mode. Sequential mode always uses one.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Action defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Timeout for `initiate_and_wait_default`.
    #[serde(default = "default_wait_timeout_ms")]
    pub default_wait_timeout_ms: u64,
    /// Highest argument ordinal (`rrel_1..=rrel_N`).
    #[serde(default = "default_max_argument_ordinal")]
    pub max_argument_ordinal: usize,
}

fn default_log_filter() -> String {
    "info".into()
}
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
fn default_wait_timeout_ms() -> u64 {
    5_000
}
fn default_max_argument_ordinal() -> usize {
    10
}

/// Event agents record up to three arguments per event.
const MIN_ARGUMENT_ORDINAL: usize = 3;

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            workers: default_workers(),
        }
    }
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            default_wait_timeout_ms: default_wait_timeout_ms(),
            max_argument_ordinal: default_max_argument_ordinal(),
        }
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            actions: ActionConfig::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl ReactorConfig {
    /// Defaults with single-lane dispatch, for deterministic tests.
    pub fn sequential() -> Self {
        Self {
            dispatch: DispatchConfig {
                mode: DispatchMode::Sequential,
                workers: 1,
            },
            ..Default::default()
        }
    }

    /// Defaults with `workers` parallel lanes.
    pub fn parallel(workers: usize) -> Self {
        Self {
            dispatch: DispatchConfig {
                mode: DispatchMode::Parallel,
                workers,
            },
            ..Default::default()
        }
    }

    pub fn default_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.actions.default_wait_timeout_ms)
    }

    /// Reject values the reactor cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.dispatch.mode == DispatchMode::Parallel && self.dispatch.workers == 0 {
            return Err(ConfigError::Invalid {
                message: "dispatch.workers must be > 0 in parallel mode".into(),
            });
        }
        if self.actions.max_argument_ordinal < MIN_ARGUMENT_ORDINAL {
            return Err(ConfigError::Invalid {
                message: format!(
                    "actions.max_argument_ordinal must be >= {MIN_ARGUMENT_ORDINAL}"
                ),
            });
        }
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "log_filter must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content, path)
    }

    /// Parse TOML text; `origin` is only used in error messages.
    pub fn from_toml(content: &str, origin: &Path) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            message: format!("failed to serialize config: {e}"),
        })
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = ReactorConfig::from_toml("", Path::new("inline")).unwrap();
        assert_eq!(config, ReactorConfig::default());
        assert_eq!(config.actions.default_wait_timeout_ms, 5_000);
        assert_eq!(config.actions.max_argument_ordinal, 10);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = ReactorConfig::from_toml(
            "[dispatch]\nmode = \"sequential\"\n",
            Path::new("inline"),
        )
        .unwrap();
        assert_eq!(config.dispatch.mode, DispatchMode::Sequential);
        assert_eq!(config.actions, ActionConfig::default());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("reactor.toml");
        let mut config = ReactorConfig::parallel(3);
        config.actions.default_wait_timeout_ms = 250;
        config.save(&path).unwrap();

        let loaded = ReactorConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = ReactorConfig::parallel(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        config.dispatch.workers = 2;
        config.actions.max_argument_ordinal = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        config.actions.max_argument_ordinal = 10;
        config.log_filter = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = ReactorConfig::from_toml("dispatch = [", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == "bad.toml"));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = ReactorConfig::load(Path::new("/nonexistent/reactor.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
