#![forbid(unsafe_code)]

//! Scheduler configuration.
//!
//! # Environment
//!
//! | Variable                       | Field                  | Default  |
//! |--------------------------------|------------------------|----------|
//! | `TRELLIS_DEBOUNCE_MS`          | `debounce`             | 16       |
//! | `TRELLIS_MAX_TASKS_PER_FLUSH`  | `max_tasks_per_flush`  | 100000   |
//!
//! Invalid values keep the default and are reported as [`ConfigError`]s.

use std::env;
use std::fmt;
use std::time::Duration;

pub const ENV_DEBOUNCE_MS: &str = "TRELLIS_DEBOUNCE_MS";
pub const ENV_MAX_TASKS_PER_FLUSH: &str = "TRELLIS_MAX_TASKS_PER_FLUSH";

/// Default delay between the first enqueue and the flush it arms.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(16);

/// Default cap on tasks run by a single flush.
pub const DEFAULT_MAX_TASKS_PER_FLUSH: usize = 100_000;

/// Tuning for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Delay between the first enqueue while idle and the armed flush.
    /// Zero means "due immediately".
    pub debounce: Duration,
    /// Tasks run by one flush before it yields with
    /// [`ReactiveError::FlushLimit`](trellis_core::ReactiveError::FlushLimit).
    pub max_tasks_per_flush: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            max_tasks_per_flush: DEFAULT_MAX_TASKS_PER_FLUSH,
        }
    }
}

impl SchedulerConfig {
    /// Set the debounce delay.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the per-flush task cap (at least 1).
    #[must_use]
    pub fn with_max_tasks_per_flush(mut self, max: usize) -> Self {
        self.max_tasks_per_flush = max.max(1);
        self
    }

    /// Configuration with no debounce, for tests and headless runs.
    #[must_use]
    pub fn immediate() -> Self {
        Self::default().with_debounce(Duration::ZERO)
    }

    /// Read overrides from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let parsed = Self::from_env_with(|key| env::var(key).ok());
        for error in &parsed.errors {
            tracing::warn!(%error, "ignoring invalid scheduler setting");
        }
        parsed.config
    }

    /// Read overrides through `get_env`, returning diagnostics.
    pub fn from_env_with<F>(mut get_env: F) -> SchedulerConfigParse
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let mut errors = Vec::new();

        if let Some(value) = get_env(ENV_DEBOUNCE_MS) {
            match value.trim().parse::<u64>() {
                Ok(ms) => config.debounce = Duration::from_millis(ms),
                Err(_) => errors.push(ConfigError::new(
                    "debounce",
                    value,
                    "expected milliseconds as a non-negative integer",
                )),
            }
        }

        if let Some(value) = get_env(ENV_MAX_TASKS_PER_FLUSH) {
            match value.trim().parse::<usize>() {
                Ok(max) if max > 0 => config.max_tasks_per_flush = max,
                _ => errors.push(ConfigError::new(
                    "max_tasks_per_flush",
                    value,
                    "expected positive integer",
                )),
            }
        }

        SchedulerConfigParse { config, errors }
    }
}

/// Result of parsing configuration with diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfigParse {
    pub config: SchedulerConfig,
    pub errors: Vec<ConfigError>,
}

/// A rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub value: String,
    pub message: String,
}

impl ConfigError {
    fn new(field: &'static str, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ({})", self.field, self.value, self.message)
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl FnMut(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(16));
        assert_eq!(config.max_tasks_per_flush, 100_000);
    }

    #[test]
    fn builders() {
        let config = SchedulerConfig::default()
            .with_debounce(Duration::from_millis(3))
            .with_max_tasks_per_flush(0);
        assert_eq!(config.debounce, Duration::from_millis(3));
        assert_eq!(config.max_tasks_per_flush, 1);
        assert_eq!(SchedulerConfig::immediate().debounce, Duration::ZERO);
    }

    #[test]
    fn env_overrides() {
        let parsed = SchedulerConfig::from_env_with(env_of(&[
            (ENV_DEBOUNCE_MS, "0"),
            (ENV_MAX_TASKS_PER_FLUSH, " 50 "),
        ]));
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.config.debounce, Duration::ZERO);
        assert_eq!(parsed.config.max_tasks_per_flush, 50);
    }

    #[test]
    fn env_invalid_values_keep_defaults() {
        let parsed = SchedulerConfig::from_env_with(env_of(&[
            (ENV_DEBOUNCE_MS, "soon"),
            (ENV_MAX_TASKS_PER_FLUSH, "0"),
        ]));
        assert_eq!(parsed.config, SchedulerConfig::default());
        assert_eq!(parsed.errors.len(), 2);
        assert_eq!(parsed.errors[0].field, "debounce");
        assert_eq!(
            parsed.errors[1].to_string(),
            "max_tasks_per_flush=0 (expected positive integer)"
        );
    }

    #[test]
    fn env_absent_is_default() {
        let parsed = SchedulerConfig::from_env_with(|_| None);
        assert_eq!(parsed.config, SchedulerConfig::default());
    }
}
