//! Engine configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use queue::HttpQueueConfig;

use crate::bus::DispatchMode;
use crate::executor::ExecutorConfig;
use crate::processor::ProcessorConfig;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid { key: &'static str, value: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    /// 32-byte key for the Credential Store, raw or base64.
    pub encryption_key: Option<String>,
    /// External delay queue; the Postgres job queue is used when unset.
    pub http_queue: Option<HttpQueueConfig>,
    pub dispatch_mode: DispatchMode,
    pub action_timeout: Duration,
    pub max_steps_per_invocation: usize,
    pub pending_run_debounce: Duration,
    pub wait_grace: Duration,
    pub sweep_interval: Duration,
}

impl EngineConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                      | Default  |
    /// |------------------------------|----------|
    /// | `DATABASE_URL`               | required |
    /// | `DATABASE_MAX_CONNECTIONS`   | `10`     |
    /// | `ENCRYPTION_KEY`             | unset    |
    /// | `QUEUE_URL`                  | unset    |
    /// | `QUEUE_TOKEN`                | required with `QUEUE_URL` |
    /// | `QUEUE_CALLBACK_URL`         | required with `QUEUE_URL` |
    /// | `QUEUE_RETRIES`              | `3`      |
    /// | `DISPATCH_MODE`              | `inline` |
    /// | `ACTION_TIMEOUT_SECS`        | `15`     |
    /// | `MAX_STEPS_PER_INVOCATION`   | `500`    |
    /// | `PENDING_RUN_DEBOUNCE_SECS`  | `10`     |
    /// | `WAIT_GRACE_SECS`            | `60`     |
    /// | `SWEEP_INTERVAL_SECS`        | `30`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of
    /// a variable if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let http_queue = match env.text("QUEUE_URL") {
            Some(base_url) => Some(HttpQueueConfig {
                base_url,
                token: env.required("QUEUE_TOKEN")?,
                callback_url: env.required("QUEUE_CALLBACK_URL")?,
                retries: env.parse("QUEUE_RETRIES", 3)?,
                request_timeout: Duration::from_secs(10),
            }),
            None => None,
        };

        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            database_max_connections: env.parse("DATABASE_MAX_CONNECTIONS", 10)?,
            encryption_key: env.text("ENCRYPTION_KEY"),
            http_queue,
            dispatch_mode: env.parse("DISPATCH_MODE", DispatchMode::Inline)?,
            action_timeout: env.seconds("ACTION_TIMEOUT_SECS", 15)?,
            max_steps_per_invocation: env.parse("MAX_STEPS_PER_INVOCATION", 500)?,
            pending_run_debounce: env.seconds("PENDING_RUN_DEBOUNCE_SECS", 10)?,
            wait_grace: env.seconds("WAIT_GRACE_SECS", 60)?,
            sweep_interval: env.seconds("SWEEP_INTERVAL_SECS", 30)?,
        })
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig { max_steps: self.max_steps_per_invocation }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig { pending_debounce: self.pending_run_debounce, wait_grace: self.wait_grace }
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Non-blank value of `key`.
    fn text(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.text(key).ok_or(ConfigError::Missing(key))
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.text(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|e: T::Err| ConfigError::Invalid { key, reason: e.to_string(), value }),
        }
    }

    fn seconds(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(key, default).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        EngineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/autoflow")]).unwrap();
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.dispatch_mode, DispatchMode::Inline);
        assert_eq!(config.action_timeout, Duration::from_secs(15));
        assert_eq!(config.executor_config().max_steps, 500);
        assert_eq!(config.processor_config().pending_debounce, Duration::from_secs(10));
        assert_eq!(config.wait_grace, Duration::from_secs(60));
        assert!(config.http_queue.is_none());
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn database_url_is_required() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn queue_url_requires_token_and_callback() {
        let err = load(&[("DATABASE_URL", "x"), ("QUEUE_URL", "https://q.example")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("QUEUE_TOKEN"));

        let config = load(&[
            ("DATABASE_URL", "x"),
            ("QUEUE_URL", "https://q.example"),
            ("QUEUE_TOKEN", "t"),
            ("QUEUE_CALLBACK_URL", "https://app.example/api/v1/queue/automation"),
            ("DISPATCH_MODE", "queued"),
        ])
        .unwrap();
        let queue = config.http_queue.unwrap();
        assert_eq!(queue.retries, 3);
        assert_eq!(config.dispatch_mode, DispatchMode::Queued);
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = load(&[("DATABASE_URL", "x"), ("ACTION_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ACTION_TIMEOUT_SECS", .. }));
    }
}
