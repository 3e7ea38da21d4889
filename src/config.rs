//! Viewer configuration.
//!
//! Defaults suit a browser session. Values can come from JSON and be
//! overridden by `SHEETVIEW_*` environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewerError};
use crate::retry::RetryPolicy;
use crate::types::Viewport;

const ENV_PREFIX: &str = "SHEETVIEW_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewerConfig {
    /// Worker response timeout
    pub worker_timeout_ms: u64,
    /// Scroll debounce window
    pub debounce_ms: u64,
    /// Largest document accepted, in bytes
    pub max_payload_bytes: u64,
    pub download_retry: RetryPolicy,
    pub worker_retry: RetryPolicy,
    /// Rows in the first viewport requested for a sheet
    pub initial_rows: u32,
    /// Columns in the first viewport requested for a sheet
    pub initial_cols: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            worker_timeout_ms: 30_000,
            debounce_ms: 300,
            max_payload_bytes: 100 * 1024 * 1024,
            download_retry: RetryPolicy::network(),
            worker_retry: RetryPolicy::worker(),
            initial_rows: 50,
            initial_cols: 26,
        }
    }
}

impl ViewerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(env::vars())
    }

    /// Apply `SHEETVIEW_*` overrides from an iterator of key/value pairs.
    pub fn with_overrides<I>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "WORKER_TIMEOUT_MS" => self.worker_timeout_ms = parse_var(&key, &value)?,
                "DEBOUNCE_MS" => self.debounce_ms = parse_var(&key, &value)?,
                "MAX_PAYLOAD_BYTES" => self.max_payload_bytes = parse_var(&key, &value)?,
                "DOWNLOAD_ATTEMPTS" => self.download_retry.max_attempts = parse_var(&key, &value)?,
                "WORKER_ATTEMPTS" => self.worker_retry.max_attempts = parse_var(&key, &value)?,
                "INITIAL_ROWS" => self.initial_rows = parse_var(&key, &value)?,
                "INITIAL_COLS" => self.initial_cols = parse_var(&key, &value)?,
                _ => tracing::debug!(%key, "Ignoring unknown configuration variable"),
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_timeout_ms == 0 {
            return Err(ViewerError::Config("workerTimeoutMs must be positive".into()));
        }
        if self.max_payload_bytes == 0 {
            return Err(ViewerError::Config("maxPayloadBytes must be positive".into()));
        }
        if self.initial_rows == 0 || self.initial_cols == 0 {
            return Err(ViewerError::Config("initial viewport must not be empty".into()));
        }
        Ok(())
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// First region requested when a sheet opens.
    pub fn initial_viewport(&self) -> Viewport {
        Viewport::new(1, 1, self.initial_rows, self.initial_cols)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ViewerError::Config(format!("{key}={value} is not a valid number")))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = ViewerConfig::default();
        assert_eq!(config.worker_timeout(), Duration::from_secs(30));
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.initial_viewport(), Viewport::new(1, 1, 50, 26));
    }

    #[test]
    fn test_partial_json() {
        let config = ViewerConfig::from_json(r#"{"debounceMs": 250}"#).unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.worker_timeout_ms, 30_000);
    }

    #[test]
    fn test_env_overrides() {
        let config = ViewerConfig::default()
            .with_overrides(vars(&[
                ("SHEETVIEW_WORKER_TIMEOUT_MS", "5000"),
                ("SHEETVIEW_DOWNLOAD_ATTEMPTS", "2"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();
        assert_eq!(config.worker_timeout_ms, 5000);
        assert_eq!(config.download_retry.max_attempts, 2);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ViewerConfig::default()
            .with_overrides(vars(&[("SHEETVIEW_DEBOUNCE_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ViewerError::Config(_)));
        assert!(ViewerConfig::from_json(r#"{"workerTimeoutMs": 0}"#).is_err());
    }
}
