//! Engine configuration, loadable from a TOML file. Every knob has a default
//! good enough for interactive use.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cap on materialized frames per callstack request, unlimited if unset.
    pub default_frame_limit: Option<usize>,
    /// Interval between polls of an in-flight evaluation, in milliseconds.
    pub eval_poll_interval_ms: u64,
    /// Wall-clock budget of a synchronous evaluation, in milliseconds. On
    /// expiry the call is aborted.
    pub eval_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_frame_limit: None,
            eval_poll_interval_ms: 10,
            eval_timeout_ms: 5000,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}
