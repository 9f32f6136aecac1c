//! Execution settings
//!
//! Settings are read from an optional TOML file and then overridden by
//! `SHARDQUERY_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ExecError, ExecResult};

/// Limit applied to root relations that carry no explicit LIMIT.
pub const DEFAULT_SELECT_LIMIT: usize = 10_000;

/// Result size above which the merge step stays on the coordinating node.
pub const PAGE_SIZE: usize = 500;

const ENV_PREFIX: &str = "SHARDQUERY_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Identifier of the coordinating (local) node
    pub node_id: String,
    pub default_select_limit: usize,
    pub page_size: usize,
    /// Ceiling enforced by the process-wide memory breaker
    pub query_memory_limit_bytes: u64,
    /// Number of rows a fetch projector resolves per round-trip
    pub fetch_batch_size: usize,
    /// Channel capacity of the streaming terminal projector
    pub stream_buffer_rows: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            default_select_limit: DEFAULT_SELECT_LIMIT,
            page_size: PAGE_SIZE,
            query_memory_limit_bytes: 256 * 1024 * 1024,
            fetch_batch_size: 500,
            stream_buffer_rows: 1024,
        }
    }
}

fn default_node_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "local".to_string())
}

impl ExecutionSettings {
    pub fn from_toml_str(raw: &str) -> ExecResult<Self> {
        let settings: Self =
            toml::from_str(raw).map_err(|e| ExecError::Settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ExecResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ExecError::Settings(format!("cannot read {}: {}", path.display(), e))
        })?;
        tracing::debug!("Loaded execution settings from {}", path.display());
        Self::from_toml_str(&raw)
    }

    /// Apply `SHARDQUERY_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> ExecResult<Self> {
        self.with_overrides(std::env::vars())
    }

    pub fn with_overrides<I>(mut self, vars: I) -> ExecResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "NODE_ID" => self.node_id = value,
                "DEFAULT_SELECT_LIMIT" => self.default_select_limit = parse_number(&key, &value)?,
                "PAGE_SIZE" => self.page_size = parse_number(&key, &value)?,
                "QUERY_MEMORY_LIMIT_BYTES" => {
                    self.query_memory_limit_bytes = parse_number(&key, &value)?
                }
                "FETCH_BATCH_SIZE" => self.fetch_batch_size = parse_number(&key, &value)?,
                "STREAM_BUFFER_ROWS" => self.stream_buffer_rows = parse_number(&key, &value)?,
                _ => tracing::warn!("Ignoring unknown setting override {}", key),
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> ExecResult<()> {
        if self.node_id.trim().is_empty() {
            return Err(ExecError::Settings("node_id must not be empty".to_string()));
        }
        if self.fetch_batch_size == 0 {
            return Err(ExecError::Settings(
                "fetch_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.stream_buffer_rows == 0 {
            return Err(ExecError::Settings(
                "stream_buffer_rows must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ExecResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ExecError::Settings(format!("{} expects a number, got '{}'", key, value)))
}
