// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Loaded from a YAML file or from `FLOWKEEPER_*` environment variables
//! (a `.env` file is honoured). The store root is always explicit; nothing
//! is derived from the host process.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::error::{FlowError, Result};
use crate::retry::RetryConfig;
use crate::state::{LocalFileFlowStateStore, DEFAULT_LIST_LIMIT};

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Directory holding one file per flow instance
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,
    /// Default retry policy for flows without their own
    #[serde(default)]
    pub retry: RetryConfig,
    /// Default page size for listings
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

fn default_store_root() -> PathBuf {
    std::env::temp_dir().join("flowkeeper").join("flows")
}

fn default_list_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            retry: RetryConfig::default(),
            list_limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the environment, after loading `.env`
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(root) = lookup("FLOWKEEPER_STORE_ROOT") {
            config.store_root = PathBuf::from(root);
        }
        if let Some(v) = parse_var(&lookup, "FLOWKEEPER_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "FLOWKEEPER_MAX_RETRY_SECONDS")? {
            config.retry.max_retry_seconds = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "FLOWKEEPER_MAX_BACKOFF_SECONDS")? {
            config.retry.max_backoff_seconds = v;
        }
        if let Some(v) = parse_var(&lookup, "FLOWKEEPER_MAX_DOUBLINGS")? {
            config.retry.max_doublings = v;
        }
        if let Some(v) = parse_var(&lookup, "FLOWKEEPER_MIN_BACKOFF_SECONDS")? {
            config.retry.min_backoff_seconds = v;
        }
        if let Some(v) = parse_var(&lookup, "FLOWKEEPER_LIST_LIMIT")? {
            config.list_limit = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.retry
            .validate()
            .map_err(|e| FlowError::config(e.to_string()))?;
        if self.list_limit == 0 {
            return Err(FlowError::config("listLimit must be at least 1"));
        }
        Ok(())
    }

    /// Open the local-disk store at `store_root`
    pub fn open_local_store(&self) -> Result<LocalFileFlowStateStore> {
        LocalFileFlowStateStore::new(&self.store_root)
    }

    /// Dispatcher over the local-disk store with this config's retry policy
    pub fn build_dispatcher(&self) -> Result<Dispatcher> {
        let store = Arc::new(self.open_local_store()?);
        Ok(Dispatcher::new(store)
            .with_retry_config(self.retry.clone())?
            .with_list_limit(self.list_limit))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| FlowError::config(format!("{}={:?}: {}", key, raw, e))),
    }
}
