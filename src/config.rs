//! Configuration for the materialization pipeline and lookup API
//!
//! Values come from built-in defaults, an optional YAML file, and finally
//! environment variables (the same `ELASTIC_*` variables the import scripts
//! use), in that order of precedence.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Upper bound on concurrently scanned slices
pub const MAX_SCAN_SLICES: usize = 8;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid YAML for this schema
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// An environment override could not be parsed
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },

    /// A setting is outside its allowed range
    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Connection settings for the backing document store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL, e.g. `http://localhost:9200`
    pub url: String,
    /// API key sent as `Authorization: ApiKey ...`
    pub api_key: Option<String>,
    /// Basic auth user (ignored when `api_key` is set)
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// How long the store keeps a scan cursor alive between pages
    pub scroll_keep_alive: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            api_key: None,
            username: None,
            password: None,
            timeout_secs: 30,
            scroll_keep_alive: "2m".to_string(),
        }
    }
}

impl StoreConfig {
    /// Per-request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Field names of the source employee documents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    pub id: String,
    pub manager: String,
    pub name: String,
    pub title: String,
    pub department: String,
    pub email: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            id: "employeeId".to_string(),
            manager: "managerEmpId".to_string(),
            name: "fullName".to_string(),
            title: "designations".to_string(),
            department: "departments".to_string(),
            email: "emailAddress".to_string(),
        }
    }
}

/// Sizing of the batch job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Records per scan page
    pub page_size: usize,
    /// Slices scanned concurrently
    pub scan_slices: usize,
    /// Documents per bulk request
    pub batch_size: usize,
    /// Bulk requests in flight at once
    pub write_concurrency: usize,
    /// Longest management chain materialized before the walk is cut
    pub max_chain_depth: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            scan_slices: 2,
            batch_size: 500,
            write_concurrency: 4,
            max_chain_depth: orgtree_algorithms::DEFAULT_MAX_DEPTH,
        }
    }
}

/// Query-time lookup behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupSettings {
    /// Resolve from the source index when no materialized node exists
    pub fallback_to_source: bool,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub address: String,
    pub port: u16,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgtreeConfig {
    pub store: StoreConfig,
    /// Index holding the raw employee records
    pub source_index: String,
    /// Index receiving the materialized hierarchy nodes
    pub target_index: String,
    pub fields: FieldNames,
    pub pipeline: PipelineSettings,
    pub retry: RetryPolicy,
    pub lookup: LookupSettings,
    pub http: HttpSettings,
}

impl Default for OrgtreeConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            source_index: "new_people".to_string(),
            target_index: "employee_hierarchy".to_string(),
            fields: FieldNames::default(),
            pipeline: PipelineSettings::default(),
            retry: RetryPolicy::default(),
            lookup: LookupSettings::default(),
            http: HttpSettings::default(),
        }
    }
}

impl OrgtreeConfig {
    /// Parse a YAML document; missing keys take their defaults
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read a YAML config file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        debug!("Loading config from {:?}", path);
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Defaults or file, then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (injectable for tests)
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("ELASTIC_HOST");
        let port = lookup("ELASTIC_PORT");
        let scheme = lookup("ELASTIC_SCHEME");
        if host.is_some() || port.is_some() || scheme.is_some() {
            let host = host.unwrap_or_else(|| "localhost".to_string());
            let port = port.unwrap_or_else(|| "9200".to_string());
            let port: u16 = parse_env("ELASTIC_PORT", &port)?;
            let scheme = scheme.unwrap_or_else(|| "http".to_string());
            self.store.url = format!("{}://{}:{}", scheme, host, port);
        }

        if let Some(api_key) = lookup("ELASTIC_API_KEY") {
            self.store.api_key = Some(api_key);
        }
        if let Some(username) = lookup("ELASTIC_USERNAME") {
            self.store.username = Some(username);
        }
        if let Some(password) = lookup("ELASTIC_PASSWORD") {
            self.store.password = Some(password);
        }
        if let Some(index) = lookup("ORGTREE_SOURCE_INDEX") {
            self.source_index = index;
        }
        if let Some(index) = lookup("ORGTREE_TARGET_INDEX") {
            self.target_index = index;
        }
        if let Some(value) = lookup("ORGTREE_BATCH_SIZE") {
            self.pipeline.batch_size = parse_env("ORGTREE_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("ORGTREE_MAX_CHAIN_DEPTH") {
            self.pipeline.max_chain_depth = parse_env("ORGTREE_MAX_CHAIN_DEPTH", &value)?;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        let p = &self.pipeline;
        require(p.page_size > 0, "pipeline.page_size", "must be at least 1")?;
        require(p.batch_size > 0, "pipeline.batch_size", "must be at least 1")?;
        require(p.write_concurrency > 0, "pipeline.write_concurrency", "must be at least 1")?;
        require(p.max_chain_depth > 0, "pipeline.max_chain_depth", "must be at least 1")?;
        require(
            (1..=MAX_SCAN_SLICES).contains(&p.scan_slices),
            "pipeline.scan_slices",
            &format!("must be between 1 and {}", MAX_SCAN_SLICES),
        )?;
        require(self.retry.max_attempts > 0, "retry.max_attempts", "must be at least 1")?;
        require(self.retry.multiplier >= 1.0, "retry.multiplier", "must be >= 1.0")?;
        require(!self.source_index.is_empty(), "source_index", "must not be empty")?;
        require(!self.target_index.is_empty(), "target_index", "must not be empty")?;
        require(
            self.source_index != self.target_index,
            "target_index",
            "must differ from source_index",
        )?;
        Ok(())
    }
}

fn require(condition: bool, field: &'static str, reason: &str) -> ConfigResult<()> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}
