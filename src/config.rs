//! Table and client configuration.

use aws_config::{BehaviorVersion, Region, SdkConfig, defaults};
use aws_types::sdk_config::{RetryConfig, TimeoutConfig};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Hard per-call limit of read-style batches
pub const MAX_READ_CHUNK_SIZE: usize = 100;

/// Hard per-call limit of write batches
pub const MAX_WRITE_CHUNK_SIZE: usize = 25;

/// Hard per-call limit of transactions
pub const MAX_TRANSACT_ITEMS: usize = 100;

/// Item cache settings of the caching tier
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached items
    pub capacity: usize,
    /// Seconds an item stays cached
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: 300,
        }
    }
}

/// Immutable per-table configuration
///
/// Owned by each table instance; nothing is read from process-wide state
/// once a table is built.
///
/// # Example
///
/// ```rust
/// use dynamo_gateway::TableConfig;
///
/// let config = TableConfig::new("GameScores").with_write_chunk_size(10);
/// assert!(config.validate().is_ok());
/// assert!(TableConfig::new("").validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Table name
    pub table_name: String,
    /// Region override
    pub region: Option<String>,
    /// Endpoint override, e.g. a local emulator
    pub endpoint_url: Option<String>,
    /// Chunk size of batch and transactional reads
    pub read_chunk_size: usize,
    /// Chunk size of batch and transactional writes
    pub write_chunk_size: usize,
    /// Caching tier settings
    pub cache: CacheConfig,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table_name: String::new(),
            region: None,
            endpoint_url: None,
            read_chunk_size: MAX_READ_CHUNK_SIZE,
            write_chunk_size: MAX_WRITE_CHUNK_SIZE,
            cache: CacheConfig::default(),
        }
    }
}

impl TableConfig {
    /// Defaults for `table_name`
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Self::default()
        }
    }

    /// Override the region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Override the endpoint
    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    /// Override the read chunk size
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Override the write chunk size
    pub fn with_write_chunk_size(mut self, size: usize) -> Self {
        self.write_chunk_size = size;
        self
    }

    /// Override the cache settings
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Read configuration from the environment
    ///
    /// `DYNAMO_TABLE_NAME` is required. `DYNAMO_REGION`,
    /// `DYNAMO_ENDPOINT_URL`, `DYNAMO_READ_CHUNK_SIZE` and
    /// `DYNAMO_WRITE_CHUNK_SIZE` are optional.
    pub fn from_env() -> Result<Self, Error> {
        let table_name = env::var("DYNAMO_TABLE_NAME")
            .map_err(|_| Error::Config("DYNAMO_TABLE_NAME is not set".to_string()))?;

        let mut config = Self::new(table_name);
        config.region = env::var("DYNAMO_REGION").ok();
        config.endpoint_url = env::var("DYNAMO_ENDPOINT_URL").ok();
        if let Some(size) = parse_var("DYNAMO_READ_CHUNK_SIZE")? {
            config.read_chunk_size = size;
        }
        if let Some(size) = parse_var("DYNAMO_WRITE_CHUNK_SIZE")? {
            config.write_chunk_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject unusable settings
    pub fn validate(&self) -> Result<(), Error> {
        if self.table_name.trim().is_empty() {
            return Err(Error::Config("table name is empty".to_string()));
        }
        if !(1..=MAX_READ_CHUNK_SIZE).contains(&self.read_chunk_size) {
            return Err(Error::Config(format!(
                "read chunk size {} is outside 1..={MAX_READ_CHUNK_SIZE}",
                self.read_chunk_size
            )));
        }
        if !(1..=MAX_WRITE_CHUNK_SIZE).contains(&self.write_chunk_size) {
            return Err(Error::Config(format!(
                "write chunk size {} is outside 1..={MAX_WRITE_CHUNK_SIZE}",
                self.write_chunk_size
            )));
        }
        Ok(())
    }

    /// Build an SDK configuration with sensible defaults
    ///
    /// - Adaptive retry mode with 3 max attempts
    /// - Exponential backoff starting at 1 second
    /// - Connect timeout: 3 seconds
    /// - Read timeout: 20 seconds
    /// - Operation timeout: 60 seconds
    /// - LocalStack support via `AWS_PROFILE=localstack`
    ///
    /// The configured region and endpoint take precedence.
    pub async fn load_sdk_config(&self) -> SdkConfig {
        let timeout_config = TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs(3))
            .read_timeout(Duration::from_secs(20))
            .operation_timeout(Duration::from_secs(60))
            .build();

        let mut loader = defaults(BehaviorVersion::latest())
            .retry_config(
                RetryConfig::adaptive()
                    .with_max_attempts(3)
                    .with_initial_backoff(Duration::from_secs(1)),
            )
            .timeout_config(timeout_config);

        if env::var("AWS_PROFILE").unwrap_or_default() == "localstack" {
            loader = loader.endpoint_url("http://127.0.0.1:4566");
        }
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint_url) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        loader.load().await
    }
}

fn parse_var<V: FromStr>(name: &str) -> Result<Option<V>, Error> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} is not a valid number: `{raw}`"))),
        Err(_) => Ok(None),
    }
}
