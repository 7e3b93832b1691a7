//! Session configuration

use parquet::basic::Compression;
use std::str::FromStr;

/// Environment variable overriding [`ExecutionConfig::batch_size`]
pub const ENV_BATCH_SIZE: &str = "ICEQUERY_BATCH_SIZE";
/// Environment variable overriding [`ExecutionConfig::target_partitions`]
pub const ENV_TARGET_PARTITIONS: &str = "ICEQUERY_TARGET_PARTITIONS";
/// Environment variable overriding [`ExecutionConfig::csv_has_header`]
pub const ENV_CSV_HEADER: &str = "ICEQUERY_CSV_HEADER";

/// Configuration for an execution session
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Rows per batch read from file sources
    pub batch_size: usize,
    /// Partitions requested from large scans
    pub target_partitions: usize,
    /// Whether CSV files start with a header row
    pub csv_has_header: bool,
    /// CSV field delimiter
    pub csv_delimiter: u8,
    /// Run predicate and projection pushdown
    pub enable_optimizer: bool,
    /// Codec for Parquet data files written by INSERT
    pub parquet_compression: Compression,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            batch_size: 8192,
            target_partitions: rayon::current_num_threads(),
            csv_has_header: true,
            csv_delimiter: b',',
            enable_optimizer: true,
            parquet_compression: Compression::SNAPPY,
        }
    }
}

impl ExecutionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `ICEQUERY_*` environment variables.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(batch_size) = env_value::<usize>(ENV_BATCH_SIZE) {
            config = config.with_batch_size(batch_size);
        }
        if let Some(partitions) = env_value::<usize>(ENV_TARGET_PARTITIONS) {
            config = config.with_target_partitions(partitions);
        }
        if let Some(header) = env_value::<bool>(ENV_CSV_HEADER) {
            config = config.with_csv_has_header(header);
        }
        config
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_target_partitions(mut self, partitions: usize) -> Self {
        self.target_partitions = partitions.max(1);
        self
    }

    pub fn with_csv_has_header(mut self, has_header: bool) -> Self {
        self.csv_has_header = has_header;
        self
    }

    pub fn with_csv_delimiter(mut self, delimiter: u8) -> Self {
        self.csv_delimiter = delimiter;
        self
    }

    pub fn with_optimizer(mut self, enabled: bool) -> Self {
        self.enable_optimizer = enabled;
        self
    }

    pub fn with_parquet_compression(mut self, compression: Compression) -> Self {
        self.parquet_compression = compression;
        self
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring invalid configuration value");
            None
        }
    }
}
