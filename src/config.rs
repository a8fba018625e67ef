//! Explicit configuration of the sample jobs.
//!
//! Every field has a default matching the person import demo, so an empty
//! JSON object is a valid configuration:
//!
//! ```
//! use chunked_batch::config::BatchConfig;
//!
//! let config: BatchConfig = serde_json::from_str("{}").unwrap();
//! assert_eq!(config.chunk.size, 200);
//! assert_eq!(config.input.comment_prefix, "--");
//! assert!(config.validate().is_ok());
//! ```

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{core::policy::RetryPolicy, BatchError};

/// Where and how to read the input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub path: String,
    pub delimiter: char,
    pub comment_prefix: String,
    pub names: Vec<String>,
    pub lines_to_skip: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: "person.csv".to_string(),
            delimiter: ',',
            comment_prefix: "--".to_string(),
            names: ["name", "email", "age", "id"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
            lines_to_skip: 0,
        }
    }
}

/// Chunking and fault tolerance of the import step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub size: usize,
    /// Items that may be skipped before the step fails. `0` disables skipping.
    pub skip_limit: usize,
    /// Write attempts per chunk, the first one included.
    pub retry_attempts: usize,
    pub retry_backoff_ms: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: 200,
            skip_limit: 10,
            retry_attempts: 3,
            retry_backoff_ms: 100,
        }
    }
}

impl ChunkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

/// The target database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://person.db".to_string(),
            table: "person".to_string(),
        }
    }
}

/// Where execution history is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Database of the durable job repository. In memory when absent.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub input: InputConfig,
    pub chunk: ChunkConfig,
    pub database: DatabaseConfig,
    pub repository: RepositoryConfig,
}

impl BatchConfig {
    /// Loads and validates a JSON configuration file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, BatchError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: BatchConfig = serde_json::from_str(&content).map_err(|error| {
            BatchError::Configuration(format!("{}: {}", path.display(), error))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.chunk.size == 0 {
            return Err(BatchError::Configuration(
                "chunk.size must be greater than zero".to_string(),
            ));
        }
        if self.input.names.is_empty() {
            return Err(BatchError::Configuration(
                "input.names must list at least one column".to_string(),
            ));
        }
        if self.input.comment_prefix.trim().is_empty() {
            return Err(BatchError::Configuration(
                "input.comment_prefix must not be empty".to_string(),
            ));
        }
        if !self.input.delimiter.is_ascii() {
            return Err(BatchError::Configuration(format!(
                "input.delimiter must be an ASCII character, got {:?}",
                self.input.delimiter
            )));
        }
        if self.database.table.is_empty()
            || !self
                .database
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(BatchError::Configuration(format!(
                "database.table must be a plain identifier, got {:?}",
                self.database.table
            )));
        }
        Ok(())
    }

    /// The input delimiter as a byte. Only meaningful after [`validate`](Self::validate).
    pub fn delimiter(&self) -> u8 {
        self.input.delimiter as u8
    }
}
