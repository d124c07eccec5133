//! Run configuration and semantic validation.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::shutdown::DEFAULT_GRACE_PERIOD;

/// Configuration for a single extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Connection URI of the event store.
    pub source_uri: String,
    /// Database holding the event collection.
    pub database: String,
    /// Collection to read records from.
    pub collection: String,
    /// Maximum number of concurrently running processing callbacks.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Checkpoint file path. `None` (or an empty path) disables
    /// persistence: every run is a full-history run.
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
    /// Time allowed for in-flight workers to finish after a shutdown
    /// signal before they are abandoned.
    #[serde(default = "default_grace_period")]
    pub grace_period: Duration,
}

fn default_workers() -> usize {
    1
}

fn default_grace_period() -> Duration {
    DEFAULT_GRACE_PERIOD
}

impl RunConfig {
    /// Validate the configuration.
    /// Returns `Ok(())` if valid, Err with all validation errors if not.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] listing every validation failure found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.workers < 1 {
            errors.push(format!("workers must be at least 1 (got {})", self.workers));
        }
        if self.source_uri.trim().is_empty() {
            errors.push("source_uri must not be empty".to_string());
        }
        if self.database.trim().is_empty() {
            errors.push("database must not be empty".to_string());
        }
        if self.collection.trim().is_empty() {
            errors.push("collection must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError(errors))
        }
    }
}
