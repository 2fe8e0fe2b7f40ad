use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Batching of analytics events before they are written.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Number of buffered events of one kind that triggers a flush.
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
    /// Maximum age, in milliseconds, of the oldest buffered event before its kind is flushed.
    ///
    /// Zero disables time based flushing.
    #[serde(default = "default_batch_max_fill_ms")]
    pub max_fill_ms: u64,
}

impl BatchConfig {
    pub const DEFAULT_MAX_SIZE: usize = 10;

    pub const DEFAULT_MAX_FILL_MS: u64 = 5000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::invalid(
                "batch.max_size",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Returns the fill timeout, or `None` when time based flushing is disabled.
    pub fn max_fill(&self) -> Option<Duration> {
        (self.max_fill_ms > 0).then(|| Duration::from_millis(self.max_fill_ms))
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
            max_fill_ms: default_batch_max_fill_ms(),
        }
    }
}

fn default_batch_max_size() -> usize {
    BatchConfig::DEFAULT_MAX_SIZE
}

fn default_batch_max_fill_ms() -> u64 {
    BatchConfig::DEFAULT_MAX_FILL_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_max_size_is_rejected() {
        let config = BatchConfig {
            max_size: 0,
            max_fill_ms: 0,
        };

        assert!(config.validate().is_err());
        assert_eq!(config.max_fill(), None);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: BatchConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.max_size, 10);
        assert_eq!(config.max_fill(), Some(Duration::from_secs(5)));
    }
}
