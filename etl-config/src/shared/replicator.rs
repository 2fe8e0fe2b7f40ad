use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{
    EventSinkConfig, EventSinkConfigWithoutSecrets, RetryConfig, SearchSyncConfig,
    SearchSyncConfigWithoutSecrets, ValidationError,
};

/// Complete configuration of the replicator service.
///
/// Each section enables one service; at least one must be present. This does not
/// implement [`Serialize`] to avoid leaking secrets.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicatorConfig {
    #[serde(default)]
    pub search_sync: Option<SearchSyncConfig>,
    #[serde(default)]
    pub event_sink: Option<EventSinkConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ReplicatorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.search_sync.is_none() && self.event_sink.is_none() {
            return Err(ValidationError::invalid(
                "search_sync, event_sink",
                "at least one service must be configured",
            ));
        }

        if let Some(search_sync) = &self.search_sync {
            search_sync.validate()?;
        }

        if let Some(event_sink) = &self.event_sink {
            event_sink.validate()?;
        }

        self.retry.validate()
    }
}

impl Config for ReplicatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

/// Same as [`ReplicatorConfig`] but without secrets, safe to serialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatorConfigWithoutSecrets {
    pub search_sync: Option<SearchSyncConfigWithoutSecrets>,
    pub event_sink: Option<EventSinkConfigWithoutSecrets>,
    pub retry: RetryConfig,
}

impl From<ReplicatorConfig> for ReplicatorConfigWithoutSecrets {
    fn from(value: ReplicatorConfig) -> Self {
        ReplicatorConfigWithoutSecrets {
            search_sync: value.search_sync.map(Into::into),
            event_sink: value.event_sink.map(Into::into),
            retry: value.retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_rejected() {
        let config: ReplicatorConfig = serde_json::from_str("{}").unwrap();

        assert!(config.validate().is_err());
    }

    #[test]
    fn event_sink_alone_is_enough() {
        let config: ReplicatorConfig = serde_json::from_value(serde_json::json!({
            "event_sink": {
                "kafka": { "bootstrap_servers": "kafka:9092" },
                "clickhouse": { "url": "http://clickhouse:8123" }
            }
        }))
        .unwrap();

        assert!(config.validate().is_ok());
        assert!(config.search_sync.is_none());
    }
}
