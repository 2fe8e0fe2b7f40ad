use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::shared::{BatchConfig, ValidationError};

/// Settings of the Kafka to ClickHouse analytics sink.
#[derive(Debug, Clone, Deserialize)]
pub struct EventSinkConfig {
    pub kafka: KafkaConfig,
    pub clickhouse: ClickHouseConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    /// Upper bound of events buffered across all kinds. Consumption pauses while it is reached.
    #[serde(default = "default_max_buffered_events")]
    pub max_buffered_events: usize,
}

impl EventSinkConfig {
    pub const DEFAULT_MAX_BUFFERED_EVENTS: usize = 100_000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.batch.validate()?;

        if self.kafka.bootstrap_servers.trim().is_empty() {
            return Err(ValidationError::invalid(
                "event_sink.kafka.bootstrap_servers",
                "must not be empty",
            ));
        }

        if !matches!(
            self.kafka.auto_offset_reset.as_str(),
            "earliest" | "latest"
        ) {
            return Err(ValidationError::invalid(
                "event_sink.kafka.auto_offset_reset",
                "must be either `earliest` or `latest`",
            ));
        }

        if self.max_buffered_events < self.batch.max_size {
            return Err(ValidationError::invalid(
                "event_sink.max_buffered_events",
                "must be at least `event_sink.batch.max_size`",
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSinkConfigWithoutSecrets {
    pub kafka: KafkaConfig,
    pub clickhouse: ClickHouseConfigWithoutSecrets,
    pub batch: BatchConfig,
    pub max_buffered_events: usize,
}

impl From<EventSinkConfig> for EventSinkConfigWithoutSecrets {
    fn from(value: EventSinkConfig) -> Self {
        EventSinkConfigWithoutSecrets {
            kafka: value.kafka,
            clickhouse: value.clickhouse.into(),
            batch: value.batch,
            max_buffered_events: value.max_buffered_events,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma separated `host:port` list.
    pub bootstrap_servers: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Where a group without committed offsets starts reading, `earliest` or `latest`.
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClickHouseConfig {
    /// HTTP endpoint, e.g. `http://localhost:8123`.
    pub url: String,
    #[serde(default = "default_clickhouse_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default = "default_clickhouse_database")]
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickHouseConfigWithoutSecrets {
    pub url: String,
    pub user: String,
    pub database: String,
}

impl From<ClickHouseConfig> for ClickHouseConfigWithoutSecrets {
    fn from(value: ClickHouseConfig) -> Self {
        ClickHouseConfigWithoutSecrets {
            url: value.url,
            user: value.user,
            database: value.database,
        }
    }
}

fn default_max_buffered_events() -> usize {
    EventSinkConfig::DEFAULT_MAX_BUFFERED_EVENTS
}

fn default_group_id() -> String {
    "consumer_for_clickhouse".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u64 {
    6000
}

fn default_clickhouse_user() -> String {
    "default".to_string()
}

fn default_clickhouse_database() -> String {
    "tracking_user_events".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(value: serde_json::Value) -> EventSinkConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn defaults_match_the_tracking_deployment() {
        let config = config(serde_json::json!({
            "kafka": { "bootstrap_servers": "kafka:9092" },
            "clickhouse": { "url": "http://clickhouse:8123" }
        }));

        assert_eq!(config.kafka.group_id, "consumer_for_clickhouse");
        assert_eq!(config.kafka.auto_offset_reset, "earliest");
        assert_eq!(config.clickhouse.database, "tracking_user_events");
        assert_eq!(config.batch.max_size, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_offset_reset_is_rejected() {
        let config = config(serde_json::json!({
            "kafka": { "bootstrap_servers": "kafka:9092", "auto_offset_reset": "smallest" },
            "clickhouse": { "url": "http://clickhouse:8123" }
        }));

        assert!(config.validate().is_err());
    }

    #[test]
    fn buffer_bound_must_hold_a_full_batch() {
        let config = config(serde_json::json!({
            "kafka": { "bootstrap_servers": "kafka:9092" },
            "clickhouse": { "url": "http://clickhouse:8123" },
            "batch": { "max_size": 50 },
            "max_buffered_events": 10
        }));

        assert!(config.validate().is_err());
    }
}
