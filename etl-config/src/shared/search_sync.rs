use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::shared::{
    PgConnectionConfig, PgConnectionConfigWithoutSecrets, ValidationError, parse_timestamp,
};

/// Settings of the Postgres to Elasticsearch sync.
///
/// Does not implement [`Serialize`] since it carries secrets; use
/// [`SearchSyncConfigWithoutSecrets`] for logging.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSyncConfig {
    /// Catalog database the documents are read from.
    pub source: PgConnectionConfig,
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub indices: IndexNames,
    /// Json file with `settings` and per index `mappings` overriding the built-in definitions.
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
    /// Seconds between two sync ticks.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Maximum rows extracted per stream per tick, also the document chunk size of index writes.
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,
    /// Starting point of streams that have no stored cursor.
    #[serde(default = "default_fallback_modified_time")]
    pub fallback_modified_time: String,
    #[serde(default)]
    pub cursor_store: CursorStoreConfig,
}

impl SearchSyncConfig {
    pub const DEFAULT_INTERVAL_SECS: u64 = 10;

    pub const DEFAULT_ROW_LIMIT: usize = 200;

    pub const DEFAULT_FALLBACK_MODIFIED_TIME: &'static str = "2020-01-01";

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Parses [`SearchSyncConfig::fallback_modified_time`].
    pub fn fallback_time(&self) -> Result<DateTime<Utc>, ValidationError> {
        parse_timestamp(&self.fallback_modified_time).ok_or_else(|| {
            ValidationError::InvalidTimestamp {
                field: "search_sync.fallback_modified_time".to_string(),
                value: self.fallback_modified_time.clone(),
            }
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.fallback_time()?;

        if self.interval_secs == 0 {
            return Err(ValidationError::invalid(
                "search_sync.interval_secs",
                "must be greater than 0",
            ));
        }

        if self.row_limit == 0 {
            return Err(ValidationError::invalid(
                "search_sync.row_limit",
                "must be greater than 0",
            ));
        }

        if self.elasticsearch.url.trim().is_empty() {
            return Err(ValidationError::invalid(
                "search_sync.elasticsearch.url",
                "must not be empty",
            ));
        }

        self.indices.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSyncConfigWithoutSecrets {
    pub source: PgConnectionConfigWithoutSecrets,
    pub elasticsearch: ElasticsearchConfigWithoutSecrets,
    pub indices: IndexNames,
    pub schema_path: Option<PathBuf>,
    pub interval_secs: u64,
    pub row_limit: usize,
    pub fallback_modified_time: String,
    pub cursor_store: CursorStoreConfig,
}

impl From<SearchSyncConfig> for SearchSyncConfigWithoutSecrets {
    fn from(value: SearchSyncConfig) -> Self {
        SearchSyncConfigWithoutSecrets {
            source: value.source.into(),
            elasticsearch: value.elasticsearch.into(),
            indices: value.indices,
            schema_path: value.schema_path,
            interval_secs: value.interval_secs,
            row_limit: value.row_limit,
            fallback_modified_time: value.fallback_modified_time,
            cursor_store: value.cursor_store,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElasticsearchConfig {
    /// Base url of the cluster, e.g. `http://localhost:9200`.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ElasticsearchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfigWithoutSecrets {
    pub url: String,
    pub username: Option<String>,
    pub request_timeout_ms: u64,
}

impl From<ElasticsearchConfig> for ElasticsearchConfigWithoutSecrets {
    fn from(value: ElasticsearchConfig) -> Self {
        ElasticsearchConfigWithoutSecrets {
            url: value.url,
            username: value.username,
            request_timeout_ms: value.request_timeout_ms,
        }
    }
}

/// Names of the three search indices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexNames {
    #[serde(default = "default_movies_index")]
    pub movies: String,
    #[serde(default = "default_genres_index")]
    pub genres: String,
    #[serde(default = "default_persons_index")]
    pub persons: String,
}

impl IndexNames {
    fn validate(&self) -> Result<(), ValidationError> {
        for (field, name) in [
            ("search_sync.indices.movies", &self.movies),
            ("search_sync.indices.genres", &self.genres),
            ("search_sync.indices.persons", &self.persons),
        ] {
            if name.is_empty() || name.chars().any(|c| c.is_ascii_uppercase()) {
                return Err(ValidationError::invalid(
                    field,
                    "must be a non-empty lowercase index name",
                ));
            }
        }

        Ok(())
    }
}

impl Default for IndexNames {
    fn default() -> Self {
        Self {
            movies: default_movies_index(),
            genres: default_genres_index(),
            persons: default_persons_index(),
        }
    }
}

/// Where sync cursors are persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum CursorStoreConfig {
    /// Cursors live in memory and are lost on restart.
    Memory,
    /// Cursors are kept in a json document on disk.
    File { path: PathBuf },
}

impl Default for CursorStoreConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("search_sync_state.json"),
        }
    }
}

fn default_interval_secs() -> u64 {
    SearchSyncConfig::DEFAULT_INTERVAL_SECS
}

fn default_row_limit() -> usize {
    SearchSyncConfig::DEFAULT_ROW_LIMIT
}

fn default_fallback_modified_time() -> String {
    SearchSyncConfig::DEFAULT_FALLBACK_MODIFIED_TIME.to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_movies_index() -> String {
    "movies".to_string()
}

fn default_genres_index() -> String {
    "genres".to_string()
}

fn default_persons_index() -> String {
    "persons".to_string()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn minimal_config() -> SearchSyncConfig {
        serde_json::from_value(serde_json::json!({
            "source": {
                "host": "localhost",
                "port": 5432,
                "name": "movies_database",
                "username": "app",
                "password": "secret"
            },
            "elasticsearch": { "url": "http://localhost:9200" }
        }))
        .unwrap()
    }

    #[test]
    fn defaults_match_the_catalog_deployment() {
        let config = minimal_config();

        assert_eq!(config.interval(), Duration::from_secs(10));
        assert_eq!(config.row_limit, 200);
        assert_eq!(config.indices, IndexNames::default());
        assert_eq!(
            config.fallback_time().unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cursor_store_is_tagged_by_type() {
        let config: CursorStoreConfig =
            serde_json::from_str(r#"{"type": "file", "path": "/var/lib/sync/state.json"}"#)
                .unwrap();
        assert_eq!(
            config,
            CursorStoreConfig::File {
                path: PathBuf::from("/var/lib/sync/state.json")
            }
        );

        let config: CursorStoreConfig = serde_json::from_str(r#"{"type": "memory"}"#).unwrap();
        assert_eq!(config, CursorStoreConfig::Memory);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = minimal_config();
        config.row_limit = 0;
        assert!(config.validate().is_err());

        let mut config = minimal_config();
        config.fallback_modified_time = "not a date".to_string();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidTimestamp { .. })
        ));

        let mut config = minimal_config();
        config.indices.movies = "Movies".to_string();
        assert!(config.validate().is_err());
    }
}
