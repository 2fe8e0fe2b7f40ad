//! Shared configuration types.

mod base;
mod batch;
mod connection;
mod event_sink;
mod replicator;
mod retry;
mod search_sync;
mod time;

pub use base::ValidationError;
pub use batch::BatchConfig;
pub use connection::{
    IntoConnectOptions, PgConnectionConfig, PgConnectionConfigWithoutSecrets,
    PgConnectionOptions, SEARCH_SYNC_OPTIONS, TlsConfig,
};
pub use event_sink::{
    ClickHouseConfig, ClickHouseConfigWithoutSecrets, EventSinkConfig,
    EventSinkConfigWithoutSecrets, KafkaConfig,
};
pub use replicator::{ReplicatorConfig, ReplicatorConfigWithoutSecrets};
pub use retry::RetryConfig;
pub use search_sync::{
    CursorStoreConfig, ElasticsearchConfig, ElasticsearchConfigWithoutSecrets, IndexNames,
    SearchSyncConfig, SearchSyncConfigWithoutSecrets,
};
pub use time::parse_timestamp;
