use std::sync::Arc;
use std::time::Duration;

use etl_config::shared::KafkaConfig;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tracing::info;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::sink::{CommitPosition, EventSource, SourceMessage};
use crate::types::EventKind;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Event source reading the tracking topics through a Kafka consumer group.
///
/// Auto commit is disabled: offsets move only through [`EventSource::commit`].
#[derive(Clone)]
pub struct KafkaEventSource {
    consumer: Arc<StreamConsumer>,
}

impl std::fmt::Debug for KafkaEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaEventSource").finish_non_exhaustive()
    }
}

impl KafkaEventSource {
    /// Creates the consumer and subscribes it to every tracking topic.
    pub fn new(config: &KafkaConfig) -> EtlResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.partition.eof", "false")
            .create()?;

        let topics = EventKind::topics();
        consumer.subscribe(&topics)?;
        info!(?topics, group_id = %config.group_id, "subscribed to tracking topics");

        Ok(Self {
            consumer: Arc::new(consumer),
        })
    }

    /// Checks that the brokers answer a metadata request.
    pub async fn ping(&self) -> EtlResult<()> {
        let consumer = self.consumer.clone();

        tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|err| {
            etl_error!(
                ErrorKind::InvalidState,
                "Kafka metadata task failed",
                err,
                source: err
            )
        })??;

        Ok(())
    }
}

impl EventSource for KafkaEventSource {
    async fn recv(&self) -> EtlResult<Option<SourceMessage>> {
        let message = self.consumer.recv().await?;

        Ok(Some(SourceMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
        }))
    }

    async fn commit(&self, positions: &[CommitPosition]) -> EtlResult<()> {
        let mut list = TopicPartitionList::new();
        for position in positions {
            list.add_partition_offset(
                &position.topic,
                position.partition,
                Offset::Offset(position.offset),
            )?;
        }

        self.consumer.commit(&list, CommitMode::Async)?;

        Ok(())
    }
}
