use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::error::EtlResult;
use crate::sink::{CommitPosition, EventSource, SourceMessage};

/// Producing side of a [`MemoryEventSource`]. Dropping it exhausts the source.
#[derive(Debug)]
pub struct EventSender {
    tx: UnboundedSender<EtlResult<SourceMessage>>,
    next_offsets: HashMap<(String, i32), i64>,
}

impl EventSender {
    /// Sends a json payload to partition 0 of `topic` and returns its offset.
    pub fn send_json(&mut self, topic: &str, key: Option<&str>, payload: serde_json::Value) -> i64 {
        self.send_raw(topic, 0, key, Some(payload.to_string().into_bytes()))
    }

    /// Sends a message with an arbitrary payload and returns its offset.
    pub fn send_raw(
        &mut self,
        topic: &str,
        partition: i32,
        key: Option<&str>,
        payload: Option<Vec<u8>>,
    ) -> i64 {
        let next_offset = self
            .next_offsets
            .entry((topic.to_string(), partition))
            .or_insert(0);
        let offset = *next_offset;
        *next_offset += 1;

        let message = SourceMessage {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.map(|key| key.as_bytes().to_vec()),
            payload,
        };
        // A dropped source simply discards what is sent.
        let _ = self.tx.send(Ok(message));

        offset
    }
}

/// Event source fed from memory, recording commits.
#[derive(Debug, Clone)]
pub struct MemoryEventSource {
    rx: Arc<Mutex<UnboundedReceiver<EtlResult<SourceMessage>>>>,
    commits: Arc<Mutex<Vec<CommitPosition>>>,
}

impl MemoryEventSource {
    /// Creates a source that stays open until the returned sender is dropped.
    pub fn channel() -> (EventSender, MemoryEventSource) {
        let (tx, rx) = unbounded_channel();

        let sender = EventSender {
            tx,
            next_offsets: HashMap::new(),
        };
        let source = MemoryEventSource {
            rx: Arc::new(Mutex::new(rx)),
            commits: Arc::new(Mutex::new(Vec::new())),
        };

        (sender, source)
    }

    /// Every committed position in commit order.
    pub async fn commits(&self) -> Vec<CommitPosition> {
        self.commits.lock().await.clone()
    }

    /// Latest committed position of a partition.
    pub async fn committed_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.commits
            .lock()
            .await
            .iter()
            .filter(|position| position.topic == topic && position.partition == partition)
            .map(|position| position.offset)
            .max()
    }
}

impl EventSource for MemoryEventSource {
    async fn recv(&self) -> EtlResult<Option<SourceMessage>> {
        let mut rx = self.rx.lock().await;

        match rx.recv().await {
            Some(message) => message.map(Some),
            None => Ok(None),
        }
    }

    async fn commit(&self, positions: &[CommitPosition]) -> EtlResult<()> {
        self.commits.lock().await.extend_from_slice(positions);

        Ok(())
    }
}
