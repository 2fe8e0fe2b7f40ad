use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{AnalyticsEvent, EventKind};

/// Source position of a buffered event: topic, partition and offset.
pub type EventOffset = (String, i32, i64);

/// Events of one kind taken out of the buffers for a flush.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    pub kind: EventKind,
    pub events: Vec<AnalyticsEvent>,
    pub offsets: Vec<EventOffset>,
    buffered_at: Vec<Instant>,
}

#[derive(Debug)]
struct BufferedEvent {
    event: AnalyticsEvent,
    offset: EventOffset,
    buffered_at: Instant,
}

/// Per kind buffers of events waiting to be stored, oldest first.
#[derive(Debug, Default)]
pub struct EventBuffers {
    buffers: BTreeMap<EventKind, VecDeque<BufferedEvent>>,
    len: usize,
}

impl EventBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of buffered events across kinds.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn kind_len(&self, kind: EventKind) -> usize {
        self.buffers.get(&kind).map(VecDeque::len).unwrap_or(0)
    }

    /// Appends an event to the buffer of its kind.
    pub fn push(&mut self, event: AnalyticsEvent, offset: EventOffset, now: Instant) {
        self.buffers
            .entry(event.kind())
            .or_default()
            .push_back(BufferedEvent {
                event,
                offset,
                buffered_at: now,
            });
        self.len += 1;
    }

    /// Removes and returns up to `max` of the oldest events buffered for `kind`.
    ///
    /// Newer events stay buffered with their original arrival times.
    pub fn take(&mut self, kind: EventKind, max: usize) -> Option<EventBatch> {
        let buffer = self.buffers.get_mut(&kind)?;
        let count = buffer.len().min(max.max(1));

        let mut batch = EventBatch {
            kind,
            events: Vec::with_capacity(count),
            offsets: Vec::with_capacity(count),
            buffered_at: Vec::with_capacity(count),
        };
        for buffered in buffer.drain(..count) {
            batch.events.push(buffered.event);
            batch.offsets.push(buffered.offset);
            batch.buffered_at.push(buffered.buffered_at);
        }

        if buffer.is_empty() {
            self.buffers.remove(&kind);
        }
        self.len -= count;

        if batch.events.is_empty() {
            return None;
        }

        Some(batch)
    }

    /// Puts a batch that could not be stored back in front of newer events of its kind.
    pub fn restore(&mut self, batch: EventBatch) {
        if batch.events.is_empty() {
            return;
        }
        self.len += batch.events.len();

        let buffer = self.buffers.entry(batch.kind).or_default();
        let restored = batch
            .events
            .into_iter()
            .zip(batch.offsets)
            .zip(batch.buffered_at)
            .rev();
        for ((event, offset), buffered_at) in restored {
            buffer.push_front(BufferedEvent {
                event,
                offset,
                buffered_at,
            });
        }
    }

    /// Kinds whose oldest event has been buffered for at least `max_fill`.
    pub fn expired(&self, max_fill: Duration, now: Instant) -> Vec<EventKind> {
        self.buffers
            .iter()
            .filter(|(_, buffer)| {
                buffer.front().is_some_and(|oldest| {
                    now.saturating_duration_since(oldest.buffered_at) >= max_fill
                })
            })
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Kinds with buffered events.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.buffers.keys().copied().collect()
    }
}
