use std::collections::{BTreeMap, BTreeSet};

use crate::sink::CommitPosition;

#[derive(Debug, Default)]
struct PartitionOffsets {
    /// Offsets read but not yet stored.
    pending: BTreeSet<i64>,
    highest_seen: Option<i64>,
    committed: Option<i64>,
}

impl PartitionOffsets {
    fn commit_offset(&self) -> Option<i64> {
        match self.pending.first() {
            Some(lowest_pending) => Some(*lowest_pending),
            None => self.highest_seen.map(|offset| offset + 1),
        }
    }
}

/// Tracks which offsets of each partition are still buffered.
///
/// The committable position of a partition is its smallest pending offset, or one past the
/// highest offset seen once nothing is pending. Offsets of events buffered for another kind
/// therefore hold the position back until they are stored too.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: BTreeMap<(String, i32), PartitionOffsets>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an offset whose event is buffered and not yet stored.
    pub fn track_pending(&mut self, topic: &str, partition: i32, offset: i64) {
        let offsets = self.partition_mut(topic, partition);
        offsets.pending.insert(offset);
        offsets.highest_seen = offsets.highest_seen.max(Some(offset));
    }

    /// Records an offset that needs no storing, such as a dropped message.
    pub fn track_processed(&mut self, topic: &str, partition: i32, offset: i64) {
        let offsets = self.partition_mut(topic, partition);
        offsets.highest_seen = offsets.highest_seen.max(Some(offset));
    }

    /// Marks pending offsets as stored.
    pub fn complete<'a>(&mut self, offsets: impl IntoIterator<Item = &'a (String, i32, i64)>) {
        for (topic, partition, offset) in offsets {
            if let Some(partition) = self.partitions.get_mut(&(topic.clone(), *partition)) {
                partition.pending.remove(offset);
            }
        }
    }

    /// Positions that moved since the last [`OffsetTracker::mark_committed`].
    pub fn commit_positions(&self) -> Vec<CommitPosition> {
        self.partitions
            .iter()
            .filter_map(|((topic, partition), offsets)| {
                let offset = offsets.commit_offset()?;
                if offsets.committed.is_some_and(|committed| committed >= offset) {
                    return None;
                }

                Some(CommitPosition {
                    topic: topic.clone(),
                    partition: *partition,
                    offset,
                })
            })
            .collect()
    }

    pub fn mark_committed(&mut self, positions: &[CommitPosition]) {
        for position in positions {
            let offsets = self.partition_mut(&position.topic, position.partition);
            offsets.committed = offsets.committed.max(Some(position.offset));
        }
    }

    /// Number of offsets still pending across partitions.
    pub fn pending(&self) -> usize {
        self.partitions
            .values()
            .map(|offsets| offsets.pending.len())
            .sum()
    }

    fn partition_mut(&mut self, topic: &str, partition: i32) -> &mut PartitionOffsets {
        self.partitions
            .entry((topic.to_string(), partition))
            .or_default()
    }
}
