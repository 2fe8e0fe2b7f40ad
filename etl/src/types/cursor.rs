use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::SyncStream;

/// Progress of one sync stream.
///
/// `last_modified` is the high-watermark of the last processed batch and `seen_ids` are the
/// rows already processed at exactly that timestamp. Rows sharing the watermark that did not
/// fit in a batch are picked up by the next extraction instead of being skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub stream: SyncStream,
    pub last_modified: DateTime<Utc>,
    pub seen_ids: BTreeSet<Uuid>,
}

impl Cursor {
    pub fn new(stream: SyncStream, last_modified: DateTime<Utc>, seen_ids: BTreeSet<Uuid>) -> Self {
        Self {
            stream,
            last_modified,
            seen_ids,
        }
    }

    /// Cursor of a stream that never synced, starting at `fallback`.
    pub fn initial(stream: SyncStream, fallback: DateTime<Utc>) -> Self {
        Self::new(stream, fallback, BTreeSet::new())
    }
}

/// A changed row of the table a stream watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifiedRow {
    pub id: Uuid,
    pub modified: DateTime<Utc>,
}

/// Outcome of one extraction.
///
/// An empty batch means nothing changed: nothing is written and the cursor stays put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub stream: SyncStream,
    /// Changed rows, ordered by modification time.
    pub changed: Vec<ModifiedRow>,
    /// Documents to rewrite in the stream's index.
    pub root_ids: BTreeSet<Uuid>,
    next_cursor: Option<Cursor>,
}

impl ChangeBatch {
    pub fn empty(stream: SyncStream) -> Self {
        Self {
            stream,
            changed: Vec::new(),
            root_ids: BTreeSet::new(),
            next_cursor: None,
        }
    }

    /// Builds a batch from changed rows and the root ids they resolve to.
    ///
    /// The next cursor sits at the greatest modification time of `changed`. When that time
    /// equals the previous cursor, the ids already seen there are carried over.
    pub fn new(
        stream: SyncStream,
        previous: &Cursor,
        changed: Vec<ModifiedRow>,
        root_ids: BTreeSet<Uuid>,
    ) -> Self {
        let Some(high_watermark) = changed.iter().map(|row| row.modified).max() else {
            return Self::empty(stream);
        };

        let mut seen_ids: BTreeSet<Uuid> = changed
            .iter()
            .filter(|row| row.modified == high_watermark)
            .map(|row| row.id)
            .collect();
        if high_watermark == previous.last_modified {
            seen_ids.extend(previous.seen_ids.iter().copied());
        }

        Self {
            stream,
            changed,
            root_ids,
            next_cursor: Some(Cursor::new(stream, high_watermark, seen_ids)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    /// Greatest modification time among the changed rows.
    pub fn high_watermark(&self) -> Option<DateTime<Utc>> {
        self.next_cursor.as_ref().map(|cursor| cursor.last_modified)
    }

    /// Cursor to persist once the batch is written, `None` for an empty batch.
    pub fn next_cursor(&self) -> Option<&Cursor> {
        self.next_cursor.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn watermark_is_the_latest_modification() {
        let previous = Cursor::initial(SyncStream::GENRES, at(0));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let batch = ChangeBatch::new(
            SyncStream::GENRES,
            &previous,
            vec![
                ModifiedRow { id: a, modified: at(1) },
                ModifiedRow { id: b, modified: at(3) },
            ],
            BTreeSet::from([a, b]),
        );

        let cursor = batch.next_cursor().unwrap();
        assert_eq!(batch.high_watermark(), Some(at(3)));
        assert_eq!(cursor.seen_ids, BTreeSet::from([b]));
    }

    #[test]
    fn ids_seen_at_an_unchanged_watermark_accumulate() {
        let first = Uuid::new_v4();
        let previous = Cursor::new(SyncStream::PERSONS, at(2), BTreeSet::from([first]));
        let second = Uuid::new_v4();

        let batch = ChangeBatch::new(
            SyncStream::PERSONS,
            &previous,
            vec![ModifiedRow { id: second, modified: at(2) }],
            BTreeSet::from([second]),
        );

        assert_eq!(
            batch.next_cursor().unwrap().seen_ids,
            BTreeSet::from([first, second])
        );
    }

    #[test]
    fn no_changes_means_no_cursor() {
        let previous = Cursor::initial(SyncStream::MOVIES_BY_FILM, at(0));
        let batch =
            ChangeBatch::new(SyncStream::MOVIES_BY_FILM, &previous, vec![], BTreeSet::new());

        assert!(batch.is_empty());
        assert_eq!(batch.next_cursor(), None);
    }
}
