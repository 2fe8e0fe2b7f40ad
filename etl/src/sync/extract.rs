use std::collections::BTreeSet;

use tracing::debug;
use uuid::Uuid;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::source::CatalogSource;
use crate::types::{ChangeBatch, Cursor};

/// Extracts the next batch of changes of `cursor.stream`.
///
/// At most `row_limit` changed rows are read, starting right after `cursor`. For streams whose
/// changed entity is the index root the changed ids are the root ids. Other streams resolve the
/// changed ids to every film linking to them; that resolution is not truncated by `row_limit`.
///
/// Nothing changed yields an empty batch and leaves the cursor where it is.
pub async fn extract_changes<S>(
    source: &S,
    cursor: &Cursor,
    row_limit: usize,
) -> EtlResult<ChangeBatch>
where
    S: CatalogSource,
{
    let stream = cursor.stream;

    let changed = source
        .modified_rows(stream.entity, cursor.last_modified, &cursor.seen_ids, row_limit)
        .await?;

    if changed.is_empty() {
        debug!(%stream, since = %cursor.last_modified, "no changes found");
        return Ok(ChangeBatch::empty(stream));
    }

    if changed.len() > row_limit {
        return Err(etl_error!(
            ErrorKind::InvalidState,
            "Catalog returned more rows than requested",
            detail = format!("{stream}: {} rows for a limit of {row_limit}", changed.len())
        ));
    }

    let changed_ids: Vec<Uuid> = changed.iter().map(|row| row.id).collect();
    let root_ids = match stream.link_table() {
        None => changed_ids.iter().copied().collect::<BTreeSet<_>>(),
        Some(link) => source.linked_film_ids(link, &changed_ids).await?,
    };

    let batch = ChangeBatch::new(stream, cursor, changed, root_ids);
    debug!(
        %stream,
        changed = batch.changed.len(),
        root_ids = batch.root_ids.len(),
        high_watermark = ?batch.high_watermark(),
        "extracted changes"
    );

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::test_utils::catalog::MemoryCatalog;
    use crate::types::{EntityKind, SyncStream};

    fn day(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn fallback() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn nothing_changed_keeps_the_cursor() {
        let catalog = MemoryCatalog::new();
        catalog.add_film("Old", None, fallback()).await;
        let cursor = Cursor::new(SyncStream::MOVIES_BY_FILM, day(1), Default::default());

        let batch = extract_changes(&catalog, &cursor, 10).await.unwrap();

        assert!(batch.is_empty());
        assert!(batch.root_ids.is_empty());
        assert_eq!(batch.next_cursor(), None);
    }

    #[tokio::test]
    async fn initial_cursor_skips_rows_modified_at_the_fallback_time() {
        let catalog = MemoryCatalog::new();
        catalog.add_film("At Fallback", None, fallback()).await;
        let later = catalog.add_film("Later", None, day(1)).await;
        let cursor = Cursor::initial(SyncStream::MOVIES_BY_FILM, fallback());

        let batch = extract_changes(&catalog, &cursor, 10).await.unwrap();

        assert_eq!(batch.root_ids, BTreeSet::from([later]));
        assert_eq!(batch.high_watermark(), Some(day(1)));
    }

    #[tokio::test]
    async fn batches_respect_the_row_limit() {
        let catalog = MemoryCatalog::new();
        for day_of_month in 1..=5 {
            catalog.add_film("Film", None, day(day_of_month)).await;
        }
        let cursor = Cursor::initial(SyncStream::MOVIES_BY_FILM, fallback());

        let batch = extract_changes(&catalog, &cursor, 3).await.unwrap();

        assert_eq!(batch.changed.len(), 3);
        assert_eq!(batch.root_ids.len(), 3);
        let max_modified = batch.changed.iter().map(|row| row.modified).max();
        assert_eq!(batch.high_watermark(), max_modified);
        assert_eq!(batch.high_watermark(), Some(day(3)));
    }

    #[tokio::test]
    async fn rows_sharing_the_watermark_are_not_skipped() {
        let catalog = MemoryCatalog::new();
        for _ in 0..3 {
            catalog.add_person("Same Time", day(2)).await;
        }
        let mut cursor = Cursor::initial(SyncStream::PERSONS, fallback());

        let mut seen = BTreeSet::new();
        for _ in 0..3 {
            let batch = extract_changes(&catalog, &cursor, 1).await.unwrap();
            assert_eq!(batch.changed.len(), 1);
            seen.extend(batch.root_ids.iter().copied());
            cursor = batch.next_cursor().unwrap().clone();
        }

        assert_eq!(seen.len(), 3);
        assert_eq!(cursor.seen_ids.len(), 3);
        assert!(extract_changes(&catalog, &cursor, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn changed_person_resolves_to_every_linked_film() {
        let catalog = MemoryCatalog::new();
        let person = catalog.add_person("Mark Hamill", day(5)).await;
        let mut films = BTreeSet::new();
        for title in ["A New Hope", "The Empire Strikes Back", "Return of the Jedi"] {
            let film = catalog.add_film(title, None, fallback()).await;
            catalog.link_person(film, person, "actor").await;
            films.insert(film);
        }
        catalog.add_film("Unrelated", None, fallback()).await;

        let cursor = Cursor::initial(SyncStream::MOVIES_BY_PERSON, fallback());
        let batch = extract_changes(&catalog, &cursor, 200).await.unwrap();

        assert_eq!(batch.root_ids, films);
        assert_eq!(batch.changed.len(), 1);
        assert_eq!(batch.high_watermark(), Some(day(5)));
        assert_eq!(
            catalog.modified_queries().await,
            vec![(EntityKind::Person, 1)]
        );
    }
}
