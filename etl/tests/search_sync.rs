use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use etl::error::ErrorKind;
use etl::index::SearchIndex;
use etl::index::memory::MemoryIndex;
use etl::index::schema::IndexSchemas;
use etl::pipeline::{SearchSync, SearchSyncPipeline, StreamOutcome, SyncSettings};
use etl::store::cursor::{CursorStore, FileCursorStore, MemoryCursorStore};
use etl::sync::extract::extract_changes;
use etl::test_utils::catalog::MemoryCatalog;
use etl::test_utils::faults::FaultyIndex;
use etl::types::{Cursor, EntityKind, SyncStream};
use etl_config::shared::IndexNames;
use etl_telemetry::tracing::init_test_tracing;
use uuid::Uuid;

fn fallback() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

fn day(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

fn settings(row_limit: usize) -> SyncSettings {
    SyncSettings {
        interval: Duration::from_millis(20),
        row_limit,
        fallback_time: fallback(),
        indices: IndexNames::default(),
    }
}

fn search_sync<I, S>(
    catalog: &MemoryCatalog,
    index: &I,
    store: &S,
    row_limit: usize,
) -> SearchSync<MemoryCatalog, I, S>
where
    I: SearchIndex + Clone + Sync,
    S: CursorStore + Clone + Sync,
{
    SearchSync::new(
        settings(row_limit),
        IndexSchemas::default(),
        catalog.clone(),
        index.clone(),
        store.clone(),
    )
}

fn ids(values: &serde_json::Value) -> BTreeSet<String> {
    values
        .as_array()
        .unwrap()
        .iter()
        .map(|value| value["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn idle_tick_writes_nothing_and_keeps_cursors() {
    init_test_tracing();

    let catalog = MemoryCatalog::new();
    let index = MemoryIndex::new();
    let store = MemoryCursorStore::new();
    let sync = search_sync(&catalog, &index, &store, 200);
    sync.prepare().await.unwrap();

    let report = sync.run_tick().await;

    assert_eq!(report.len(), SyncStream::ALL.len());
    for (stream, outcome) in report {
        assert_eq!(outcome.unwrap(), StreamOutcome::Idle, "{stream}");
        assert!(store.cursor_history(stream).await.is_empty());
    }
    assert_eq!(index.bulk_requests().await, 0);
    assert_eq!(index.indices().await, vec!["genres", "movies", "persons"]);
}

#[tokio::test]
async fn changed_genre_resyncs_its_films() {
    init_test_tracing();

    let catalog = MemoryCatalog::new();
    let genre = catalog.add_genre("Sci-Fi", day(1)).await;
    let first = catalog.add_film("Alien", Some(8.5), fallback()).await;
    let second = catalog.add_film("Aliens", Some(8.4), fallback()).await;
    catalog.add_film("Heat", Some(8.3), fallback()).await;
    catalog.link_genre(first, genre).await;
    catalog.link_genre(second, genre).await;

    let initial = Cursor::initial(SyncStream::MOVIES_BY_GENRE, fallback());
    let batch = extract_changes(&catalog, &initial, 200).await.unwrap();
    assert_eq!(batch.root_ids, BTreeSet::from([first, second]));
    assert_eq!(batch.high_watermark(), Some(day(1)));

    let index = MemoryIndex::new();
    let store = MemoryCursorStore::new();
    let sync = search_sync(&catalog, &index, &store, 200);

    let outcome = sync.sync_stream(SyncStream::MOVIES_BY_GENRE).await.unwrap();

    let StreamOutcome::Synced {
        changed_rows,
        documents,
        cursor,
    } = outcome
    else {
        panic!("expected the stream to sync");
    };
    assert_eq!(changed_rows, 1);
    assert_eq!(documents, 2);
    assert_eq!(cursor.last_modified, day(1));
    assert_eq!(
        store.get_cursor(SyncStream::MOVIES_BY_GENRE).await.unwrap(),
        Some(cursor)
    );

    let movies = index.documents("movies").await;
    assert_eq!(movies.keys().copied().collect::<BTreeSet<_>>(), BTreeSet::from([first, second]));
    assert_eq!(movies[&first]["genre"], serde_json::json!(["Sci-Fi"]));
}

#[tokio::test]
async fn changed_person_resyncs_exactly_their_films() {
    init_test_tracing();

    let catalog = MemoryCatalog::new();
    let person = catalog.add_person("Harrison Ford", day(3)).await;
    let mut films = BTreeSet::new();
    for title in ["A New Hope", "Blade Runner", "Witness"] {
        let film = catalog.add_film(title, None, fallback()).await;
        catalog.link_person(film, person, "actor").await;
        films.insert(film);
    }
    catalog.add_film("Unrelated", None, fallback()).await;

    let index = MemoryIndex::new();
    let store = MemoryCursorStore::new();
    let sync = search_sync(&catalog, &index, &store, 200);

    sync.sync_stream(SyncStream::MOVIES_BY_PERSON).await.unwrap();

    let movies = index.documents("movies").await;
    assert_eq!(movies.keys().copied().collect::<BTreeSet<_>>(), films);
    for document in movies.values() {
        assert_eq!(ids(&document["actors"]), BTreeSet::from([person.to_string()]));
        assert_eq!(document["actors_names"], serde_json::json!(["Harrison Ford"]));
        assert_eq!(document["writers"], serde_json::json!([]));
        assert_eq!(document["directors_names"], serde_json::json!([]));
        assert_eq!(document["genre"], serde_json::json!([]));
    }
}

#[tokio::test]
async fn replaying_a_tick_leaves_the_index_unchanged() {
    init_test_tracing();

    let catalog = MemoryCatalog::new();
    let genre = catalog.add_genre("Drama", day(1)).await;
    let person = catalog.add_person("Al Pacino", day(2)).await;
    let film = catalog.add_film("Heat", Some(8.3), day(3)).await;
    catalog.link_genre(film, genre).await;
    catalog.link_person(film, person, "actor").await;

    let index = MemoryIndex::new();
    let first_run = MemoryCursorStore::new();
    search_sync(&catalog, &index, &first_run, 200).run_tick().await;
    let after_first = (
        index.documents("movies").await,
        index.documents("genres").await,
        index.documents("persons").await,
    );

    // Cursors lost before being stored: the same changes are written again.
    let replay = MemoryCursorStore::new();
    let report = search_sync(&catalog, &index, &replay, 200).run_tick().await;
    assert!(report.values().all(|outcome| outcome.is_ok()));

    let after_replay = (
        index.documents("movies").await,
        index.documents("genres").await,
        index.documents("persons").await,
    );
    assert_eq!(after_first, after_replay);
    assert_eq!(after_replay.0.len(), 1);
    assert_eq!(after_replay.1.len(), 1);
    assert_eq!(after_replay.2.len(), 1);
}

#[tokio::test]
async fn failing_stream_does_not_block_the_others() {
    init_test_tracing();

    let catalog = MemoryCatalog::new();
    let genre = catalog.add_genre("Comedy", day(1)).await;
    let person = catalog.add_person("Bill Murray", day(1)).await;
    let film = catalog.add_film("Groundhog Day", Some(8.0), day(1)).await;
    catalog.link_genre(film, genre).await;
    catalog.link_person(film, person, "actor").await;

    let index = FaultyIndex::new(MemoryIndex::new());
    index.fail_writes_to("genres").await;
    let store = MemoryCursorStore::new();
    let sync = search_sync(&catalog, &index, &store, 200);

    let report = sync.run_tick().await;

    let genres_error = report[&SyncStream::GENRES].as_ref().unwrap_err();
    assert_eq!(genres_error.kind(), ErrorKind::IndexWriteFailed);
    assert!(store.get_cursor(SyncStream::GENRES).await.unwrap().is_none());
    for stream in [
        SyncStream::MOVIES_BY_FILM,
        SyncStream::MOVIES_BY_PERSON,
        SyncStream::MOVIES_BY_GENRE,
        SyncStream::PERSONS,
    ] {
        assert!(
            matches!(report[&stream], Ok(StreamOutcome::Synced { .. })),
            "{stream}"
        );
    }

    index.clear_faults().await;
    let report = sync.run_tick().await;

    assert!(matches!(
        report[&SyncStream::GENRES],
        Ok(StreamOutcome::Synced { .. })
    ));
    assert_eq!(
        report[&SyncStream::PERSONS].as_ref().unwrap(),
        &StreamOutcome::Idle
    );
    assert!(index.inner().document("genres", genre).await.is_some());
}

#[tokio::test]
async fn partial_bulk_failure_withholds_the_cursor() {
    init_test_tracing();

    let catalog = MemoryCatalog::new();
    let accepted = catalog.add_person("Accepted", day(1)).await;
    let rejected = catalog.add_person("Rejected", day(1)).await;

    let index = FaultyIndex::new(MemoryIndex::new());
    index.reject_document(rejected).await;
    let store = MemoryCursorStore::new();
    let sync = search_sync(&catalog, &index, &store, 200);

    let err = sync.sync_stream(SyncStream::PERSONS).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PartialBulkFailure);
    assert!(store.get_cursor(SyncStream::PERSONS).await.unwrap().is_none());
    assert!(index.inner().document("persons", accepted).await.is_some());

    index.clear_faults().await;
    let outcome = sync.sync_stream(SyncStream::PERSONS).await.unwrap();
    assert!(matches!(outcome, StreamOutcome::Synced { documents: 2, .. }));
}

#[tokio::test]
async fn unavailable_catalog_fails_every_stream() {
    init_test_tracing();

    let catalog = MemoryCatalog::new();
    catalog.add_film("Heat", None, day(1)).await;
    catalog.set_failing(true).await;

    let index = MemoryIndex::new();
    let store = MemoryCursorStore::new();
    let report = search_sync(&catalog, &index, &store, 200).run_tick().await;

    for (stream, outcome) in report {
        let err = outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceConnectionFailed, "{stream}");
        assert!(err.is_transient());
    }
    assert_eq!(index.bulk_requests().await, 0);
}

#[tokio::test]
async fn large_fan_out_is_written_in_bounded_chunks() {
    init_test_tracing();

    let catalog = MemoryCatalog::new();
    let director = catalog.add_person("Ridley Scott", day(2)).await;
    for number in 0..5 {
        let film = catalog.add_film(&format!("Film {number}"), None, fallback()).await;
        catalog.link_person(film, director, "director").await;
    }

    let index = MemoryIndex::new();
    let store = MemoryCursorStore::new();
    let sync = search_sync(&catalog, &index, &store, 2);

    let outcome = sync.sync_stream(SyncStream::MOVIES_BY_PERSON).await.unwrap();

    assert!(matches!(outcome, StreamOutcome::Synced { changed_rows: 1, documents: 5, .. }));
    assert_eq!(index.bulk_requests().await, 3);
    assert_eq!(index.documents("movies").await.len(), 5);
}

#[tokio::test]
async fn backlog_drains_across_ticks_without_exceeding_the_limit() {
    init_test_tracing();

    let catalog = MemoryCatalog::new();
    for number in 0..5u32 {
        catalog.add_genre(&format!("Genre {number}"), day(number + 1)).await;
    }

    let index = MemoryIndex::new();
    let store = MemoryCursorStore::new();
    let sync = search_sync(&catalog, &index, &store, 2);

    for _ in 0..3 {
        sync.sync_stream(SyncStream::GENRES).await.unwrap();
    }

    assert_eq!(index.documents("genres").await.len(), 5);
    let cursors: Vec<DateTime<Utc>> = store
        .cursor_history(SyncStream::GENRES)
        .await
        .into_iter()
        .map(|cursor| cursor.last_modified)
        .collect();
    assert_eq!(cursors, vec![day(2), day(4), day(5)]);
    assert!(
        catalog
            .modified_queries()
            .await
            .iter()
            .all(|(kind, rows)| *kind == EntityKind::Genre && *rows <= 2)
    );
    assert_eq!(
        sync.sync_stream(SyncStream::GENRES).await.unwrap(),
        StreamOutcome::Idle
    );
}

#[tokio::test]
async fn updates_after_a_sync_are_picked_up() {
    init_test_tracing();

    let catalog = MemoryCatalog::new();
    let person = catalog.add_person("Carrie Fisher", day(1)).await;
    let film = catalog.add_film("A New Hope", None, day(1)).await;
    catalog.link_person(film, person, "actor").await;

    let index = MemoryIndex::new();
    let store = MemoryCursorStore::new();
    let sync = search_sync(&catalog, &index, &store, 200);
    sync.run_tick().await;

    catalog
        .rename(EntityKind::Person, person, "Carrie F.", day(9))
        .await;
    let report = sync.run_tick().await;

    assert_eq!(
        report[&SyncStream::MOVIES_BY_FILM].as_ref().unwrap(),
        &StreamOutcome::Idle
    );
    let document = index.document("movies", film).await.unwrap();
    assert_eq!(document["actors_names"], serde_json::json!(["Carrie F."]));
    let person_document = index.document("persons", person).await.unwrap();
    assert_eq!(person_document["full_name"], "Carrie F.");
}

#[tokio::test]
async fn file_cursors_survive_a_restart() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("search_sync_state.json");

    let catalog = MemoryCatalog::new();
    catalog.add_genre("Western", day(4)).await;
    let index = MemoryIndex::new();

    let store = FileCursorStore::new(&path);
    let sync = search_sync(&catalog, &index, &store, 200);
    sync.prepare().await.unwrap();
    sync.run_tick().await;

    let restarted = FileCursorStore::new(&path);
    let sync = search_sync(&catalog, &index, &restarted, 200);
    sync.prepare().await.unwrap();

    let report = sync.run_tick().await;
    for (stream, outcome) in report {
        assert_eq!(outcome.unwrap(), StreamOutcome::Idle, "{stream}");
    }
    assert_eq!(
        restarted
            .get_cursor(SyncStream::GENRES)
            .await
            .unwrap()
            .map(|cursor| cursor.last_modified),
        Some(day(4))
    );
}

#[tokio::test]
async fn pipeline_syncs_in_the_background_until_shutdown() {
    init_test_tracing();

    let catalog = MemoryCatalog::new();
    let film = catalog.add_film("Stalker", Some(8.1), day(1)).await;
    let index = MemoryIndex::new();
    let store = MemoryCursorStore::new();

    let mut pipeline = SearchSyncPipeline::new(search_sync(&catalog, &index, &store, 200));
    pipeline.start().await.unwrap();

    let late_film: Uuid = catalog.add_film("Solaris", Some(8.0), day(2)).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while index.document("movies", late_film).await.is_none() {
        assert!(tokio::time::Instant::now() < deadline, "late film never synced");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    pipeline.shutdown_and_wait().await.unwrap();

    assert!(index.document("movies", film).await.is_some());
    assert_eq!(
        store
            .get_cursor(SyncStream::MOVIES_BY_FILM)
            .await
            .unwrap()
            .map(|cursor| cursor.last_modified),
        Some(day(2))
    );
}
