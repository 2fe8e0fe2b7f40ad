use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::SecondsFormat;
use etl_config::shared::parse_timestamp;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::store::cursor::CursorStore;
use crate::types::{Cursor, SyncStream};

/// On-disk layout: index, then changed entity kind, then a single `timestamp: ids` entry.
type CursorDocument = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<Uuid>>>>;

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    cursors: BTreeMap<SyncStream, Cursor>,
}

/// Cursor store backed by a json document on the local filesystem.
///
/// The whole document is rewritten on every update: it is written to a sibling temporary
/// file which then replaces the document, so a crash never leaves a truncated file behind.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    inner: Arc<Mutex<Inner>>,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                path: path.into(),
                cursors: BTreeMap::new(),
            })),
        }
    }
}

impl CursorStore for FileCursorStore {
    async fn load_cursors(&self) -> EtlResult<usize> {
        let mut inner = self.inner.lock().await;

        let contents = match tokio::fs::read(&inner.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(
                    path = %inner.path.display(),
                    "no cursor file found, every stream starts from the fallback time"
                );
                return Ok(0);
            }
            Err(err) => {
                return Err(etl_error!(
                    ErrorKind::CursorStoreFailed,
                    "Cursor file could not be read",
                    detail = format!("{}: {err}", inner.path.display()),
                    source: err
                ));
            }
        };

        inner.cursors = decode_cursors(&contents)?;
        info!(path = %inner.path.display(), count = inner.cursors.len(), "loaded sync cursors");

        Ok(inner.cursors.len())
    }

    async fn get_cursor(&self, stream: SyncStream) -> EtlResult<Option<Cursor>> {
        let inner = self.inner.lock().await;

        Ok(inner.cursors.get(&stream).cloned())
    }

    async fn store_cursor(&self, cursor: Cursor) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;

        let mut cursors = inner.cursors.clone();
        cursors.insert(cursor.stream, cursor);

        let contents = serde_json::to_vec_pretty(&encode_cursors(&cursors))?;
        write_atomically(&inner.path, &contents)
            .await
            .map_err(|err| {
                etl_error!(
                    ErrorKind::CursorStoreFailed,
                    "Cursor file could not be written",
                    detail = format!("{}: {err}", inner.path.display()),
                    source: err
                )
            })?;

        inner.cursors = cursors;
        debug!(path = %inner.path.display(), "stored sync cursors");

        Ok(())
    }
}

async fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            tokio::fs::create_dir_all(parent).await?;
        }
        _ => {}
    }

    let mut temporary = OsString::from(path.as_os_str());
    temporary.push(".tmp");
    let temporary = PathBuf::from(temporary);

    tokio::fs::write(&temporary, contents).await?;
    tokio::fs::rename(&temporary, path).await
}

fn encode_cursors(cursors: &BTreeMap<SyncStream, Cursor>) -> CursorDocument {
    let mut document = CursorDocument::new();

    for cursor in cursors.values() {
        let timestamp = cursor
            .last_modified
            .to_rfc3339_opts(SecondsFormat::AutoSi, true);

        document
            .entry(cursor.stream.index.as_str().to_string())
            .or_default()
            .insert(
                cursor.stream.entity.as_str().to_string(),
                BTreeMap::from([(timestamp, cursor.seen_ids.iter().copied().collect())]),
            );
    }

    document
}

fn decode_cursors(contents: &[u8]) -> EtlResult<BTreeMap<SyncStream, Cursor>> {
    let document: CursorDocument = serde_json::from_slice(contents).map_err(|err| {
        etl_error!(
            ErrorKind::CursorStoreFailed,
            "Cursor file is not a valid cursor document",
            err,
            source: err
        )
    })?;

    let mut cursors = BTreeMap::new();
    for (index, entities) in document {
        for (entity, entries) in entities {
            let Some(stream) = SyncStream::from_names(&index, &entity) else {
                warn!(index, entity, "ignoring cursor of unknown sync stream");
                continue;
            };

            // Documents written by hand may hold several entries, the latest one wins.
            let mut latest: Option<Cursor> = None;
            for (timestamp, ids) in entries {
                let Some(last_modified) = parse_timestamp(&timestamp) else {
                    return Err(etl_error!(
                        ErrorKind::CursorStoreFailed,
                        "Cursor timestamp could not be parsed",
                        detail = format!("{stream}: `{timestamp}`")
                    ));
                };

                if latest
                    .as_ref()
                    .is_none_or(|cursor| cursor.last_modified < last_modified)
                {
                    latest = Some(Cursor::new(
                        stream,
                        last_modified,
                        ids.into_iter().collect::<BTreeSet<_>>(),
                    ));
                }
            }

            if let Some(cursor) = latest {
                cursors.insert(stream, cursor);
            }
        }
    }

    Ok(cursors)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[tokio::test]
    async fn missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::new(dir.path().join("state.json"));

        assert_eq!(store.load_cursors().await.unwrap(), 0);
        assert_eq!(store.get_cursor(SyncStream::GENRES).await.unwrap(), None);
    }

    #[tokio::test]
    async fn stored_cursors_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let id = Uuid::new_v4();
        let cursor = Cursor::new(
            SyncStream::MOVIES_BY_PERSON,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            BTreeSet::from([id]),
        );

        let store = FileCursorStore::new(&path);
        store.store_cursor(cursor.clone()).await.unwrap();

        let reopened = FileCursorStore::new(&path);
        assert_eq!(reopened.load_cursors().await.unwrap(), 1);
        assert_eq!(
            reopened
                .get_cursor(SyncStream::MOVIES_BY_PERSON)
                .await
                .unwrap(),
            Some(cursor)
        );

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            written["movies"]["person"]["2024-01-01T00:00:00Z"][0],
            serde_json::Value::String(id.to_string())
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let contents = br#"{"genres": {"genre": {"2024-01-01 10:00:00": []}}}"#;

        let cursors = decode_cursors(contents).unwrap();

        assert_eq!(
            cursors[&SyncStream::GENRES].last_modified,
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn unknown_streams_are_skipped() {
        let contents = br#"{"shows": {"film": {"2024-01-01": []}}, "persons": {"person": {"2024-02-01": []}}}"#;

        let cursors = decode_cursors(contents).unwrap();

        assert_eq!(cursors.len(), 1);
        assert!(cursors.contains_key(&SyncStream::PERSONS));
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let err = decode_cursors(b"[1, 2").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CursorStoreFailed);
    }
}
