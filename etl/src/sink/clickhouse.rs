use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use etl_config::shared::ClickHouseConfig;
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::sink::AnalyticsStore;
use crate::types::{
    AnalyticsEvent, EventKind, FilmByIdQuery, FilmsQuery, FullViewClick, GenreByIdQuery,
    PageQuery, PageView, PauseClick, PersonByIdQuery, QualityChangeClick, SearchFilmsQuery,
    SearchPersonsQuery,
};

/// Column definitions of the table of `kind`, in insertion order.
fn table_columns(kind: EventKind) -> &'static [(&'static str, &'static str)] {
    const USER: (&str, &str) = ("user_id", "Nullable(UUID)");
    const GENRE: (&str, &str) = ("genre_query_param", "Nullable(String)");
    const SORT: (&str, &str) = ("sort_query_param", "Nullable(String)");
    const PAGE_NUMBER: (&str, &str) = ("page_number_query_param", "Int32");
    const PAGE_SIZE: (&str, &str) = ("page_size_query_param", "Int32");
    const KEYWORD: (&str, &str) = ("keyword_to_search_query_param", "String");
    const VISITED_AT: (&str, &str) = ("visited_at", "DateTime");
    const TIMESTAMP: (&str, &str) = ("timestamp", "Int64");

    match kind {
        EventKind::VideoQualityChange => &[
            USER,
            ("quality_before", "String"),
            ("quality_after", "String"),
            ("changed_at", "Float32"),
            TIMESTAMP,
        ],
        EventKind::VideoPause => &[USER, ("pause_at", "Float32"), TIMESTAMP],
        EventKind::VideoFullView => &[USER, TIMESTAMP],
        EventKind::GetFilms => &[USER, GENRE, SORT, PAGE_NUMBER, PAGE_SIZE, VISITED_AT],
        EventKind::GetFilmById => &[USER, ("film_id_query_param", "UUID"), VISITED_AT],
        EventKind::SearchFilms => &[
            USER,
            KEYWORD,
            GENRE,
            SORT,
            PAGE_NUMBER,
            PAGE_SIZE,
            VISITED_AT,
        ],
        EventKind::GetGenres => &[USER, PAGE_NUMBER, PAGE_SIZE, VISITED_AT],
        EventKind::GetGenreById => &[USER, ("genre_id_query_param", "UUID"), VISITED_AT],
        EventKind::GetPersonById => &[USER, ("person_id_query_param", "UUID"), VISITED_AT],
        EventKind::SearchPersons => &[USER, KEYWORD, PAGE_NUMBER, PAGE_SIZE, VISITED_AT],
    }
}

/// Column the table of `kind` is ordered by.
fn order_column(kind: EventKind) -> &'static str {
    match kind {
        EventKind::VideoQualityChange | EventKind::VideoPause | EventKind::VideoFullView => {
            "timestamp"
        }
        _ => "visited_at",
    }
}

/// Builds the `CREATE TABLE IF NOT EXISTS` statement of the table of `kind`.
pub fn create_table_sql(database: &str, kind: EventKind) -> String {
    let columns: Vec<String> = table_columns(kind)
        .iter()
        .map(|(name, column_type)| format!("{name} {column_type}"))
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS `{database}`.`{table}` ({columns}) ENGINE = MergeTree() ORDER BY {order}",
        table = kind.table_name(),
        columns = columns.join(", "),
        order = order_column(kind),
    )
}

/// Seconds since the epoch as stored in a `DateTime` column.
fn datetime_seconds(value: DateTime<Utc>) -> u32 {
    value.timestamp().clamp(0, i64::from(u32::MAX)) as u32
}

#[derive(Debug, Row, Serialize)]
struct QualityChangeRow {
    #[serde(with = "clickhouse::serde::uuid::option")]
    user_id: Option<Uuid>,
    quality_before: String,
    quality_after: String,
    changed_at: f32,
    timestamp: i64,
}

impl From<&QualityChangeClick> for QualityChangeRow {
    fn from(event: &QualityChangeClick) -> Self {
        Self {
            user_id: event.user_id,
            quality_before: event.quality_before.clone(),
            quality_after: event.quality_after.clone(),
            changed_at: event.changed_at,
            timestamp: event.timestamp,
        }
    }
}

#[derive(Debug, Row, Serialize)]
struct PauseRow {
    #[serde(with = "clickhouse::serde::uuid::option")]
    user_id: Option<Uuid>,
    pause_at: f32,
    timestamp: i64,
}

impl From<&PauseClick> for PauseRow {
    fn from(event: &PauseClick) -> Self {
        Self {
            user_id: event.user_id,
            pause_at: event.pause_at,
            timestamp: event.timestamp,
        }
    }
}

#[derive(Debug, Row, Serialize)]
struct FullViewRow {
    #[serde(with = "clickhouse::serde::uuid::option")]
    user_id: Option<Uuid>,
    timestamp: i64,
}

impl From<&FullViewClick> for FullViewRow {
    fn from(event: &FullViewClick) -> Self {
        Self {
            user_id: event.user_id,
            timestamp: event.timestamp,
        }
    }
}

#[derive(Debug, Row, Serialize)]
struct FilmsRow {
    #[serde(with = "clickhouse::serde::uuid::option")]
    user_id: Option<Uuid>,
    genre_query_param: Option<String>,
    sort_query_param: Option<String>,
    page_number_query_param: i32,
    page_size_query_param: i32,
    visited_at: u32,
}

impl From<&PageView<FilmsQuery>> for FilmsRow {
    fn from(event: &PageView<FilmsQuery>) -> Self {
        let query = &event.query_parameters;
        Self {
            user_id: event.user_id,
            genre_query_param: query.genre.clone(),
            sort_query_param: query.sort.clone(),
            page_number_query_param: query.page_number,
            page_size_query_param: query.page_size,
            visited_at: datetime_seconds(event.visited_at),
        }
    }
}

#[derive(Debug, Row, Serialize)]
struct FilmByIdRow {
    #[serde(with = "clickhouse::serde::uuid::option")]
    user_id: Option<Uuid>,
    #[serde(with = "clickhouse::serde::uuid")]
    film_id_query_param: Uuid,
    visited_at: u32,
}

impl From<&PageView<FilmByIdQuery>> for FilmByIdRow {
    fn from(event: &PageView<FilmByIdQuery>) -> Self {
        Self {
            user_id: event.user_id,
            film_id_query_param: event.query_parameters.film_id,
            visited_at: datetime_seconds(event.visited_at),
        }
    }
}

#[derive(Debug, Row, Serialize)]
struct SearchFilmsRow {
    #[serde(with = "clickhouse::serde::uuid::option")]
    user_id: Option<Uuid>,
    keyword_to_search_query_param: String,
    genre_query_param: Option<String>,
    sort_query_param: Option<String>,
    page_number_query_param: i32,
    page_size_query_param: i32,
    visited_at: u32,
}

impl From<&PageView<SearchFilmsQuery>> for SearchFilmsRow {
    fn from(event: &PageView<SearchFilmsQuery>) -> Self {
        let query = &event.query_parameters;
        Self {
            user_id: event.user_id,
            keyword_to_search_query_param: query.keyword_to_search.clone(),
            genre_query_param: query.genre.clone(),
            sort_query_param: query.sort.clone(),
            page_number_query_param: query.page_number,
            page_size_query_param: query.page_size,
            visited_at: datetime_seconds(event.visited_at),
        }
    }
}

#[derive(Debug, Row, Serialize)]
struct PageRow {
    #[serde(with = "clickhouse::serde::uuid::option")]
    user_id: Option<Uuid>,
    page_number_query_param: i32,
    page_size_query_param: i32,
    visited_at: u32,
}

impl From<&PageView<PageQuery>> for PageRow {
    fn from(event: &PageView<PageQuery>) -> Self {
        Self {
            user_id: event.user_id,
            page_number_query_param: event.query_parameters.page_number,
            page_size_query_param: event.query_parameters.page_size,
            visited_at: datetime_seconds(event.visited_at),
        }
    }
}

#[derive(Debug, Row, Serialize)]
struct GenreByIdRow {
    #[serde(with = "clickhouse::serde::uuid::option")]
    user_id: Option<Uuid>,
    #[serde(with = "clickhouse::serde::uuid")]
    genre_id_query_param: Uuid,
    visited_at: u32,
}

impl From<&PageView<GenreByIdQuery>> for GenreByIdRow {
    fn from(event: &PageView<GenreByIdQuery>) -> Self {
        Self {
            user_id: event.user_id,
            genre_id_query_param: event.query_parameters.genre_id,
            visited_at: datetime_seconds(event.visited_at),
        }
    }
}

#[derive(Debug, Row, Serialize)]
struct PersonByIdRow {
    #[serde(with = "clickhouse::serde::uuid::option")]
    user_id: Option<Uuid>,
    #[serde(with = "clickhouse::serde::uuid")]
    person_id_query_param: Uuid,
    visited_at: u32,
}

impl From<&PageView<PersonByIdQuery>> for PersonByIdRow {
    fn from(event: &PageView<PersonByIdQuery>) -> Self {
        Self {
            user_id: event.user_id,
            person_id_query_param: event.query_parameters.person_id,
            visited_at: datetime_seconds(event.visited_at),
        }
    }
}

#[derive(Debug, Row, Serialize)]
struct SearchPersonsRow {
    #[serde(with = "clickhouse::serde::uuid::option")]
    user_id: Option<Uuid>,
    keyword_to_search_query_param: String,
    page_number_query_param: i32,
    page_size_query_param: i32,
    visited_at: u32,
}

impl From<&PageView<SearchPersonsQuery>> for SearchPersonsRow {
    fn from(event: &PageView<SearchPersonsQuery>) -> Self {
        let query = &event.query_parameters;
        Self {
            user_id: event.user_id,
            keyword_to_search_query_param: query.keyword_to_search.clone(),
            page_number_query_param: query.page_number,
            page_size_query_param: query.page_size,
            visited_at: datetime_seconds(event.visited_at),
        }
    }
}

/// Converts events to rows, failing if an event is not of `kind`.
fn rows<R>(
    kind: EventKind,
    events: &[AnalyticsEvent],
    convert: impl Fn(&AnalyticsEvent) -> Option<R>,
) -> EtlResult<Vec<R>> {
    events
        .iter()
        .map(|event| {
            convert(event).ok_or_else(|| {
                etl_error!(
                    ErrorKind::InvalidState,
                    "Event does not belong to the batch kind",
                    detail = format!("{} event in a {kind} batch", event.kind())
                )
            })
        })
        .collect()
}

/// Analytics store writing each kind to its own ClickHouse table.
#[derive(Clone)]
pub struct ClickHouseStore {
    client: Client,
    /// Client without a default database, used to create it.
    root: Client,
    database: String,
}

impl std::fmt::Debug for ClickHouseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseStore")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl ClickHouseStore {
    pub fn new(config: &ClickHouseConfig) -> Self {
        let mut root = Client::default()
            .with_url(&config.url)
            .with_user(&config.user);
        if let Some(password) = &config.password {
            root = root.with_password(password.expose_secret());
        }

        let client = root.clone().with_database(&config.database);

        Self {
            client,
            root,
            database: config.database.clone(),
        }
    }

    pub async fn ping(&self) -> EtlResult<()> {
        self.root.query("SELECT 1").execute().await?;

        Ok(())
    }

    async fn insert_rows<R>(&self, kind: EventKind, rows: Vec<R>) -> EtlResult<()>
    where
        R: Row + Serialize + Send + Sync,
    {
        let mut insert = self.client.insert::<R>(kind.table_name())?;
        for row in &rows {
            insert.write(row).await?;
        }
        insert.end().await?;

        debug!(%kind, count = rows.len(), "inserted rows");

        Ok(())
    }
}

impl AnalyticsStore for ClickHouseStore {
    async fn prepare(&self) -> EtlResult<()> {
        self.root
            .query(&format!("CREATE DATABASE IF NOT EXISTS `{}`", self.database))
            .execute()
            .await?;

        for kind in EventKind::ALL {
            self.root
                .query(&create_table_sql(&self.database, kind))
                .execute()
                .await?;
        }

        info!(database = %self.database, tables = EventKind::ALL.len(), "analytics tables ready");

        Ok(())
    }

    async fn insert(&self, kind: EventKind, events: &[AnalyticsEvent]) -> EtlResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        match kind {
            EventKind::VideoQualityChange => {
                let rows = rows(kind, events, |event| match event {
                    AnalyticsEvent::VideoQualityChange(event) => {
                        Some(QualityChangeRow::from(event))
                    }
                    _ => None,
                })?;
                self.insert_rows(kind, rows).await
            }
            EventKind::VideoPause => {
                let rows = rows(kind, events, |event| match event {
                    AnalyticsEvent::VideoPause(event) => Some(PauseRow::from(event)),
                    _ => None,
                })?;
                self.insert_rows(kind, rows).await
            }
            EventKind::VideoFullView => {
                let rows = rows(kind, events, |event| match event {
                    AnalyticsEvent::VideoFullView(event) => Some(FullViewRow::from(event)),
                    _ => None,
                })?;
                self.insert_rows(kind, rows).await
            }
            EventKind::GetFilms => {
                let rows = rows(kind, events, |event| match event {
                    AnalyticsEvent::GetFilms(event) => Some(FilmsRow::from(event)),
                    _ => None,
                })?;
                self.insert_rows(kind, rows).await
            }
            EventKind::GetFilmById => {
                let rows = rows(kind, events, |event| match event {
                    AnalyticsEvent::GetFilmById(event) => Some(FilmByIdRow::from(event)),
                    _ => None,
                })?;
                self.insert_rows(kind, rows).await
            }
            EventKind::SearchFilms => {
                let rows = rows(kind, events, |event| match event {
                    AnalyticsEvent::SearchFilms(event) => Some(SearchFilmsRow::from(event)),
                    _ => None,
                })?;
                self.insert_rows(kind, rows).await
            }
            EventKind::GetGenres => {
                let rows = rows(kind, events, |event| match event {
                    AnalyticsEvent::GetGenres(event) => Some(PageRow::from(event)),
                    _ => None,
                })?;
                self.insert_rows(kind, rows).await
            }
            EventKind::GetGenreById => {
                let rows = rows(kind, events, |event| match event {
                    AnalyticsEvent::GetGenreById(event) => Some(GenreByIdRow::from(event)),
                    _ => None,
                })?;
                self.insert_rows(kind, rows).await
            }
            EventKind::GetPersonById => {
                let rows = rows(kind, events, |event| match event {
                    AnalyticsEvent::GetPersonById(event) => Some(PersonByIdRow::from(event)),
                    _ => None,
                })?;
                self.insert_rows(kind, rows).await
            }
            EventKind::SearchPersons => {
                let rows = rows(kind, events, |event| match event {
                    AnalyticsEvent::SearchPersons(event) => Some(SearchPersonsRow::from(event)),
                    _ => None,
                })?;
                self.insert_rows(kind, rows).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn column_names(kind: EventKind) -> Vec<&'static str> {
        table_columns(kind).iter().map(|(name, _)| *name).collect()
    }

    #[test]
    fn page_view_table_matches_its_rows() {
        let sql = create_table_sql("tracking_user_events", EventKind::GetFilms);

        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS `tracking_user_events`.`get_films_page_views` \
             (user_id Nullable(UUID), genre_query_param Nullable(String), \
             sort_query_param Nullable(String), page_number_query_param Int32, \
             page_size_query_param Int32, visited_at DateTime) \
             ENGINE = MergeTree() ORDER BY visited_at"
        );
    }

    #[test]
    fn click_tables_are_ordered_by_timestamp() {
        for kind in [
            EventKind::VideoQualityChange,
            EventKind::VideoPause,
            EventKind::VideoFullView,
        ] {
            let sql = create_table_sql("db", kind);
            assert!(sql.ends_with("ORDER BY timestamp"), "{sql}");
            assert!(column_names(kind).contains(&"timestamp"));
        }
    }

    #[test]
    fn every_table_records_the_user() {
        for kind in EventKind::ALL {
            assert_eq!(column_names(kind)[0], "user_id");
        }
    }

    #[test]
    fn visited_at_is_stored_in_seconds() {
        let visited_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(datetime_seconds(visited_at), 1_704_067_200);
        assert_eq!(
            datetime_seconds(Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap()),
            0
        );
    }

    #[test]
    fn mismatched_events_are_rejected() {
        let events = vec![AnalyticsEvent::VideoFullView(FullViewClick {
            user_id: None,
            timestamp: 1,
        })];

        let err = rows(EventKind::VideoPause, &events, |event| match event {
            AnalyticsEvent::VideoPause(event) => Some(PauseRow::from(event)),
            _ => None,
        })
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
