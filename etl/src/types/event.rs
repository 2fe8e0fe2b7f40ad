use std::fmt;

use chrono::{DateTime, Utc};
use etl_config::shared::parse_timestamp;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;

const QUALITY_CHANGES_TOPIC: &str = "tracking.clicks_on_video.quality_changes";
const PAUSES_TOPIC: &str = "tracking.clicks_on_video.pauses";
const FULL_VIEWS_TOPIC: &str = "tracking.clicks_on_video.full_views";
const FILMS_TOPIC: &str = "tracking.async_api.films";
const GENRES_TOPIC: &str = "tracking.async_api.genres";
const PERSONS_TOPIC: &str = "tracking.async_api.persons";

/// Format producers use for `visited_at`.
const VISITED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Tracked user action. Each kind has its own topic and routing key pair and its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    VideoQualityChange,
    VideoPause,
    VideoFullView,
    GetFilms,
    GetFilmById,
    SearchFilms,
    GetGenres,
    GetGenreById,
    GetPersonById,
    SearchPersons,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::VideoQualityChange,
        EventKind::VideoPause,
        EventKind::VideoFullView,
        EventKind::GetFilms,
        EventKind::GetFilmById,
        EventKind::SearchFilms,
        EventKind::GetGenres,
        EventKind::GetGenreById,
        EventKind::GetPersonById,
        EventKind::SearchPersons,
    ];

    pub fn topic(&self) -> &'static str {
        match self {
            EventKind::VideoQualityChange => QUALITY_CHANGES_TOPIC,
            EventKind::VideoPause => PAUSES_TOPIC,
            EventKind::VideoFullView => FULL_VIEWS_TOPIC,
            EventKind::GetFilms | EventKind::GetFilmById | EventKind::SearchFilms => FILMS_TOPIC,
            EventKind::GetGenres | EventKind::GetGenreById => GENRES_TOPIC,
            EventKind::GetPersonById | EventKind::SearchPersons => PERSONS_TOPIC,
        }
    }

    /// Message key distinguishing kinds sharing a topic. Click topics carry one kind each.
    pub fn routing_key(&self) -> Option<&'static str> {
        match self {
            EventKind::VideoQualityChange | EventKind::VideoPause | EventKind::VideoFullView => {
                None
            }
            EventKind::GetFilms => Some("get_films"),
            EventKind::GetFilmById => Some("get_film_by_id"),
            EventKind::SearchFilms => Some("search_films_by_keyword"),
            EventKind::GetGenres => Some("get_genres"),
            EventKind::GetGenreById => Some("get_genre_by_id"),
            EventKind::GetPersonById => Some("get_person_by_id"),
            EventKind::SearchPersons => Some("search_persons_by_keyword"),
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            EventKind::VideoQualityChange => "video_quality_change_clicks",
            EventKind::VideoPause => "clicks_on_video_pauses",
            EventKind::VideoFullView => "clicks_on_video_full_views",
            EventKind::GetFilms => "get_films_page_views",
            EventKind::GetFilmById => "get_film_by_id_page_views",
            EventKind::SearchFilms => "search_films_by_keyword_page_views",
            EventKind::GetGenres => "get_genres_page_views",
            EventKind::GetGenreById => "get_genre_by_id_page_views",
            EventKind::GetPersonById => "get_person_by_id_page_views",
            EventKind::SearchPersons => "search_persons_by_keyword_page_views",
        }
    }

    /// Maps a message's topic and key to its kind. The key is ignored on click topics.
    pub fn resolve(topic: &str, key: Option<&str>) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|kind| {
            kind.topic() == topic
                && match kind.routing_key() {
                    None => true,
                    Some(routing_key) => key == Some(routing_key),
                }
        })
    }

    /// Distinct topics to subscribe to.
    pub fn topics() -> Vec<&'static str> {
        let mut topics: Vec<&'static str> =
            EventKind::ALL.iter().map(|kind| kind.topic()).collect();
        topics.dedup();
        topics
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityChangeClick {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub quality_before: String,
    pub quality_after: String,
    /// Playback position in seconds.
    pub changed_at: f32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseClick {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub pause_at: f32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullViewClick {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub timestamp: i64,
}

/// A page view of the catalog API with the query parameters of the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageView<Q> {
    /// `None` for anonymous visitors.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub query_parameters: Q,
    #[serde(deserialize_with = "deserialize_visited_at")]
    pub visited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmsQuery {
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    pub page_number: i32,
    pub page_size: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmByIdQuery {
    pub film_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFilmsQuery {
    pub keyword_to_search: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    pub page_number: i32,
    pub page_size: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageQuery {
    pub page_number: i32,
    pub page_size: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenreByIdQuery {
    pub genre_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonByIdQuery {
    pub person_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPersonsQuery {
    pub keyword_to_search: String,
    pub page_number: i32,
    pub page_size: i32,
}

/// A decoded analytics event.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsEvent {
    VideoQualityChange(QualityChangeClick),
    VideoPause(PauseClick),
    VideoFullView(FullViewClick),
    GetFilms(PageView<FilmsQuery>),
    GetFilmById(PageView<FilmByIdQuery>),
    SearchFilms(PageView<SearchFilmsQuery>),
    GetGenres(PageView<PageQuery>),
    GetGenreById(PageView<GenreByIdQuery>),
    GetPersonById(PageView<PersonByIdQuery>),
    SearchPersons(PageView<SearchPersonsQuery>),
}

impl AnalyticsEvent {
    /// Decodes a json payload of the given kind.
    pub fn decode(kind: EventKind, payload: &[u8]) -> EtlResult<AnalyticsEvent> {
        let decoded = match kind {
            EventKind::VideoQualityChange => {
                serde_json::from_slice(payload).map(AnalyticsEvent::VideoQualityChange)
            }
            EventKind::VideoPause => {
                serde_json::from_slice(payload).map(AnalyticsEvent::VideoPause)
            }
            EventKind::VideoFullView => {
                serde_json::from_slice(payload).map(AnalyticsEvent::VideoFullView)
            }
            EventKind::GetFilms => serde_json::from_slice(payload).map(AnalyticsEvent::GetFilms),
            EventKind::GetFilmById => {
                serde_json::from_slice(payload).map(AnalyticsEvent::GetFilmById)
            }
            EventKind::SearchFilms => {
                serde_json::from_slice(payload).map(AnalyticsEvent::SearchFilms)
            }
            EventKind::GetGenres => serde_json::from_slice(payload).map(AnalyticsEvent::GetGenres),
            EventKind::GetGenreById => {
                serde_json::from_slice(payload).map(AnalyticsEvent::GetGenreById)
            }
            EventKind::GetPersonById => {
                serde_json::from_slice(payload).map(AnalyticsEvent::GetPersonById)
            }
            EventKind::SearchPersons => {
                serde_json::from_slice(payload).map(AnalyticsEvent::SearchPersons)
            }
        };

        decoded.map_err(|err| {
            etl_error!(
                ErrorKind::MalformedEvent,
                "Event payload could not be decoded",
                detail = format!("{kind}: {err}"),
                source: err
            )
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            AnalyticsEvent::VideoQualityChange(_) => EventKind::VideoQualityChange,
            AnalyticsEvent::VideoPause(_) => EventKind::VideoPause,
            AnalyticsEvent::VideoFullView(_) => EventKind::VideoFullView,
            AnalyticsEvent::GetFilms(_) => EventKind::GetFilms,
            AnalyticsEvent::GetFilmById(_) => EventKind::GetFilmById,
            AnalyticsEvent::SearchFilms(_) => EventKind::SearchFilms,
            AnalyticsEvent::GetGenres(_) => EventKind::GetGenres,
            AnalyticsEvent::GetGenreById(_) => EventKind::GetGenreById,
            AnalyticsEvent::GetPersonById(_) => EventKind::GetPersonById,
            AnalyticsEvent::SearchPersons(_) => EventKind::SearchPersons,
        }
    }

    /// The acting user, `None` when anonymous.
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            AnalyticsEvent::VideoQualityChange(event) => event.user_id,
            AnalyticsEvent::VideoPause(event) => event.user_id,
            AnalyticsEvent::VideoFullView(event) => event.user_id,
            AnalyticsEvent::GetFilms(event) => event.user_id,
            AnalyticsEvent::GetFilmById(event) => event.user_id,
            AnalyticsEvent::SearchFilms(event) => event.user_id,
            AnalyticsEvent::GetGenres(event) => event.user_id,
            AnalyticsEvent::GetGenreById(event) => event.user_id,
            AnalyticsEvent::GetPersonById(event) => event.user_id,
            AnalyticsEvent::SearchPersons(event) => event.user_id,
        }
    }
}

fn deserialize_visited_at<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;

    DateTime::parse_from_str(&value, VISITED_AT_FORMAT)
        .map(|parsed| parsed.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_timestamp(&value))
        .ok_or_else(|| serde::de::Error::custom(format!("invalid visited_at `{value}`")))
}
