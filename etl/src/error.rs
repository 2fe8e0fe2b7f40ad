//! Error types shared by the search sync and the event sink.
//!
//! [`EtlError`] carries an [`ErrorKind`] used for retry decisions, a static description,
//! optional dynamic detail, the callsite and a backtrace. Failures of independent units of
//! work, e.g. the streams of one sync tick, can be aggregated into a single error.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Result type of fallible sync and sink operations.
pub type EtlResult<T> = Result<T, EtlError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Error type of the crate.
#[derive(Debug, Clone)]
pub struct EtlError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Errors of independent operations that failed together.
    Many {
        errors: Vec<EtlError>,
        location: &'static Location<'static>,
    },
}

/// Category of an [`EtlError`].
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Catalog database
    SourceConnectionFailed,
    SourceQueryFailed,

    // Search index
    IndexConnectionFailed,
    IndexWriteFailed,
    /// The bulk request went through but some documents were rejected.
    PartialBulkFailure,

    // Analytics
    AnalyticsConnectionFailed,
    AnalyticsWriteFailed,
    EventSourceFailed,
    MalformedEvent,

    // Cursors
    CursorStoreFailed,

    // Configuration
    ConfigError,

    // IO & serialization
    IoError,
    SerializationError,
    DeserializationError,

    // State
    InvalidState,

    Unknown,
}

impl ErrorKind {
    /// Returns `true` for failures that may succeed when the same operation is retried later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::SourceConnectionFailed
                | ErrorKind::IndexConnectionFailed
                | ErrorKind::AnalyticsConnectionFailed
                | ErrorKind::EventSourceFailed
                | ErrorKind::IoError
        )
    }
}

impl EtlError {
    /// Returns the kind of the error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.kind,
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns the kinds of all contained errors, flattened.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match &self.repr {
            ErrorRepr::Single(payload) => vec![payload.kind],
            ErrorRepr::Many { errors, .. } => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    /// Returns `true` when every contained error is transient.
    pub fn is_transient(&self) -> bool {
        let kinds = self.kinds();
        !kinds.is_empty() && kinds.iter().all(ErrorKind::is_transient)
    }

    /// Returns the detail of the error, or the first available one of an aggregate.
    pub fn detail(&self) -> Option<&str> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.detail.as_deref(),
            ErrorRepr::Many { errors, .. } => errors.iter().find_map(|err| err.detail()),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match &self.repr {
            ErrorRepr::Single(payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches the originating error. No-op on aggregates, which expose their first error instead.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(payload) = &mut self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        EtlError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }

    #[track_caller]
    fn from_source<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        EtlError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl PartialEq for EtlError {
    fn eq(&self, other: &EtlError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Hash for EtlError {
    /// Hashes kind and description only, so repeated occurrences of one failure group together.
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);
        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_block(f, "Detail", detail)?;
                }

                if payload.backtrace.status() == BacktraceStatus::Captured {
                    write_block(f, "Backtrace", &payload.backtrace.to_string())?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    errors.len(),
                    if errors.len() == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

/// Writes an indented, titled block below the error headline.
fn write_block(f: &mut fmt::Formatter<'_>, title: &str, body: &str) -> fmt::Result {
    if body.trim().is_empty() {
        return write!(f, "\n  {title}: <empty>");
    }

    write!(f, "\n  {title}:")?;
    for line in body.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

impl error::Error for EtlError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for EtlError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for EtlError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned as is.
impl<E> From<Vec<E>> for EtlError
where
    E: Into<EtlError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> EtlError {
        let location = Location::caller();
        let mut errors: Vec<EtlError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            return errors.remove(0);
        }

        EtlError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for EtlError {
    #[track_caller]
    fn from(err: std::io::Error) -> EtlError {
        EtlError::from_source(ErrorKind::IoError, "I/O operation failed", err)
    }
}

/// Maps syntax and data errors to [`ErrorKind::DeserializationError`].
impl From<serde_json::Error> for EtlError {
    #[track_caller]
    fn from(err: serde_json::Error) -> EtlError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        EtlError::from_source(kind, description, err)
    }
}

impl From<std::str::Utf8Error> for EtlError {
    #[track_caller]
    fn from(err: std::str::Utf8Error) -> EtlError {
        EtlError::from_source(
            ErrorKind::DeserializationError,
            "UTF-8 conversion failed",
            err,
        )
    }
}

impl From<uuid::Error> for EtlError {
    #[track_caller]
    fn from(err: uuid::Error) -> EtlError {
        EtlError::from_source(ErrorKind::DeserializationError, "UUID parsing failed", err)
    }
}

impl From<chrono::ParseError> for EtlError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> EtlError {
        EtlError::from_source(
            ErrorKind::DeserializationError,
            "Timestamp parsing failed",
            err,
        )
    }
}

impl From<sqlx::Error> for EtlError {
    #[track_caller]
    fn from(err: sqlx::Error) -> EtlError {
        let kind = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut => ErrorKind::SourceConnectionFailed,
            _ => ErrorKind::SourceQueryFailed,
        };

        EtlError::from_source(kind, "Catalog database operation failed", err)
    }
}

impl From<reqwest::Error> for EtlError {
    #[track_caller]
    fn from(err: reqwest::Error) -> EtlError {
        let kind = if err.is_connect() || err.is_timeout() {
            ErrorKind::IndexConnectionFailed
        } else if err.is_decode() {
            ErrorKind::DeserializationError
        } else {
            ErrorKind::IndexWriteFailed
        };

        EtlError::from_source(kind, "Search index request failed", err)
    }
}

impl From<rdkafka::error::KafkaError> for EtlError {
    #[track_caller]
    fn from(err: rdkafka::error::KafkaError) -> EtlError {
        EtlError::from_source(ErrorKind::EventSourceFailed, "Kafka operation failed", err)
    }
}

impl From<clickhouse::error::Error> for EtlError {
    #[track_caller]
    fn from(err: clickhouse::error::Error) -> EtlError {
        let kind = match &err {
            clickhouse::error::Error::Network(_) => ErrorKind::AnalyticsConnectionFailed,
            _ => ErrorKind::AnalyticsWriteFailed,
        };

        EtlError::from_source(kind, "ClickHouse operation failed", err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;
    use crate::etl_error;

    #[test]
    fn single_error_keeps_kind_detail_and_location() {
        let err = etl_error!(
            ErrorKind::CursorStoreFailed,
            "Cursor write failed",
            "disk full"
        );

        assert_eq!(err.kind(), ErrorKind::CursorStoreFailed);
        assert_eq!(err.detail(), Some("disk full"));
        assert!(err.location().file().ends_with("error.rs"));

        let rendered = err.to_string();
        assert!(rendered.starts_with("[CursorStoreFailed] Cursor write failed @ "));
        assert!(rendered.contains("Detail:\n    disk full"));
    }

    #[test]
    fn vec_of_one_error_is_unwrapped() {
        let err: EtlError = vec![etl_error!(ErrorKind::IndexWriteFailed, "Bulk failed")].into();

        assert_eq!(err.kinds(), vec![ErrorKind::IndexWriteFailed]);
        assert!(err.backtrace().is_some());
    }

    #[test]
    fn aggregate_reports_all_kinds() {
        let err: EtlError = vec![
            etl_error!(ErrorKind::SourceConnectionFailed, "Connect failed"),
            etl_error!(ErrorKind::PartialBulkFailure, "Some documents rejected"),
        ]
        .into();

        assert_eq!(
            err.kinds(),
            vec![
                ErrorKind::SourceConnectionFailed,
                ErrorKind::PartialBulkFailure
            ]
        );
        assert_eq!(err.kind(), ErrorKind::SourceConnectionFailed);
        assert!(err.to_string().starts_with("[Many] 2 errors aggregated"));
        assert!(!err.is_transient());
        assert!(err.source().is_some());
    }

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(etl_error!(ErrorKind::IndexConnectionFailed, "Unreachable").is_transient());
        assert!(!etl_error!(ErrorKind::MalformedEvent, "Bad payload").is_transient());
    }

    #[test]
    fn json_errors_map_to_deserialization() {
        let err: EtlError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();

        assert_eq!(err.kind(), ErrorKind::DeserializationError);
        assert!(err.source().is_some());
    }

    #[test]
    fn equality_ignores_detail() {
        let a = etl_error!(ErrorKind::InvalidState, "Bad state", "a");
        let b = etl_error!(ErrorKind::InvalidState, "Other", "b");

        assert_eq!(a, b);
    }
}
