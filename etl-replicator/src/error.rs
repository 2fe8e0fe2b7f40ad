use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;

use etl::error::EtlError;

/// Result type for replicator operations.
pub type ReplicatorResult<T> = Result<T, ReplicatorError>;

/// Error type of the replicator binary.
///
/// Wraps [`EtlError`] for failures of the services it runs and adds the start up
/// failures that happen before any service exists.
#[derive(Debug)]
pub enum ReplicatorError {
    /// Search sync or event sink error.
    Etl(EtlError),
    /// Configuration, tracing or metrics setup error.
    Config(Box<dyn Error + Send + Sync>, Backtrace),
    /// Runtime construction error.
    Io(std::io::Error, Backtrace),
}

impl ReplicatorError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            ReplicatorError::Etl(_) => "service error",
            ReplicatorError::Config(_, _) => "configuration error",
            ReplicatorError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            ReplicatorError::Etl(err) => err.backtrace(),
            ReplicatorError::Config(_, backtrace) => Some(backtrace),
            ReplicatorError::Io(_, backtrace) => Some(backtrace),
        }
    }

    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ReplicatorError::Config(Box::new(err), Backtrace::capture())
    }

    /// Renders the error with its causes for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("replicator failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        let mut source = Error::source(self);
        let mut idx = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {idx}: {err}\n"));
            source = err.source();
            idx += 1;
        }

        // Etl errors already print their backtrace as part of their message.
        let prints_backtrace = !matches!(self, ReplicatorError::Etl(_));
        if let (true, Some(backtrace)) = (prints_backtrace, self.backtrace()) {
            if backtrace.status() == BacktraceStatus::Captured {
                out.push_str("backtrace:\n");
                out.push_str(&backtrace.to_string());
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
        }

        out
    }
}

impl fmt::Display for ReplicatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicatorError::Etl(err) => write!(f, "{err}"),
            ReplicatorError::Config(source, _) => write!(f, "configuration error: {source}"),
            ReplicatorError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for ReplicatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReplicatorError::Etl(err) => err.source(),
            ReplicatorError::Config(source, _) => Some(source.as_ref()),
            ReplicatorError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for ReplicatorError {
    fn from(err: std::io::Error) -> Self {
        ReplicatorError::Io(err, Backtrace::capture())
    }
}

impl From<EtlError> for ReplicatorError {
    fn from(err: EtlError) -> Self {
        ReplicatorError::Etl(err)
    }
}

#[cfg(test)]
mod tests {
    use etl::error::ErrorKind;

    use super::*;

    #[test]
    fn report_names_the_category_and_error() {
        let err = ReplicatorError::from(EtlError::from((
            ErrorKind::ConfigError,
            "Index schema file is invalid",
        )));

        let report = err.render_report();

        assert!(report.starts_with("replicator failed\n"));
        assert!(report.contains("category: service error"));
        assert!(report.contains("Index schema file is invalid"));
    }

    #[test]
    fn io_errors_are_reported_with_their_cause() {
        let err = ReplicatorError::from(std::io::Error::other("no threads left"));

        assert_eq!(err.category(), "i/o error");
        assert!(err.to_string().contains("no threads left"));
    }
}
