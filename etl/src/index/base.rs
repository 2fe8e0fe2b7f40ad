use std::future::Future;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::types::IndexDocument;

/// A document the index refused in a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub document_id: String,
    pub status: u16,
    pub reason: String,
}

/// Per document outcome of a bulk upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResult {
    pub indexed: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkResult {
    /// Turns any document failure into a [`ErrorKind::PartialBulkFailure`] error.
    ///
    /// Returns the number of indexed documents when every document was accepted.
    pub fn into_result(self, index: &str) -> EtlResult<usize> {
        if self.failures.is_empty() {
            return Ok(self.indexed);
        }

        let samples: Vec<String> = self
            .failures
            .iter()
            .take(5)
            .map(|failure| {
                format!("{} ({}): {}", failure.document_id, failure.status, failure.reason)
            })
            .collect();

        Err(etl_error!(
            ErrorKind::PartialBulkFailure,
            "Search index rejected part of a bulk request",
            detail = format!(
                "{} of {} documents failed in index `{index}`: {}",
                self.failures.len(),
                self.indexed + self.failures.len(),
                samples.join("; ")
            )
        ))
    }
}

/// A search engine holding one document per id in each named index.
pub trait SearchIndex {
    /// Creates `index` from `definition` (`{settings, mappings}`) unless it already exists.
    ///
    /// Existing indices are left untouched.
    fn ensure_index(
        &self,
        index: &str,
        definition: &serde_json::Value,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Writes `documents` into `index`, replacing documents with the same id.
    ///
    /// Rejected documents are reported in the returned [`BulkResult`], not as an error.
    fn upsert_all<T>(
        &self,
        index: &str,
        documents: &[T],
    ) -> impl Future<Output = EtlResult<BulkResult>> + Send
    where
        T: IndexDocument;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_never_success() {
        let result = BulkResult {
            indexed: 2,
            failures: vec![BulkFailure {
                document_id: "42".to_string(),
                status: 400,
                reason: "mapper_parsing_exception".to_string(),
            }],
        };

        let err = result.into_result("movies").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PartialBulkFailure);
        assert!(err.detail().unwrap().contains("1 of 3 documents"));
    }

    #[test]
    fn clean_result_returns_the_count() {
        let result = BulkResult {
            indexed: 3,
            failures: vec![],
        };

        assert_eq!(result.into_result("movies").unwrap(), 3);
    }
}
