use etl_config::shared::ElasticsearchConfig;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::index::{BulkFailure, BulkResult, SearchIndex};
use crate::types::IndexDocument;

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Error type returned when creating an index that another writer just created.
const ALREADY_EXISTS_ERROR: &str = "resource_already_exists_exception";

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<BulkItem>,
}

/// Each bulk item is keyed by its action, `index` for upserts.
#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(alias = "create", alias = "update")]
    index: BulkItemStatus,
}

#[derive(Debug, Deserialize)]
struct BulkItemStatus {
    #[serde(rename = "_id", default)]
    id: String,
    status: u16,
    error: Option<serde_json::Value>,
}

/// Search index backed by the Elasticsearch REST api.
#[derive(Debug, Clone)]
pub struct ElasticsearchIndex {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<SecretString>,
}

impl ElasticsearchIndex {
    pub fn new(config: &ElasticsearchConfig) -> EtlResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| {
                etl_error!(
                    ErrorKind::ConfigError,
                    "Elasticsearch client could not be built",
                    err,
                    source: err
                )
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Checks that the cluster answers.
    pub async fn ping(&self) -> EtlResult<()> {
        let response = self.request(reqwest::Method::GET, "").send().await?;
        check_status(response, "Elasticsearch ping failed").await?;

        Ok(())
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{path}", self.base_url);
        let request = self.client.request(method, url);

        match &self.username {
            Some(username) => request.basic_auth(
                username,
                self.password
                    .as_ref()
                    .map(|password| password.expose_secret().to_string()),
            ),
            None => request,
        }
    }
}

impl SearchIndex for ElasticsearchIndex {
    async fn ensure_index(&self, index: &str, definition: &serde_json::Value) -> EtlResult<()> {
        let response = self.request(reqwest::Method::HEAD, index).send().await?;
        match response.status() {
            StatusCode::OK => {
                debug!(index, "search index already exists");
                return Ok(());
            }
            StatusCode::NOT_FOUND => {}
            status => {
                return Err(etl_error!(
                    ErrorKind::IndexConnectionFailed,
                    "Search index existence check failed",
                    detail = format!("HEAD {index} returned {status}")
                ));
            }
        }

        let response = self
            .request(reqwest::Method::PUT, index)
            .json(definition)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(index, "created search index");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains(ALREADY_EXISTS_ERROR) {
            debug!(index, "search index was created concurrently");
            return Ok(());
        }

        Err(etl_error!(
            ErrorKind::IndexWriteFailed,
            "Search index could not be created",
            detail = format!("PUT {index} returned {status}: {body}")
        ))
    }

    async fn upsert_all<T>(&self, index: &str, documents: &[T]) -> EtlResult<BulkResult>
    where
        T: IndexDocument,
    {
        if documents.is_empty() {
            return Ok(BulkResult::default());
        }

        let body = bulk_body(index, documents)?;
        let response = self
            .request(reqwest::Method::POST, "_bulk")
            .header(reqwest::header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        let response = check_status(response, "Bulk request was rejected").await?;
        let response: BulkResponse = response.json().await?;

        let sent_ids: Vec<Uuid> = documents.iter().map(|document| document.document_id()).collect();
        let result = bulk_result(response, &sent_ids);
        if !result.failures.is_empty() {
            warn!(
                index,
                indexed = result.indexed,
                failed = result.failures.len(),
                "bulk request partially failed"
            );
        }

        Ok(result)
    }
}

/// Builds the newline delimited bulk body, one `index` action per document.
fn bulk_body<T>(index: &str, documents: &[T]) -> EtlResult<String>
where
    T: IndexDocument,
{
    let mut body = String::new();

    for document in documents {
        let action = json!({ "index": { "_index": index, "_id": document.document_id() } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(document)?);
        body.push('\n');
    }

    Ok(body)
}

/// Collects per document outcomes. Items answer the sent documents in order, so documents past
/// the last item were never acknowledged and count as failed.
fn bulk_result(response: BulkResponse, sent_ids: &[Uuid]) -> BulkResult {
    let mut result = BulkResult::default();
    let answered = response.items.len();

    for item in response.items {
        let item = item.index;
        match item.error {
            Some(error) => result.failures.push(BulkFailure {
                document_id: item.id,
                status: item.status,
                reason: error_reason(&error),
            }),
            None if (200..300).contains(&item.status) => result.indexed += 1,
            None => result.failures.push(BulkFailure {
                document_id: item.id,
                status: item.status,
                reason: "unexpected status".to_string(),
            }),
        }
    }

    for id in sent_ids.iter().skip(answered) {
        result.failures.push(BulkFailure {
            document_id: id.to_string(),
            status: 0,
            reason: "missing from bulk response".to_string(),
        });
    }

    if response.errors && result.failures.is_empty() {
        result.failures.push(BulkFailure {
            document_id: String::new(),
            status: 0,
            reason: "bulk response flagged errors without failed items".to_string(),
        });
    }

    result
}

fn error_reason(error: &serde_json::Value) -> String {
    let kind = error["type"].as_str().unwrap_or("unknown");
    match error["reason"].as_str() {
        Some(reason) => format!("{kind}: {reason}"),
        None => kind.to_string(),
    }
}

async fn check_status(response: Response, description: &'static str) -> EtlResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let kind = if status.is_server_error() {
        ErrorKind::IndexConnectionFailed
    } else {
        ErrorKind::IndexWriteFailed
    };

    Err(etl_error!(kind, description, detail = format!("{status}: {body}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenreDocument;

    #[test]
    fn bulk_body_pairs_actions_with_documents() {
        let id = Uuid::new_v4();
        let documents = vec![GenreDocument {
            id,
            name: "Drama".to_string(),
            description: None,
        }];

        let body = bulk_body("genres", &documents).unwrap();
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(body.ends_with('\n'));
        let action: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "genres");
        assert_eq!(action["index"]["_id"], id.to_string());
        let document: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(document["name"], "Drama");
    }

    #[test]
    fn item_errors_become_failures() {
        let response: BulkResponse = serde_json::from_value(json!({
            "took": 3,
            "errors": true,
            "items": [
                { "index": { "_id": "a", "status": 201, "result": "created" } },
                { "index": { "_id": "b", "status": 200, "result": "updated" } },
                { "index": { "_id": "c", "status": 400, "error": {
                    "type": "strict_dynamic_mapping_exception",
                    "reason": "mapping set to strict"
                } } }
            ]
        }))
        .unwrap();

        let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let result = bulk_result(response, &ids);

        assert_eq!(result.indexed, 2);
        assert_eq!(
            result.failures,
            vec![BulkFailure {
                document_id: "c".to_string(),
                status: 400,
                reason: "strict_dynamic_mapping_exception: mapping set to strict".to_string(),
            }]
        );
    }

    #[test]
    fn flagged_response_without_failed_items_is_not_success() {
        let response: BulkResponse =
            serde_json::from_value(json!({ "errors": true, "items": [] })).unwrap();

        assert_eq!(bulk_result(response, &[]).failures.len(), 1);
    }

    #[test]
    fn unanswered_documents_are_failures() {
        let response: BulkResponse = serde_json::from_value(json!({
            "errors": false,
            "items": [
                { "index": { "_id": "a", "status": 201, "result": "created" } }
            ]
        }))
        .unwrap();
        let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

        let result = bulk_result(response, &ids);

        assert_eq!(result.indexed, 1);
        let missing: Vec<&str> = result
            .failures
            .iter()
            .map(|failure| failure.document_id.as_str())
            .collect();
        assert_eq!(missing, vec![ids[1].to_string(), ids[2].to_string()]);
        assert!(result.clone().into_result("movies").is_err());

        let empty: BulkResponse =
            serde_json::from_value(json!({ "errors": false, "items": [] })).unwrap();
        assert_eq!(bulk_result(empty, &ids).failures.len(), 3);
    }
}
