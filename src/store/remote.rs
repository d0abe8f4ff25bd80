//! RemoteStore: Elasticsearch-compatible HTTP document store
//!
//! Scans use sliced scroll requests, point lookups `_doc/{id}`, batch fetches
//! `_mget`, writes the NDJSON `_bulk` endpoint.
//!
//! Scroll cursors advance on the server with every continuation request, so
//! this store keeps the default `replayable_cursors() == false`.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

use super::{
    BulkItemOutcome, DocumentStore, ScanPage, ScanRequest, StoreError, StoreResult, StoredDocument,
};
use crate::config::StoreConfig;

#[derive(Debug, Clone)]
enum Auth {
    None,
    ApiKey(String),
    Basic { username: String, password: String },
}

/// HTTP client for an Elasticsearch-compatible store
pub struct RemoteStore {
    base_url: String,
    client: Client,
    auth: Auth,
    scroll_keep_alive: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Value,
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Value>,
}

#[derive(Deserialize)]
struct MgetResponse {
    docs: Vec<GetResponse>,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<HashMap<String, BulkResponseItem>>,
}

#[derive(Deserialize)]
struct BulkResponseItem {
    #[serde(rename = "_id")]
    id: Option<String>,
    status: u16,
    error: Option<Value>,
}

fn encode(segment: &str) -> String {
    utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string()
}

/// Human-readable reason out of an error body (`{"error": {"reason": ...}}` or plain)
fn error_reason(body: &Value) -> String {
    let error = body.get("error").unwrap_or(body);
    match error {
        Value::String(s) => s.clone(),
        Value::Object(_) => {
            let kind = error.get("type").and_then(Value::as_str).unwrap_or("error");
            match error.get("reason").and_then(Value::as_str) {
                Some(reason) => format!("{}: {}", kind, reason),
                None => kind.to_string(),
            }
        }
        other => other.to_string(),
    }
}

impl RemoteStore {
    /// Create a client from store settings
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        let auth = match (&config.api_key, &config.username, &config.password) {
            (Some(key), _, _) => Auth::ApiKey(key.clone()),
            (None, Some(username), Some(password)) => Auth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            _ => Auth::None,
        };

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            auth,
            scroll_keep_alive: config.scroll_keep_alive.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.client.request(method, url);
        match &self.auth {
            Auth::None => builder,
            Auth::ApiKey(key) => builder.header("Authorization", format!("ApiKey {}", key)),
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
        }
    }

    /// Turn a non-success response into a `StoreError::Http`
    async fn check(response: Response) -> StoreResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .map(|body| error_reason(&body))
            .unwrap_or(text);
        Err(StoreError::Http {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: serde::de::DeserializeOwned>(&self, builder: RequestBuilder) -> StoreResult<T> {
        let response = Self::check(builder.send().await?).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn hits_to_documents(hits: Vec<SearchHit>) -> Vec<StoredDocument> {
        hits.into_iter()
            .map(|hit| StoredDocument::new(hit.id, hit.source))
            .collect()
    }
}

/// NDJSON body for `_bulk`: one action line and one source line per document
fn bulk_body(index: &str, documents: &[StoredDocument]) -> StoreResult<String> {
    let mut body = String::new();
    for doc in documents {
        let action = json!({ "index": { "_index": index, "_id": doc.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&doc.source)?);
        body.push('\n');
    }
    Ok(body)
}

/// Map `_bulk` response items back onto the submitted documents (same order)
fn bulk_outcomes(documents: &[StoredDocument], response: BulkResponse) -> StoreResult<Vec<BulkItemOutcome>> {
    if response.items.len() != documents.len() {
        return Err(StoreError::InvalidResponse(format!(
            "bulk response has {} items for {} documents",
            response.items.len(),
            documents.len()
        )));
    }
    let outcomes = documents
        .iter()
        .zip(response.items)
        .map(|(doc, item)| {
            let Some(item) = item.into_values().next() else {
                return BulkItemOutcome::failure(doc.id.clone(), 500, "empty bulk item");
            };
            let id = item.id.unwrap_or_else(|| doc.id.clone());
            if (200..300).contains(&item.status) && item.error.is_none() {
                return BulkItemOutcome::success(id);
            }
            let reason = item
                .error
                .map(|error| error_reason(&error))
                .unwrap_or_else(|| format!("status {}", item.status));
            BulkItemOutcome::failure(id, item.status, reason)
        })
        .collect();
    Ok(outcomes)
}

#[async_trait]
impl DocumentStore for RemoteStore {
    async fn scan(&self, index: &str, request: &ScanRequest) -> StoreResult<ScanPage> {
        let response: SearchResponse = match &request.cursor {
            None => {
                let mut body = json!({
                    "size": request.page_size,
                    "sort": ["_doc"],
                    "query": { "match_all": {} },
                });
                if let Some(slice) = request.slice.filter(|s| s.max > 1) {
                    body["slice"] = json!({ "id": slice.id, "max": slice.max });
                }
                let path = format!("{}/_search?scroll={}", encode(index), self.scroll_keep_alive);
                self.send_json(self.request(Method::POST, &path).json(&body)).await?
            }
            Some(cursor) => {
                let body = json!({ "scroll": self.scroll_keep_alive, "scroll_id": cursor });
                self.send_json(self.request(Method::POST, "_search/scroll").json(&body))
                    .await?
            }
        };

        let documents = Self::hits_to_documents(response.hits.hits);
        if documents.is_empty() {
            if let Some(scroll_id) = &response.scroll_id {
                if let Err(e) = self.clear_scan(scroll_id).await {
                    debug!("Failed to clear exhausted scroll: {}", e);
                }
            }
            return Ok(ScanPage { documents, cursor: None });
        }
        Ok(ScanPage {
            documents,
            cursor: response.scroll_id,
        })
    }

    async fn clear_scan(&self, cursor: &str) -> StoreResult<()> {
        let body = json!({ "scroll_id": [cursor] });
        let response = self
            .request(Method::DELETE, "_search/scroll")
            .json(&body)
            .send()
            .await?;
        // 404 means the cursor already expired
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn get(&self, index: &str, id: &str) -> StoreResult<Option<StoredDocument>> {
        let path = format!("{}/_doc/{}", encode(index), encode(id));
        let response = self.request(Method::GET, &path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        let doc: GetResponse = serde_json::from_slice(&response.bytes().await?)?;
        Ok(match (doc.found, doc.source) {
            (true, Some(source)) => Some(StoredDocument::new(doc.id, source)),
            _ => None,
        })
    }

    async fn multi_get(
        &self,
        index: &str,
        ids: &[String],
    ) -> StoreResult<HashMap<String, StoredDocument>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let path = format!("{}/_mget", encode(index));
        let body = json!({ "ids": ids });
        let response: MgetResponse = self
            .send_json(self.request(Method::POST, &path).json(&body))
            .await?;
        Ok(response
            .docs
            .into_iter()
            .filter_map(|doc| match (doc.found, doc.source) {
                (true, Some(source)) => Some((doc.id.clone(), StoredDocument::new(doc.id, source))),
                _ => None,
            })
            .collect())
    }

    async fn bulk_write(
        &self,
        index: &str,
        documents: &[StoredDocument],
    ) -> StoreResult<Vec<BulkItemOutcome>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let body = bulk_body(index, documents)?;
        let builder = self
            .request(Method::POST, "_bulk")
            .header("Content-Type", "application/x-ndjson")
            .body(body);
        let response: BulkResponse = self.send_json(builder).await?;
        bulk_outcomes(documents, response)
    }

    async fn term_query(
        &self,
        index: &str,
        field: &str,
        value: &str,
        limit: usize,
    ) -> StoreResult<Vec<StoredDocument>> {
        let path = format!("{}/_search", encode(index));
        let mut term = serde_json::Map::new();
        term.insert(field.to_string(), Value::String(value.to_string()));
        let body = json!({
            "size": limit,
            "query": { "term": term },
        });
        let response: SearchResponse = self
            .send_json(self.request(Method::POST, &path).json(&body))
            .await?;
        Ok(Self::hits_to_documents(response.hits.hits))
    }

    async fn ping(&self) -> StoreResult<()> {
        let response = self.request(Method::GET, "/").send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_body_is_ndjson() {
        let docs = vec![
            StoredDocument::new("1", json!({ "a": 1 })),
            StoredDocument::new("2", json!({ "a": 2 })),
        ];
        let body = bulk_body("employee_hierarchy", &docs).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(body.ends_with('\n'));
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_id"], "1");
        assert_eq!(action["index"]["_index"], "employee_hierarchy");
    }

    #[test]
    fn test_bulk_outcomes_mixed() {
        let docs = vec![
            StoredDocument::new("1", json!({})),
            StoredDocument::new("2", json!({})),
        ];
        let response: BulkResponse = serde_json::from_value(json!({
            "errors": true,
            "items": [
                { "index": { "_id": "1", "status": 200 } },
                { "index": { "_id": "2", "status": 429,
                    "error": { "type": "es_rejected_execution_exception", "reason": "queue full" } } }
            ]
        }))
        .unwrap();

        let outcomes = bulk_outcomes(&docs, response).unwrap();
        assert!(outcomes[0].result.is_ok());
        let error = outcomes[1].result.as_ref().unwrap_err();
        assert_eq!(error.status, 429);
        assert_eq!(error.reason, "es_rejected_execution_exception: queue full");
        assert!(error.is_retryable());
    }

    #[test]
    fn test_bulk_outcomes_length_mismatch() {
        let docs = vec![StoredDocument::new("1", json!({}))];
        let response: BulkResponse = serde_json::from_value(json!({ "items": [] })).unwrap();
        assert!(matches!(
            bulk_outcomes(&docs, response),
            Err(StoreError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_error_reason_shapes() {
        assert_eq!(
            error_reason(&json!({ "error": { "type": "index_not_found_exception", "reason": "no such index" } })),
            "index_not_found_exception: no such index"
        );
        assert_eq!(error_reason(&json!({ "error": "boom" })), "boom");
    }

    #[test]
    fn test_ids_are_path_encoded() {
        assert_eq!(encode("a/b c"), "a%2Fb%20c");
        assert_eq!(encode("E100"), "E100");
    }

    #[test]
    fn test_scroll_cursors_are_not_replayable() {
        let store = RemoteStore::new(&StoreConfig::default()).unwrap();
        assert!(!store.replayable_cursors());
    }

    #[test]
    fn test_auth_selection() {
        let mut config = StoreConfig::default();
        config.username = Some("elastic".into());
        config.password = Some("changeme".into());
        let store = RemoteStore::new(&config).unwrap();
        assert!(matches!(store.auth, Auth::Basic { .. }));

        config.api_key = Some("key".into());
        let store = RemoteStore::new(&config).unwrap();
        assert!(matches!(store.auth, Auth::ApiKey(_)));
    }
}
