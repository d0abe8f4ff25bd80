//! MemoryStore: in-process document store
//!
//! Mirrors the semantics of the remote store closely enough for the pipeline
//! and the lookup API to run against it unchanged: keyset-paged scans with
//! cursors, hash-partitioned slices, per-item bulk outcomes and exact-value
//! term queries.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use tokio::sync::RwLock;

use super::{
    BulkItemOutcome, DocumentStore, ScanPage, ScanRequest, ScanSlice, StoreResult, StoredDocument,
};

type Index = BTreeMap<String, Value>;

/// In-memory store keyed by index name, then document id
#[derive(Debug, Default)]
pub struct MemoryStore {
    indices: RwLock<HashMap<String, Index>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite one document
    pub async fn insert(&self, index: &str, id: impl Into<String>, source: Value) {
        let mut indices = self.indices.write().await;
        indices
            .entry(index.to_string())
            .or_default()
            .insert(id.into(), source);
    }

    /// Read one document body
    pub async fn document(&self, index: &str, id: &str) -> Option<Value> {
        let indices = self.indices.read().await;
        indices.get(index).and_then(|docs| docs.get(id)).cloned()
    }

    /// Snapshot of an index, ordered by id
    pub async fn documents(&self, index: &str) -> BTreeMap<String, Value> {
        let indices = self.indices.read().await;
        indices.get(index).cloned().unwrap_or_default()
    }

    /// Number of documents in an index
    pub async fn len(&self, index: &str) -> usize {
        let indices = self.indices.read().await;
        indices.get(index).map_or(0, BTreeMap::len)
    }

    /// Remove one document, returning its body
    pub async fn remove(&self, index: &str, id: &str) -> Option<Value> {
        let mut indices = self.indices.write().await;
        indices.get_mut(index).and_then(|docs| docs.remove(id))
    }
}

/// Stable slice assignment (FNV-1a), independent of process or platform
fn slice_of(id: &str, max: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % max.max(1) as u64) as usize
}

fn in_slice(id: &str, slice: Option<ScanSlice>) -> bool {
    match slice {
        Some(slice) if slice.max > 1 => slice_of(id, slice.max) == slice.id,
        _ => true,
    }
}

/// Field value rendered the way ids are compared in term queries
fn term_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn scan(&self, index: &str, request: &ScanRequest) -> StoreResult<ScanPage> {
        let indices = self.indices.read().await;
        let Some(docs) = indices.get(index) else {
            return Ok(ScanPage::default());
        };

        let lower = match &request.cursor {
            Some(after) => Bound::Excluded(after.clone()),
            None => Bound::Unbounded,
        };
        let page_size = request.page_size.max(1);
        let documents: Vec<StoredDocument> = docs
            .range((lower, Bound::Unbounded))
            .filter(|(id, _)| in_slice(id, request.slice))
            .take(page_size)
            .map(|(id, source)| StoredDocument::new(id.clone(), source.clone()))
            .collect();

        // Keyset cursor: the last id handed out
        let cursor = if documents.len() < page_size {
            None
        } else {
            documents.last().map(|doc| doc.id.clone())
        };
        Ok(ScanPage { documents, cursor })
    }

    async fn clear_scan(&self, _cursor: &str) -> StoreResult<()> {
        // Keyset cursors hold no server-side state
        Ok(())
    }

    fn replayable_cursors(&self) -> bool {
        true
    }

    async fn get(&self, index: &str, id: &str) -> StoreResult<Option<StoredDocument>> {
        Ok(self
            .document(index, id)
            .await
            .map(|source| StoredDocument::new(id, source)))
    }

    async fn multi_get(
        &self,
        index: &str,
        ids: &[String],
    ) -> StoreResult<HashMap<String, StoredDocument>> {
        let indices = self.indices.read().await;
        let Some(docs) = indices.get(index) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                docs.get(id)
                    .map(|source| (id.clone(), StoredDocument::new(id.clone(), source.clone())))
            })
            .collect())
    }

    async fn bulk_write(
        &self,
        index: &str,
        documents: &[StoredDocument],
    ) -> StoreResult<Vec<BulkItemOutcome>> {
        let mut indices = self.indices.write().await;
        let docs = indices.entry(index.to_string()).or_default();
        let outcomes = documents
            .iter()
            .map(|doc| {
                if !doc.source.is_object() {
                    return BulkItemOutcome::failure(
                        doc.id.clone(),
                        400,
                        "mapper_parsing_exception: document body must be an object",
                    );
                }
                docs.insert(doc.id.clone(), doc.source.clone());
                BulkItemOutcome::success(doc.id.clone())
            })
            .collect();
        Ok(outcomes)
    }

    async fn term_query(
        &self,
        index: &str,
        field: &str,
        value: &str,
        limit: usize,
    ) -> StoreResult<Vec<StoredDocument>> {
        let indices = self.indices.read().await;
        let Some(docs) = indices.get(index) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, source)| {
                source
                    .get(field)
                    .and_then(term_text)
                    .is_some_and(|text| text == value)
            })
            .take(limit)
            .map(|(id, source)| StoredDocument::new(id.clone(), source.clone()))
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded(count: usize) -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0..count {
            store
                .insert("people", format!("{:04}", i), json!({ "employeeId": format!("{:04}", i) }))
                .await;
        }
        store
    }

    async fn scan_all(store: &MemoryStore, slice: Option<ScanSlice>, page_size: usize) -> Vec<String> {
        let mut ids = Vec::new();
        let mut cursor = None;
        loop {
            let request = ScanRequest { page_size, slice, cursor: cursor.clone() };
            let page = store.scan("people", &request).await.unwrap();
            ids.extend(page.documents.into_iter().map(|d| d.id));
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        ids
    }

    #[tokio::test]
    async fn test_paged_scan_covers_index() {
        let store = seeded(25).await;
        let ids = scan_all(&store, None, 10).await;
        assert_eq!(ids.len(), 25);
        assert_eq!(ids.first().map(String::as_str), Some("0000"));
    }

    #[tokio::test]
    async fn test_exact_multiple_of_page_size() {
        let store = seeded(20).await;
        assert_eq!(scan_all(&store, None, 10).await.len(), 20);
    }

    #[tokio::test]
    async fn test_slices_partition_index() {
        let store = seeded(100).await;
        let mut all = Vec::new();
        for id in 0..3 {
            all.extend(scan_all(&store, Some(ScanSlice { id, max: 3 }), 7).await);
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 100);
    }

    #[tokio::test]
    async fn test_multi_get_omits_missing() {
        let store = seeded(3).await;
        let ids = vec!["0001".to_string(), "9999".to_string()];
        let found = store.multi_get("people", &ids).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("0001"));
    }

    #[tokio::test]
    async fn test_bulk_write_reports_per_item() {
        let store = MemoryStore::new();
        let docs = vec![
            StoredDocument::new("a", json!({ "x": 1 })),
            StoredDocument::new("b", json!("not an object")),
        ];
        let outcomes = store.bulk_write("nodes", &docs).await.unwrap();
        assert!(outcomes[0].result.is_ok());
        assert_eq!(outcomes[1].result.as_ref().unwrap_err().status, 400);
        assert_eq!(store.len("nodes").await, 1);
    }

    #[tokio::test]
    async fn test_term_query_matches_numbers_and_strings() {
        let store = MemoryStore::new();
        store.insert("people", "1", json!({ "managerEmpId": 7 })).await;
        store.insert("people", "2", json!({ "managerEmpId": "7" })).await;
        store.insert("people", "3", json!({ "managerEmpId": "8" })).await;
        let hits = store.term_query("people", "managerEmpId", "7", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}
