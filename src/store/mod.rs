//! Document store abstraction
//!
//! The pipeline and the lookup API only see the [`DocumentStore`] trait, the
//! vendor-neutral contract they need from the backing store:
//!
//! - paged scans with a continuation cursor (optionally sliced for parallel reads)
//! - point lookups and multi-id batch fetches
//! - bulk writes with per-item outcomes
//! - exact-value term queries
//!
//! Implemented by:
//! - `RemoteStore`: Elasticsearch-compatible HTTP API
//! - `MemoryStore`: in-process, no network

pub mod memory;
pub mod remote;

pub use memory::MemoryStore;
pub use remote::RemoteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors reported by a document store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection refused, reset, DNS failure...
    #[error("Transport error: {0}")]
    Transport(String),

    /// The per-request timeout elapsed
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The store answered with something we could not interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client could not be constructed
    #[error("Client configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(_) | StoreError::Timeout(_) => true,
            StoreError::Http { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout(e.to_string())
        } else if e.is_decode() {
            StoreError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            StoreError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else if e.is_builder() {
            StoreError::Config(e.to_string())
        } else {
            StoreError::Transport(e.to_string())
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// HTTP statuses worth retrying: throttling and gateway/availability errors
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

/// A document together with its identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Store-level document id
    pub id: String,
    /// Document body
    pub source: serde_json::Value,
}

impl StoredDocument {
    pub fn new(id: impl Into<String>, source: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }
}

/// One slice of a partitioned scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSlice {
    /// Slice number, `0..max`
    pub id: usize,
    /// Total number of slices
    pub max: usize,
}

/// Parameters of one scan page request
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Maximum documents per page
    pub page_size: usize,
    /// Partition to read; `None` reads the whole index
    pub slice: Option<ScanSlice>,
    /// Continuation cursor from the previous page; `None` starts a new scan
    pub cursor: Option<String>,
}

/// One page of a scan
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub documents: Vec<StoredDocument>,
    /// Cursor for the next page; `None` once the scan is exhausted
    pub cursor: Option<String>,
}

/// Per-item failure reported by a bulk write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemError {
    /// HTTP-style status of the item
    pub status: u16,
    /// Store-provided reason
    pub reason: String,
}

impl BulkItemError {
    /// Whether the item may succeed if resubmitted
    pub fn is_retryable(&self) -> bool {
        self.status == 429
    }
}

/// Outcome of one document in a bulk write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemOutcome {
    pub id: String,
    pub result: Result<(), BulkItemError>,
}

impl BulkItemOutcome {
    pub fn success(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: Ok(()),
        }
    }

    pub fn failure(id: impl Into<String>, status: u16, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: Err(BulkItemError {
                status,
                reason: reason.into(),
            }),
        }
    }
}

/// Vendor-neutral document store interface
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one page of a (possibly sliced) full scan of `index`
    async fn scan(&self, index: &str, request: &ScanRequest) -> StoreResult<ScanPage>;

    /// Release a server-side scan cursor early; best effort
    async fn clear_scan(&self, cursor: &str) -> StoreResult<()>;

    /// Whether a continuation cursor can be re-sent after a failed request
    /// and return the same page.
    ///
    /// Scroll-style cursors advance on the server even when the response is
    /// lost, so stores must opt in.
    fn replayable_cursors(&self) -> bool {
        false
    }

    /// Point lookup; `Ok(None)` when the document does not exist
    async fn get(&self, index: &str, id: &str) -> StoreResult<Option<StoredDocument>>;

    /// Batch lookup; missing ids are silently omitted from the result
    async fn multi_get(
        &self,
        index: &str,
        ids: &[String],
    ) -> StoreResult<HashMap<String, StoredDocument>>;

    /// Index (create or overwrite) `documents` by id, reporting each item
    async fn bulk_write(
        &self,
        index: &str,
        documents: &[StoredDocument],
    ) -> StoreResult<Vec<BulkItemOutcome>>;

    /// Documents whose `field` equals `value` exactly
    async fn term_query(
        &self,
        index: &str,
        field: &str,
        value: &str,
        limit: usize,
    ) -> StoreResult<Vec<StoredDocument>>;

    /// Check that the store is reachable
    async fn ping(&self) -> StoreResult<()>;
}
