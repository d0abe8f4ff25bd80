//! Orgtree
//!
//! Materializes an organizational hierarchy stored as flat employee records
//! (each naming its manager) into per-employee hierarchy documents, and
//! serves nested hierarchy lookups from them.
//!
//! # Architecture
//!
//! - [`store`]: the document store contract, with an Elasticsearch-compatible
//!   HTTP client and an in-memory implementation
//! - [`source`]: sliced, retried streaming of the source index
//! - [`pipeline`]: the two-pass run (relationship maps, then chain resolution
//!   and bulk writes) and its [`RunReport`]
//! - [`hierarchy`]: query-time assembly of one employee's tree
//! - [`http`]: the lookup API
//!
//! Relationship maps and chain resolution live in the `orgtree-algorithms`
//! crate and carry no I/O.
//!
//! ## Example Usage
//!
//! ```rust
//! use orgtree::{MemoryStore, OrgtreeConfig, Pipeline};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! store.insert("new_people", "1", json!({ "employeeId": "1" })).await;
//! store.insert("new_people", "2", json!({ "employeeId": "2", "managerEmpId": "1" })).await;
//!
//! let pipeline = Pipeline::new(store.clone(), OrgtreeConfig::default()).unwrap();
//! let report = pipeline.run().await.unwrap();
//! assert_eq!(report.succeeded(), 2);
//!
//! let node = store.document("employee_hierarchy", "2").await.unwrap();
//! assert_eq!(node["managementChain"], json!(["1", "2"]));
//! # });
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod hierarchy;
pub mod http;
pub mod pipeline;
pub mod record;
pub mod retry;
pub mod source;
pub mod store;

// Re-export main types for convenience
pub use config::{ConfigError, ConfigResult, FieldNames, OrgtreeConfig, PipelineSettings, StoreConfig};

pub use store::{
    BulkItemOutcome, DocumentStore, MemoryStore, RemoteStore, StoreError, StoreResult,
    StoredDocument,
};

pub use record::{EmployeeRecord, HierarchyNode, RecordError};

pub use source::{ReadStats, ReadSummary, RecordSource, SourceError};

pub use pipeline::{
    BulkWriter, DataIssues, Pipeline, PipelineError, PipelineResult, RunReport, WriteSummary,
};

pub use hierarchy::{
    HierarchyAssembler, HierarchyError, HierarchyResult, HierarchyService, HierarchyView,
    LiveResolver, TreeNode,
};

pub use retry::RetryPolicy;

pub use orgtree_algorithms::{Chain, ChainOutcome, ChainResolver, RelationshipMaps};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
