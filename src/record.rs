//! Employee records and materialized hierarchy nodes
//!
//! [`EmployeeRecord`] is the typed view of one raw source document;
//! [`HierarchyNode`] is the denormalized document written back for every
//! employee: the original attributes plus the root-first management chain
//! and the sorted list of direct reports.

use crate::config::FieldNames;
use crate::store::StoredDocument;
use orgtree_algorithms::normalize_id;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Keys owned by the materialized node; source values under them are replaced
pub const CHAIN_FIELD: &str = "managementChain";
pub const REPORTS_FIELD: &str = "reports";

/// Record-level data errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Neither the id field nor the store id yields an identifier
    #[error("Document {document:?} has no usable {field}")]
    MissingId { document: String, field: String },

    /// The document body is not a JSON object
    #[error("Document {0:?} is not an object")]
    NotAnObject(String),
}

pub type RecordResult<T> = Result<T, RecordError>;

/// Canonical identifier text of a JSON value.
///
/// Numbers render as their decimal text so `42` and `"42"` refer to the same
/// employee; anything that is not a string or number is treated as absent.
pub fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => normalize_id(s),
        Value::Number(n) => normalize_id(&n.to_string()),
        _ => None,
    }
}

/// Display text of a JSON value; arrays are joined with ", "
pub fn display_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(display_text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        _ => None,
    }
}

/// One employee as read from the source index
#[derive(Debug, Clone, PartialEq)]
pub struct EmployeeRecord {
    /// Canonical employee identifier
    pub id: String,
    /// Canonical manager identifier; `None` for a root
    pub manager_id: Option<String>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub department: Option<String>,
    pub email: Option<String>,
    /// The full source document, copied through unchanged
    pub attributes: Map<String, Value>,
}

impl EmployeeRecord {
    /// Build a record from a store document using the configured field names.
    ///
    /// Falls back to the store id when the id field is missing or unusable.
    pub fn from_document(doc: &StoredDocument, fields: &FieldNames) -> RecordResult<Self> {
        let Value::Object(attributes) = &doc.source else {
            return Err(RecordError::NotAnObject(doc.id.clone()));
        };

        let id = attributes
            .get(&fields.id)
            .and_then(id_text)
            .or_else(|| normalize_id(&doc.id))
            .ok_or_else(|| RecordError::MissingId {
                document: doc.id.clone(),
                field: fields.id.clone(),
            })?;

        let text = |field: &str| attributes.get(field).and_then(display_text);

        Ok(Self {
            manager_id: attributes.get(&fields.manager).and_then(id_text),
            name: text(&fields.name),
            title: text(&fields.title),
            department: text(&fields.department),
            email: text(&fields.email),
            attributes: attributes.clone(),
            id,
        })
    }
}

/// Materialized hierarchy document, keyed by employee id in the target index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// Original employee attributes
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
    /// Root-first chain ending with the employee's own id
    #[serde(rename = "managementChain")]
    pub management_chain: Vec<String>,
    /// Direct reports, sorted
    pub reports: Vec<String>,
}

impl HierarchyNode {
    /// Combine a record with its resolved chain and direct reports
    pub fn materialize(record: &EmployeeRecord, chain: Vec<String>, mut reports: Vec<String>) -> Self {
        let mut attributes = record.attributes.clone();
        attributes.remove(CHAIN_FIELD);
        attributes.remove(REPORTS_FIELD);
        reports.sort_unstable();
        reports.dedup();
        Self {
            attributes,
            management_chain: chain,
            reports,
        }
    }

    /// Parse a node from a stored document
    pub fn from_document(doc: &StoredDocument) -> Result<Self, serde_json::Error> {
        serde_json::from_value(doc.source.clone())
    }

    /// Employee this node describes (last element of the chain)
    pub fn employee_id(&self) -> Option<&str> {
        self.management_chain.last().map(String::as_str)
    }

    /// Whether the employee sits at the top of its chain
    pub fn is_root(&self) -> bool {
        self.management_chain.len() <= 1
    }

    /// Display text of one of the copied attributes
    pub fn attribute_text(&self, field: &str) -> Option<String> {
        self.attributes.get(field).and_then(display_text)
    }

    /// Serialize into a store document keyed by `id`
    pub fn to_document(&self, id: &str) -> Result<StoredDocument, serde_json::Error> {
        Ok(StoredDocument::new(id, serde_json::to_value(self)?))
    }
}
