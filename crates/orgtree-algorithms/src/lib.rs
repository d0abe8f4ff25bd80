//! Relationship maps and management-chain resolution
//!
//! Pure, synchronous building blocks of the Orgtree materialization pipeline:
//!
//! - [`RelationshipMapBuilder`]: single pass over employee records producing
//!   the employee→manager map and its inverse
//! - [`ChainResolver`]: bounded, cycle-safe upward walk producing the
//!   root-first management chain of each employee

pub mod chain;
pub mod maps;

pub use chain::{Chain, ChainAudit, ChainOutcome, ChainResolver, DEFAULT_MAX_DEPTH};
pub use maps::{normalize_id, InsertOutcome, RelationshipMapBuilder, RelationshipMaps};
