//! Run reports

use crate::source::ReadSummary;
use chrono::{DateTime, Utc};
use orgtree_algorithms::ChainAudit;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A document that could not be turned into an employee record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidRecord {
    /// Store id of the offending document
    pub document: String,
    pub reason: String,
}

/// An employee whose manager is not a known employee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingReference {
    pub employee: String,
    pub missing_manager: String,
}

/// A node the store refused to persist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDocument {
    pub id: String,
    /// Item status, or `None` when the whole batch failed in transport
    pub status: Option<u16>,
    pub reason: String,
}

/// Problems in the source data. None of these stop a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataIssues {
    /// Employees whose chain walk revisited an identifier
    pub cycles: Vec<String>,
    /// Employees whose chain was cut at the depth bound
    pub depth_exceeded: Vec<String>,
    pub dangling_references: Vec<DanglingReference>,
    pub invalid_records: Vec<InvalidRecord>,
    /// Source documents repeating an employee id already seen
    pub duplicate_records: usize,
    /// Employees first seen during the materialization pass
    pub late_records: Vec<String>,
}

impl DataIssues {
    pub(crate) fn from_audit(audit: ChainAudit) -> Self {
        Self {
            cycles: audit.cycles,
            depth_exceeded: audit.depth_exceeded,
            dangling_references: audit
                .dangling
                .into_iter()
                .map(|(employee, missing_manager)| DanglingReference {
                    employee,
                    missing_manager,
                })
                .collect(),
            ..Self::default()
        }
    }

    /// Every employee treated as cycle-affected, sorted
    pub fn cycles_detected(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .cycles
            .iter()
            .chain(&self.depth_exceeded)
            .cloned()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn is_clean(&self) -> bool {
        self == &Self::default()
    }
}

/// Outcome of the write phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    /// Nodes handed to the writer
    pub attempted: usize,
    /// Nodes confirmed persisted
    pub succeeded: usize,
    pub failed: Vec<FailedDocument>,
    /// Batches submitted
    pub batches: usize,
    /// Batches that ended with at least one failed node
    pub failed_batches: usize,
    /// Bulk resubmissions, whole-batch or partial
    pub write_retries: u64,
}

/// Summary of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub source_index: String,
    pub target_index: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Distinct employees in the relationship maps
    pub employees: usize,
    /// Longest management chain produced
    pub longest_chain: usize,
    /// Stopped early on request; nodes already written stay valid
    pub cancelled: bool,
    pub data_issues: DataIssues,
    /// Source reads of both passes
    pub reads: ReadSummary,
    pub writes: WriteSummary,
}

impl RunReport {
    pub(crate) fn new(source_index: &str, target_index: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            source_index: source_index.to_string(),
            target_index: target_index.to_string(),
            started_at: now,
            finished_at: now,
            employees: 0,
            longest_chain: 0,
            cancelled: false,
            data_issues: DataIssues::default(),
            reads: ReadSummary::default(),
            writes: WriteSummary::default(),
        }
    }

    /// Number of nodes persisted
    pub fn succeeded(&self) -> usize {
        self.writes.succeeded
    }

    /// Ids of nodes that could not be persisted, sorted
    pub fn failed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.writes.failed.iter().map(|f| f.id.clone()).collect();
        ids.sort_unstable();
        ids
    }

    /// Employees affected by a cycle or the depth bound, sorted
    pub fn cycles_detected(&self) -> Vec<String> {
        self.data_issues.cycles_detected()
    }

    /// Wall-clock duration of the run
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Whether every attempted node was persisted and the run finished
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.writes.failed.is_empty()
    }

    /// Complete, and the source data had no issues
    pub fn is_clean(&self) -> bool {
        self.is_complete() && self.data_issues.is_clean()
    }
}
