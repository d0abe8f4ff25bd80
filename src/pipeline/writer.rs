//! Bulk writer
//!
//! Persists one batch of materialized nodes. A transient failure of the whole
//! request resubmits the batch; throttled items (429) are resubmitted on their
//! own. Both share the batch's attempt budget. Writes are keyed by employee
//! id, so resubmitting is always safe.

use super::report::FailedDocument;
use crate::retry::RetryPolicy;
use crate::store::{DocumentStore, StoredDocument};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of writing one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Position of the batch in submission order
    pub batch: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedDocument>,
    /// Resubmissions performed
    pub retries: u32,
}

impl BatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Writes batches of nodes to the target index
#[derive(Clone)]
pub struct BulkWriter {
    store: Arc<dyn DocumentStore>,
    index: String,
    retry: RetryPolicy,
}

impl BulkWriter {
    pub fn new(store: Arc<dyn DocumentStore>, index: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            store,
            index: index.into(),
            retry,
        }
    }

    /// Write one batch; never fails as a whole, failures are per document
    pub async fn write_batch(&self, batch: usize, documents: Vec<StoredDocument>) -> BatchOutcome {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut outcome = BatchOutcome {
            batch,
            attempted: documents.len(),
            ..BatchOutcome::default()
        };
        let mut pending = documents;
        let mut attempt = 1;

        while !pending.is_empty() {
            let last_attempt = attempt >= max_attempts;
            match self.store.bulk_write(&self.index, &pending).await {
                Ok(items) if items.len() == pending.len() => {
                    let mut throttled = Vec::new();
                    for (doc, item) in pending.into_iter().zip(items) {
                        match item.result {
                            Ok(()) => outcome.succeeded += 1,
                            Err(e) if e.is_retryable() && !last_attempt => throttled.push(doc),
                            Err(e) => outcome.failed.push(FailedDocument {
                                id: doc.id,
                                status: Some(e.status),
                                reason: e.reason,
                            }),
                        }
                    }
                    if throttled.is_empty() {
                        break;
                    }
                    warn!(
                        "Batch {}: {} document(s) throttled (attempt {}/{})",
                        batch,
                        throttled.len(),
                        attempt,
                        max_attempts
                    );
                    pending = throttled;
                }
                Ok(items) => {
                    let reason = format!(
                        "store acknowledged {} of {} document(s)",
                        items.len(),
                        pending.len()
                    );
                    warn!("Batch {}: {}", batch, reason);
                    fail_all(&mut outcome, pending, None, &reason);
                    break;
                }
                Err(e) if e.is_transient() && !last_attempt => {
                    warn!(
                        "Batch {} failed (attempt {}/{}): {}",
                        batch, attempt, max_attempts, e
                    );
                }
                Err(e) => {
                    warn!("Batch {} abandoned after {} attempt(s): {}", batch, attempt, e);
                    fail_all(&mut outcome, pending, None, &e.to_string());
                    break;
                }
            }
            outcome.retries += 1;
            tokio::time::sleep(self.retry.delay(attempt)).await;
            attempt += 1;
        }

        debug!(
            "Batch {}: {}/{} written, {} retries",
            batch, outcome.succeeded, outcome.attempted, outcome.retries
        );
        outcome
    }
}

fn fail_all(outcome: &mut BatchOutcome, documents: Vec<StoredDocument>, status: Option<u16>, reason: &str) {
    outcome
        .failed
        .extend(documents.into_iter().map(|doc| FailedDocument {
            id: doc.id,
            status,
            reason: reason.to_string(),
        }));
}
