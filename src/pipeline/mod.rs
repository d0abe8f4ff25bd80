//! Materialization pipeline
//!
//! A run makes two passes over the source index:
//!
//! 1. **Relationships**: stream every record and build the employee→manager
//!    and manager→reports maps. Only identifiers are kept in memory.
//! 2. **Materialization**: stream the source again, resolve each employee's
//!    chain against the finished maps, attach its direct reports, and write
//!    the resulting nodes to the target index in concurrent bulk batches.
//!
//! Between the passes the maps are audited in parallel for cycles and
//! dangling references. Data problems and write failures are collected into
//! the [`RunReport`]; only an unreachable store or an unreadable source
//! aborts a run.

pub mod report;
pub mod writer;

pub use report::{DanglingReference, DataIssues, FailedDocument, InvalidRecord, RunReport, WriteSummary};
pub use writer::{BatchOutcome, BulkWriter};

use crate::config::{ConfigError, OrgtreeConfig};
use crate::record::{EmployeeRecord, HierarchyNode};
use crate::retry::retry;
use crate::source::{ReadStats, RecordSource, SourceError};
use crate::store::{DocumentStore, StoreError, StoredDocument};
use chrono::Utc;
use futures::future::{self, FutureExt};
use futures::stream::{StreamExt, TryChunksError, TryStreamExt};
use orgtree_algorithms::{ChainOutcome, ChainResolver, InsertOutcome, RelationshipMapBuilder, RelationshipMaps};
use rustc_hash::FxHashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Faults that end a run early
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The store did not answer the pre-flight check
    #[error("Store unreachable after {attempts} attempt(s): {source}")]
    StoreUnavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Source(#[from] SourceError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Output of the relationship pass
#[derive(Debug, Default)]
pub struct RelationshipPass {
    pub maps: RelationshipMaps,
    pub invalid_records: Vec<InvalidRecord>,
    pub duplicate_records: usize,
}

/// Per-pass bookkeeping of the materialization pass
#[derive(Default)]
struct MaterializeState {
    seen: FxHashSet<String>,
    late: Vec<String>,
    unserializable: Vec<InvalidRecord>,
}

/// Two-pass hierarchy materialization against one document store
pub struct Pipeline {
    store: Arc<dyn DocumentStore>,
    config: OrgtreeConfig,
    source: RecordSource,
    writer: BulkWriter,
}

impl Pipeline {
    /// Create a pipeline; the configuration is validated up front
    pub fn new(store: Arc<dyn DocumentStore>, config: OrgtreeConfig) -> PipelineResult<Self> {
        config.validate()?;
        let source = RecordSource::new(
            Arc::clone(&store),
            config.source_index.clone(),
            &config.pipeline,
            config.retry.clone(),
        );
        let writer = BulkWriter::new(
            Arc::clone(&store),
            config.target_index.clone(),
            config.retry.clone(),
        );
        Ok(Self {
            store,
            config,
            source,
            writer,
        })
    }

    pub fn config(&self) -> &OrgtreeConfig {
        &self.config
    }

    /// Run to completion
    pub async fn run(&self) -> PipelineResult<RunReport> {
        self.run_until(future::pending()).await
    }

    /// Run until finished or until `shutdown` resolves.
    ///
    /// On shutdown no new batches are started; batches already submitted are
    /// allowed to finish and the report is marked as cancelled.
    pub async fn run_until<F>(&self, shutdown: F) -> PipelineResult<RunReport>
    where
        F: Future<Output = ()> + Send,
    {
        let mut report = RunReport::new(&self.config.source_index, &self.config.target_index);
        info!(
            "Run {} started: {} -> {}",
            report.run_id, self.config.source_index, self.config.target_index
        );

        let cancelled = AtomicBool::new(false);
        let shutdown = async {
            shutdown.await;
            info!("Shutdown requested; finishing in-flight batches");
            cancelled.store(true, Ordering::SeqCst);
        }
        .shared();

        self.preflight().await?;
        let reads = Arc::new(ReadStats::default());

        // Pass 1
        let pass = tokio::select! {
            biased;
            _ = shutdown.clone() => None,
            pass = self.relationship_pass(Arc::clone(&reads)) => Some(pass?),
        };
        let Some(pass) = pass else {
            report.cancelled = true;
            report.reads = reads.summary();
            report.finished_at = Utc::now();
            return Ok(report);
        };

        report.employees = pass.maps.len();
        let resolver = ChainResolver::new(&pass.maps, self.config.pipeline.max_chain_depth);
        let audit = resolver.audit();
        report.longest_chain = audit.longest_chain;
        if audit.has_cycles() {
            warn!(
                "{} employee(s) affected by cycles, {} cut at depth {}",
                audit.cycles.len(),
                audit.depth_exceeded.len(),
                resolver.max_depth()
            );
        }
        for (employee, manager) in audit.dangling.iter().take(20) {
            warn!("Employee {} references unknown manager {}", employee, manager);
        }
        report.data_issues = DataIssues::from_audit(audit);
        report.data_issues.invalid_records = pass.invalid_records;
        report.data_issues.duplicate_records = pass.duplicate_records;

        // Pass 2
        let state = self
            .materialize(resolver, shutdown, Arc::clone(&reads), &mut report.writes)
            .await?;
        report.data_issues.late_records = state.late;
        report.data_issues.invalid_records.extend(state.unserializable);
        report.reads = reads.summary();
        report.cancelled = cancelled.load(Ordering::SeqCst);
        report.finished_at = Utc::now();

        info!(
            "Run {} finished in {}ms: {}/{} nodes written, {} failed, {} cycle-affected{}",
            report.run_id,
            report.elapsed().num_milliseconds(),
            report.writes.succeeded,
            report.writes.attempted,
            report.writes.failed.len(),
            report.data_issues.cycles_detected().len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    /// Relationship pass plus audit, without writing anything
    pub async fn check(&self) -> PipelineResult<(RelationshipPass, DataIssues)> {
        self.preflight().await?;
        let pass = self.build_maps().await?;
        let resolver = ChainResolver::new(&pass.maps, self.config.pipeline.max_chain_depth);
        let mut issues = DataIssues::from_audit(resolver.audit());
        issues.invalid_records = pass.invalid_records.clone();
        issues.duplicate_records = pass.duplicate_records;
        Ok((pass, issues))
    }

    async fn preflight(&self) -> PipelineResult<()> {
        let store = &self.store;
        retry(&self.config.retry, "store ping", move || store.ping())
            .await
            .map(|_| ())
            .map_err(|failure| PipelineError::StoreUnavailable {
                attempts: failure.attempts,
                source: failure.error,
            })
    }

    /// Pass 1: stream the source into relationship maps
    pub async fn build_maps(&self) -> PipelineResult<RelationshipPass> {
        self.relationship_pass(Arc::default()).await
    }

    async fn relationship_pass(&self, reads: Arc<ReadStats>) -> PipelineResult<RelationshipPass> {
        let fields = &self.config.fields;
        let mut builder = RelationshipMapBuilder::new();
        let mut invalid_records = Vec::new();
        let mut documents = self.source.stream_counted(reads);

        while let Some(doc) = documents.try_next().await? {
            match EmployeeRecord::from_document(&doc, fields) {
                Ok(record) => {
                    if builder.insert(&record.id, record.manager_id.as_deref())
                        == InsertOutcome::Replaced
                    {
                        debug!("Duplicate record for employee {}", record.id);
                    }
                }
                Err(e) => {
                    debug!("Skipping document: {}", e);
                    invalid_records.push(InvalidRecord {
                        document: doc.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !invalid_records.is_empty() {
            warn!("{} source document(s) skipped as invalid", invalid_records.len());
        }
        let duplicate_records = builder.duplicates();
        let maps = builder.build();
        info!(
            "Relationship pass: {} employee(s), {} root(s)",
            maps.len(),
            maps.roots().len()
        );
        Ok(RelationshipPass {
            maps,
            invalid_records,
            duplicate_records,
        })
    }

    /// Pass 2: re-stream, materialize and write
    async fn materialize<S>(
        &self,
        resolver: ChainResolver<'_>,
        shutdown: S,
        reads: Arc<ReadStats>,
        writes: &mut WriteSummary,
    ) -> PipelineResult<MaterializeState>
    where
        S: Future<Output = ()> + Send,
    {
        let mut state = MaterializeState::default();
        let settings = &self.config.pipeline;
        let fields = &self.config.fields;
        let maps = resolver.maps();

        let result = {
            let state = &mut state;
            let nodes = self
                .source
                .stream_counted(reads)
                .map_ok(|doc| {
                    let record = EmployeeRecord::from_document(&doc, fields).ok()?;
                    if !state.seen.insert(record.id.clone()) {
                        return None;
                    }
                    let chain = resolver.resolve(&record.id);
                    if chain.outcome == ChainOutcome::Unmapped {
                        state.late.push(record.id.clone());
                    }
                    let reports = maps.reports_of(&record.id).map(str::to_string).collect();
                    let node = HierarchyNode::materialize(&record, chain.ids, reports);
                    match node.to_document(&record.id) {
                        Ok(doc) => Some(doc),
                        Err(e) => {
                            state.unserializable.push(InvalidRecord {
                                document: doc.id,
                                reason: e.to_string(),
                            });
                            None
                        }
                    }
                })
                .try_filter_map(|node| future::ready(Ok(node)))
                .try_chunks(settings.batch_size.max(1))
                .take_until(shutdown)
                .enumerate()
                .map(|(batch, chunk)| self.write_chunk(batch, chunk))
                .buffer_unordered(settings.write_concurrency.max(1));

            let mut nodes = std::pin::pin!(nodes);
            let mut result = Ok(());
            while let Some(outcome) = nodes.next().await {
                match outcome {
                    Ok(outcome) => writes.record(outcome),
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            result
        };
        result?;

        if !state.late.is_empty() {
            warn!(
                "{} employee(s) appeared after the relationship pass; written without a chain",
                state.late.len()
            );
        }
        writes.failed.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(state)
    }

    async fn write_chunk(
        &self,
        batch: usize,
        chunk: Result<Vec<StoredDocument>, TryChunksError<StoredDocument, SourceError>>,
    ) -> PipelineResult<BatchOutcome> {
        match chunk {
            Ok(documents) => Ok(self.writer.write_batch(batch, documents).await),
            Err(TryChunksError(_, e)) => Err(e.into()),
        }
    }
}

impl WriteSummary {
    fn record(&mut self, outcome: BatchOutcome) {
        self.batches += 1;
        self.attempted += outcome.attempted;
        self.succeeded += outcome.succeeded;
        self.write_retries += u64::from(outcome.retries);
        if !outcome.is_clean() {
            self.failed_batches += 1;
            self.failed.extend(outcome.failed);
        }
    }
}
