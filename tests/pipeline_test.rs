use async_trait::async_trait;
use orgtree::pipeline::PipelineError;
use orgtree::store::{BulkItemOutcome, ScanPage, ScanRequest};
use orgtree::{
    DocumentStore, MemoryStore, OrgtreeConfig, Pipeline, RetryPolicy, StoreError, StoreResult,
    StoredDocument,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

fn config() -> OrgtreeConfig {
    let mut config = OrgtreeConfig::default();
    config.pipeline.page_size = 2;
    config.pipeline.scan_slices = 2;
    config.pipeline.batch_size = 2;
    config.pipeline.write_concurrency = 2;
    config.retry = RetryPolicy::immediate(5);
    config
}

async fn seed(store: &MemoryStore, people: &[(&str, Option<&str>)]) {
    let index = OrgtreeConfig::default().source_index;
    for (id, manager) in people {
        store
            .insert(
                &index,
                format!("doc-{}", id),
                json!({
                    "employeeId": id,
                    "managerEmpId": manager,
                    "fullName": format!("Employee {}", id),
                }),
            )
            .await;
    }
}

async fn node(store: &MemoryStore, id: &str) -> Value {
    let index = OrgtreeConfig::default().target_index;
    store
        .document(&index, id)
        .await
        .unwrap_or_else(|| panic!("node {} not written", id))
}

/// Wraps a MemoryStore and injects faults
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    /// Whole-request bulk failures still to inject
    bulk_failures: AtomicU32,
    /// Ids throttled (429) on their next write only
    throttle_once: Mutex<HashSet<String>>,
    /// Ids always rejected (400)
    reject: HashSet<String>,
    /// Transient scan failures still to inject
    scan_failures: AtomicU32,
    fail_scans: bool,
    fail_ping: bool,
    bulk_calls: AtomicU32,
    first_write: Notify,
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn scan(&self, index: &str, request: &ScanRequest) -> StoreResult<ScanPage> {
        let flaky = self
            .scan_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if self.fail_scans || flaky {
            return Err(StoreError::Http {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        self.inner.scan(index, request).await
    }

    async fn clear_scan(&self, cursor: &str) -> StoreResult<()> {
        self.inner.clear_scan(cursor).await
    }

    fn replayable_cursors(&self) -> bool {
        self.inner.replayable_cursors()
    }

    async fn get(&self, index: &str, id: &str) -> StoreResult<Option<StoredDocument>> {
        self.inner.get(index, id).await
    }

    async fn multi_get(
        &self,
        index: &str,
        ids: &[String],
    ) -> StoreResult<HashMap<String, StoredDocument>> {
        self.inner.multi_get(index, ids).await
    }

    async fn bulk_write(
        &self,
        index: &str,
        documents: &[StoredDocument],
    ) -> StoreResult<Vec<BulkItemOutcome>> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.first_write.notify_one();
        if self
            .bulk_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Transport("connection reset".to_string()));
        }

        let mut outcomes = Vec::with_capacity(documents.len());
        for doc in documents {
            let throttled = self.throttle_once.lock().unwrap().remove(&doc.id);
            let outcome = if throttled {
                BulkItemOutcome::failure(doc.id.clone(), 429, "es_rejected_execution_exception")
            } else if self.reject.contains(&doc.id) {
                BulkItemOutcome::failure(doc.id.clone(), 400, "mapper_parsing_exception")
            } else {
                let mut written = self.inner.bulk_write(index, std::slice::from_ref(doc)).await?;
                written.remove(0)
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn term_query(
        &self,
        index: &str,
        field: &str,
        value: &str,
        limit: usize,
    ) -> StoreResult<Vec<StoredDocument>> {
        self.inner.term_query(index, field, value, limit).await
    }

    async fn ping(&self) -> StoreResult<()> {
        if self.fail_ping {
            return Err(StoreError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_scenario_a_chains_and_reports() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[("1", None), ("2", Some("1")), ("3", Some("2"))]).await;

    let report = Pipeline::new(store.clone(), config()).unwrap().run().await.unwrap();

    assert_eq!(report.succeeded(), 3);
    assert!(report.failed_ids().is_empty());
    assert!(report.cycles_detected().is_empty());
    assert_eq!(report.employees, 3);
    assert_eq!(report.longest_chain, 3);
    assert!(report.is_complete());

    let three = node(&store, "3").await;
    assert_eq!(three["managementChain"], json!(["1", "2", "3"]));
    assert_eq!(three["reports"], json!([]));
    assert_eq!(three["fullName"], "Employee 3");

    let one = node(&store, "1").await;
    assert_eq!(one["managementChain"], json!(["1"]));
    assert_eq!(one["reports"], json!(["2"]));
}

#[tokio::test]
async fn test_scenario_b_cycle_is_contained() {
    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        &[("A", Some("B")), ("B", Some("A")), ("C", None), ("D", Some("C"))],
    )
    .await;

    let report = Pipeline::new(store.clone(), config()).unwrap().run().await.unwrap();

    assert_eq!(report.cycles_detected(), vec!["A", "B"]);
    assert_eq!(report.succeeded(), 4);

    // Cycle members are still written with a finite chain ending at themselves
    let a = node(&store, "A").await;
    assert_eq!(a["managementChain"], json!(["B", "A"]));
    assert_eq!(a["reports"], json!(["B"]));

    // The unaffected part of the population is untouched
    let d = node(&store, "D").await;
    assert_eq!(d["managementChain"], json!(["C", "D"]));
}

#[tokio::test]
async fn test_scenario_c_transient_batch_failure_is_retried() {
    let store = Arc::new(FlakyStore {
        bulk_failures: AtomicU32::new(2),
        ..FlakyStore::default()
    });
    let mut people = vec![("0".to_string(), None)];
    for i in 1..50 {
        people.push((i.to_string(), Some("0".to_string())));
    }
    let people: Vec<(&str, Option<&str>)> = people
        .iter()
        .map(|(id, manager)| (id.as_str(), manager.as_deref()))
        .collect();
    seed(&store.inner, &people).await;

    let mut config = config();
    config.pipeline.batch_size = 50;
    config.pipeline.page_size = 100;
    config.pipeline.scan_slices = 1;

    let report = Pipeline::new(store.clone(), config).unwrap().run().await.unwrap();

    assert_eq!(report.succeeded(), 50);
    assert!(report.failed_ids().is_empty());
    assert!(report.writes.write_retries >= 2);
    assert_eq!(report.writes.batches, 1);
    assert_eq!(store.bulk_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_batch_is_reported_not_fatal() {
    let store = Arc::new(FlakyStore {
        bulk_failures: AtomicU32::new(100),
        ..FlakyStore::default()
    });
    seed(&store.inner, &[("1", None), ("2", Some("1"))]).await;

    let mut config = config();
    config.retry = RetryPolicy::immediate(3);
    let report = Pipeline::new(store.clone(), config).unwrap().run().await.unwrap();

    assert_eq!(report.succeeded(), 0);
    assert_eq!(report.failed_ids(), vec!["1", "2"]);
    assert!(report.writes.failed_batches >= 1);
    assert!(report.writes.failed.iter().all(|f| f.status.is_none()));
}

#[tokio::test]
async fn test_throttled_items_are_resubmitted() {
    let store = Arc::new(FlakyStore {
        throttle_once: Mutex::new(["2".to_string()].into_iter().collect()),
        ..FlakyStore::default()
    });
    seed(&store.inner, &[("1", None), ("2", Some("1")), ("3", Some("1"))]).await;

    let report = Pipeline::new(store.clone(), config()).unwrap().run().await.unwrap();

    assert_eq!(report.succeeded(), 3);
    assert!(report.failed_ids().is_empty());
    assert!(report.writes.write_retries >= 1);
    assert_eq!(node(&store.inner, "2").await["managementChain"], json!(["1", "2"]));
}

#[tokio::test]
async fn test_rejected_node_does_not_stop_run() {
    let store = Arc::new(FlakyStore {
        reject: ["2".to_string()].into_iter().collect(),
        ..FlakyStore::default()
    });
    seed(&store.inner, &[("1", None), ("2", Some("1")), ("3", Some("2"))]).await;

    let report = Pipeline::new(store.clone(), config()).unwrap().run().await.unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed_ids(), vec!["2"]);
    assert_eq!(report.writes.failed[0].status, Some(400));
    assert!(!report.is_complete());
    // Node 3 still carries the full chain through the unwritten node
    assert_eq!(node(&store.inner, "3").await["managementChain"], json!(["1", "2", "3"]));
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        &[("1", None), ("2", Some("1")), ("3", Some("1")), ("4", Some("3")), ("5", Some("3"))],
    )
    .await;
    let pipeline = Pipeline::new(store.clone(), config()).unwrap();
    let target = pipeline.config().target_index.clone();

    pipeline.run().await.unwrap();
    let first = serde_json::to_string(&store.documents(&target).await).unwrap();
    let report = pipeline.run().await.unwrap();
    let second = serde_json::to_string(&store.documents(&target).await).unwrap();

    assert_eq!(first, second);
    assert_eq!(report.succeeded(), 5);
}

#[tokio::test]
async fn test_dangling_manager_becomes_effective_root() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[("1", Some("ghost")), ("2", Some("1"))]).await;

    let report = Pipeline::new(store.clone(), config()).unwrap().run().await.unwrap();

    let dangling = &report.data_issues.dangling_references;
    assert_eq!(dangling.len(), 1);
    assert_eq!(dangling[0].employee, "1");
    assert_eq!(dangling[0].missing_manager, "ghost");
    assert!(report.cycles_detected().is_empty());
    assert_eq!(node(&store, "1").await["managementChain"], json!(["1"]));
    assert_eq!(node(&store, "2").await["managementChain"], json!(["1", "2"]));
}

#[tokio::test]
async fn test_depth_bound_truncates_and_flags() {
    let store = Arc::new(MemoryStore::new());
    let ids: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    let mut people = vec![(ids[0].as_str(), None)];
    for i in 1..10 {
        people.push((ids[i].as_str(), Some(ids[i - 1].as_str())));
    }
    seed(&store, &people).await;

    let mut config = config();
    config.pipeline.max_chain_depth = 5;
    let report = Pipeline::new(store.clone(), config).unwrap().run().await.unwrap();

    assert_eq!(report.data_issues.depth_exceeded, vec!["5", "6", "7", "8", "9"]);
    assert_eq!(report.cycles_detected().len(), 5);
    assert_eq!(report.succeeded(), 10);
    assert_eq!(
        node(&store, "9").await["managementChain"],
        json!(["5", "6", "7", "8", "9"])
    );
}

#[tokio::test]
async fn test_invalid_and_duplicate_records() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[("1", None), ("2", Some("1"))]).await;
    let source = OrgtreeConfig::default().source_index;
    store.insert(&source, "broken", json!("not an object")).await;
    store
        .insert(&source, "doc-2-copy", json!({ "employeeId": "2", "managerEmpId": "1" }))
        .await;

    let report = Pipeline::new(store.clone(), config()).unwrap().run().await.unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.data_issues.invalid_records.len(), 1);
    assert_eq!(report.data_issues.invalid_records[0].document, "broken");
    assert_eq!(report.data_issues.duplicate_records, 1);
    assert_eq!(node(&store, "1").await["reports"], json!(["2"]));
}

#[tokio::test]
async fn test_empty_source() {
    let store = Arc::new(MemoryStore::new());
    let report = Pipeline::new(store, config()).unwrap().run().await.unwrap();
    assert_eq!(report.succeeded(), 0);
    assert_eq!(report.employees, 0);
    assert_eq!(report.writes.batches, 0);
    assert!(report.is_complete());
}

#[tokio::test]
async fn test_shutdown_before_start_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[("1", None), ("2", Some("1"))]).await;
    let pipeline = Pipeline::new(store.clone(), config()).unwrap();

    let report = pipeline.run_until(async {}).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.succeeded(), 0);
    assert_eq!(store.len(&pipeline.config().target_index).await, 0);
}

#[tokio::test]
async fn test_shutdown_during_writes_stops_new_batches() {
    let store = Arc::new(FlakyStore::default());
    let ids: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    let people: Vec<(&str, Option<&str>)> = ids.iter().map(|id| (id.as_str(), None)).collect();
    seed(&store.inner, &people).await;

    let mut config = config();
    config.pipeline.batch_size = 1;
    config.pipeline.write_concurrency = 1;
    let pipeline = Pipeline::new(store.clone(), config).unwrap();

    let report = pipeline
        .run_until(store.first_write.notified())
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.succeeded() >= 1);
    assert!(report.succeeded() < 10);
    assert!(report.failed_ids().is_empty());
}

#[tokio::test]
async fn test_unreachable_store_is_fatal() {
    let store = Arc::new(FlakyStore {
        fail_ping: true,
        ..FlakyStore::default()
    });
    let mut config = config();
    config.retry = RetryPolicy::immediate(2);

    let result = Pipeline::new(store, config).unwrap().run().await;
    assert!(matches!(
        result,
        Err(PipelineError::StoreUnavailable { attempts: 2, .. })
    ));
}

/// Single-slice scroll semantics: a continuation advances the server-side
/// cursor even when its response never arrives
#[derive(Default)]
struct ScrollStore {
    inner: MemoryStore,
    scrolls: Mutex<HashMap<String, usize>>,
    opened: AtomicU32,
    /// Continuation responses still to lose
    lost_responses: AtomicU32,
}

#[async_trait]
impl DocumentStore for ScrollStore {
    async fn scan(&self, index: &str, request: &ScanRequest) -> StoreResult<ScanPage> {
        let all: Vec<StoredDocument> = self
            .inner
            .documents(index)
            .await
            .into_iter()
            .map(|(id, source)| StoredDocument::new(id, source))
            .collect();

        let page = {
            let mut scrolls = self.scrolls.lock().unwrap();
            let (scroll, offset) = match &request.cursor {
                None => {
                    let n = self.opened.fetch_add(1, Ordering::SeqCst);
                    (format!("scroll-{}", n), 0)
                }
                Some(cursor) => match scrolls.get(cursor) {
                    Some(offset) => (cursor.clone(), *offset),
                    None => {
                        return Err(StoreError::Http {
                            status: 404,
                            message: "search_context_missing_exception".to_string(),
                        })
                    }
                },
            };
            let documents: Vec<StoredDocument> =
                all.into_iter().skip(offset).take(request.page_size).collect();
            scrolls.insert(scroll.clone(), offset + documents.len());
            let cursor = (!documents.is_empty()).then_some(scroll);
            ScanPage { documents, cursor }
        };

        if request.cursor.is_some()
            && self
                .lost_responses
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StoreError::Timeout("response lost".to_string()));
        }
        Ok(page)
    }

    async fn clear_scan(&self, cursor: &str) -> StoreResult<()> {
        self.scrolls.lock().unwrap().remove(cursor);
        Ok(())
    }

    async fn get(&self, index: &str, id: &str) -> StoreResult<Option<StoredDocument>> {
        self.inner.get(index, id).await
    }

    async fn multi_get(
        &self,
        index: &str,
        ids: &[String],
    ) -> StoreResult<HashMap<String, StoredDocument>> {
        self.inner.multi_get(index, ids).await
    }

    async fn bulk_write(
        &self,
        index: &str,
        documents: &[StoredDocument],
    ) -> StoreResult<Vec<BulkItemOutcome>> {
        self.inner.bulk_write(index, documents).await
    }

    async fn term_query(
        &self,
        index: &str,
        field: &str,
        value: &str,
        limit: usize,
    ) -> StoreResult<Vec<StoredDocument>> {
        self.inner.term_query(index, field, value, limit).await
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// `0 <- 1 <- ... <- len-1`
async fn seed_chain(store: &MemoryStore, len: usize) {
    let people: Vec<(String, Option<String>)> = (0..len)
        .map(|i| (i.to_string(), i.checked_sub(1).map(|m| m.to_string())))
        .collect();
    let people: Vec<(&str, Option<&str>)> = people
        .iter()
        .map(|(id, manager)| (id.as_str(), manager.as_deref()))
        .collect();
    seed(store, &people).await;
}

#[tokio::test]
async fn test_transient_page_failures_are_retried() {
    let store = Arc::new(FlakyStore {
        scan_failures: AtomicU32::new(2),
        ..FlakyStore::default()
    });
    seed_chain(&store.inner, 10).await;
    let pipeline = Pipeline::new(store.clone(), config()).unwrap();

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.employees, 10);
    assert_eq!(report.succeeded(), 10);
    assert!(report.data_issues.is_clean());
    assert_eq!(report.reads.page_retries, 2);
    assert_eq!(report.reads.slice_restarts, 0);
    assert_eq!(
        node(&store.inner, "9").await["managementChain"],
        json!(["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"])
    );

    // Counters are per run
    let rerun = pipeline.run().await.unwrap();
    assert_eq!(rerun.reads.page_retries, 0);
    assert!(rerun.reads.pages > 0);
}

#[tokio::test]
async fn test_lost_scroll_page_restarts_slice() {
    let store = Arc::new(ScrollStore {
        lost_responses: AtomicU32::new(1),
        ..ScrollStore::default()
    });
    seed_chain(&store.inner, 10).await;
    let mut config = config();
    config.pipeline.scan_slices = 1;

    let report = Pipeline::new(store.clone(), config).unwrap().run().await.unwrap();

    assert_eq!(report.employees, 10);
    assert_eq!(report.succeeded(), 10);
    assert_eq!(report.reads.slice_restarts, 1);
    assert!(report.data_issues.is_clean());
    assert_eq!(
        node(&store.inner, "9").await["managementChain"],
        json!(["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"])
    );
}

#[tokio::test]
async fn test_repeatedly_lost_scroll_page_is_fatal() {
    let store = Arc::new(ScrollStore {
        lost_responses: AtomicU32::new(100),
        ..ScrollStore::default()
    });
    seed_chain(&store.inner, 10).await;
    let mut config = config();
    config.pipeline.scan_slices = 1;
    config.retry = RetryPolicy::immediate(3);
    let target = config.target_index.clone();

    let result = Pipeline::new(store.clone(), config).unwrap().run().await;

    assert!(matches!(result, Err(PipelineError::Source(_))));
    assert_eq!(store.inner.len(&target).await, 0);
    assert_eq!(store.opened.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unreadable_source_is_fatal() {
    let store = Arc::new(FlakyStore {
        fail_scans: true,
        ..FlakyStore::default()
    });
    let mut config = config();
    config.retry = RetryPolicy::immediate(3);

    let result = Pipeline::new(store.clone(), config).unwrap().run().await;
    assert!(matches!(result, Err(PipelineError::Source(_))));
    assert_eq!(store.bulk_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = config();
    config.pipeline.batch_size = 0;
    assert!(matches!(
        Pipeline::new(Arc::new(MemoryStore::new()), config),
        Err(PipelineError::Config(_))
    ));
}

#[tokio::test]
async fn test_check_reports_without_writing() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, &[("A", Some("B")), ("B", Some("A")), ("C", Some("ghost"))]).await;
    let pipeline = Pipeline::new(store.clone(), config()).unwrap();

    let (pass, issues) = pipeline.check().await.unwrap();

    assert_eq!(pass.maps.len(), 3);
    assert_eq!(issues.cycles_detected(), vec!["A", "B"]);
    assert_eq!(issues.dangling_references.len(), 1);
    assert_eq!(store.len(&pipeline.config().target_index).await, 0);
}
