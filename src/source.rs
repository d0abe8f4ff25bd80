//! Record source adapter
//!
//! Exposes the source index as a restartable stream of raw documents. The
//! index is read as `scan_slices` independent partitions; each partition is
//! paged sequentially, and the partitions are merged so their pages are in
//! flight concurrently.
//!
//! First pages, and every page of a store with replayable cursors, are
//! retried on transient faults. A continuation of a scroll-style cursor is
//! never re-sent: the store may already have moved past the lost page, so
//! the slice is restarted from the beginning instead and documents it already
//! produced are skipped. A page that still cannot be read ends the stream
//! with an error item.

use crate::config::PipelineSettings;
use crate::retry::{retry, Retried, RetryFailure, RetryPolicy};
use crate::store::{DocumentStore, ScanRequest, ScanSlice, StoreError, StoredDocument};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Source read errors
#[derive(Error, Debug)]
pub enum SourceError {
    /// A page could not be read within the retry budget
    #[error("Failed to read page {page} of slice {slice} from {index} after {attempts} attempt(s): {source}")]
    PageUnavailable {
        index: String,
        slice: usize,
        page: usize,
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Read counters of one pass, snapshot of [`ReadStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadSummary {
    /// Pages delivered
    pub pages: u64,
    /// Page requests re-sent after a transient fault
    pub page_retries: u64,
    /// Slices read again from the start after a lost continuation
    pub slice_restarts: u64,
}

/// Live read counters shared by the slices of one or more streams
#[derive(Debug, Default)]
pub struct ReadStats {
    pages: AtomicU64,
    page_retries: AtomicU64,
    slice_restarts: AtomicU64,
}

impl ReadStats {
    pub fn summary(&self) -> ReadSummary {
        ReadSummary {
            pages: self.pages.load(Ordering::Relaxed),
            page_retries: self.page_retries.load(Ordering::Relaxed),
            slice_restarts: self.slice_restarts.load(Ordering::Relaxed),
        }
    }
}

/// Position of one slice reader
enum Position {
    Start,
    After(String),
    Done,
}

struct SliceReader {
    store: Arc<dyn DocumentStore>,
    index: String,
    slice: Option<ScanSlice>,
    page_size: usize,
    retry: RetryPolicy,
    stats: Arc<ReadStats>,
    page: usize,
    position: Position,
    /// Continuations may be re-sent after a failure
    replayable: bool,
    /// Ids already produced; only tracked for non-replayable cursors
    emitted: FxHashSet<String>,
    restarts: u32,
}

impl SliceReader {
    fn slice_id(&self) -> usize {
        self.slice.map_or(0, |s| s.id)
    }

    /// Read the next page; `None` once the slice is exhausted or failed
    async fn next_page(mut self) -> Option<(SourceResult<Vec<StoredDocument>>, Self)> {
        loop {
            let cursor = match std::mem::replace(&mut self.position, Position::Done) {
                Position::Done => return None,
                Position::Start => None,
                Position::After(cursor) => Some(cursor),
            };
            let resendable = self.replayable || cursor.is_none();
            let request = ScanRequest {
                page_size: self.page_size,
                slice: self.slice,
                cursor,
            };
            let label = format!("scan {} slice {} page {}", self.index, self.slice_id(), self.page);

            let result = if resendable {
                let store = &self.store;
                let index = self.index.as_str();
                let request = &request;
                retry(&self.retry, &label, move || store.scan(index, request)).await
            } else {
                self.store
                    .scan(&self.index, &request)
                    .await
                    .map(|value| Retried { value, retries: 0 })
                    .map_err(|error| RetryFailure { error, attempts: 1 })
            };

            match result {
                Ok(retried) => {
                    self.stats
                        .page_retries
                        .fetch_add(u64::from(retried.retries), Ordering::Relaxed);
                    self.stats.pages.fetch_add(1, Ordering::Relaxed);
                    let page = retried.value;
                    debug!(
                        "{}: {} document(s), more: {}",
                        label,
                        page.documents.len(),
                        page.cursor.is_some()
                    );
                    self.page += 1;
                    self.position = match page.cursor {
                        Some(next) => Position::After(next),
                        None => Position::Done,
                    };
                    let documents = if self.replayable {
                        page.documents
                    } else {
                        let emitted = &mut self.emitted;
                        page.documents
                            .into_iter()
                            .filter(|doc| emitted.insert(doc.id.clone()))
                            .collect()
                    };
                    return Some((Ok(documents), self));
                }
                Err(failure) => {
                    self.stats.page_retries.fetch_add(
                        u64::from(failure.attempts.saturating_sub(1)),
                        Ordering::Relaxed,
                    );
                    if let Some(cursor) = &request.cursor {
                        if let Err(e) = self.store.clear_scan(cursor).await {
                            warn!("Failed to release scan cursor: {}", e);
                        }
                    }
                    if !resendable
                        && failure.error.is_transient()
                        && self.restarts + 1 < self.retry.max_attempts.max(1)
                    {
                        self.restarts += 1;
                        self.stats.slice_restarts.fetch_add(1, Ordering::Relaxed);
                        let delay = self.retry.delay(self.restarts);
                        warn!(
                            "{} lost ({}); restarting slice, {} document(s) already read, in {:?}",
                            label,
                            failure.error,
                            self.emitted.len(),
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        self.page = 0;
                        self.position = Position::Start;
                        continue;
                    }
                    let error = SourceError::PageUnavailable {
                        index: self.index.clone(),
                        slice: self.slice_id(),
                        page: self.page,
                        attempts: failure.attempts + self.restarts,
                        source: failure.error,
                    };
                    return Some((Err(error), self));
                }
            }
        }
    }
}

/// Streams every document of one index
#[derive(Clone)]
pub struct RecordSource {
    store: Arc<dyn DocumentStore>,
    index: String,
    page_size: usize,
    slices: usize,
    retry: RetryPolicy,
}

impl RecordSource {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index: impl Into<String>,
        settings: &PipelineSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            index: index.into(),
            page_size: settings.page_size.max(1),
            slices: settings.scan_slices.max(1),
            retry,
        }
    }

    /// Index this source reads
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Start a fresh pass over the index.
    ///
    /// Every call begins a new scan, so the source can be read once per
    /// pipeline pass. Order across slices is unspecified.
    pub fn stream(&self) -> BoxStream<'static, SourceResult<StoredDocument>> {
        self.stream_counted(Arc::default())
    }

    /// Like [`RecordSource::stream`], counting page reads into `stats`
    pub fn stream_counted(
        &self,
        stats: Arc<ReadStats>,
    ) -> BoxStream<'static, SourceResult<StoredDocument>> {
        let replayable = self.store.replayable_cursors();
        let readers = (0..self.slices).map(|id| {
            let reader = SliceReader {
                store: Arc::clone(&self.store),
                index: self.index.clone(),
                slice: (self.slices > 1).then_some(ScanSlice {
                    id,
                    max: self.slices,
                }),
                page_size: self.page_size,
                retry: self.retry.clone(),
                stats: Arc::clone(&stats),
                page: 0,
                position: Position::Start,
                replayable,
                emitted: FxHashSet::default(),
                restarts: 0,
            };
            stream::unfold(reader, SliceReader::next_page)
                .map_ok(|documents| stream::iter(documents.into_iter().map(Ok::<_, SourceError>)))
                .try_flatten()
                .boxed()
        });
        stream::select_all(readers).boxed()
    }
}
