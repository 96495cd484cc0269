//! Batch fetch orchestrator
//!
//! Splits an id list into consecutive upstream-sized chunks, dispatches them
//! with bounded parallelism, and concatenates the surviving results in chunk
//! order. A failed chunk is logged and skipped; it never fails the request.
//!
//! Results are in chunk order only. Callers that need an id → record map must
//! index by the record's own id field, not by position.

use std::future::Future;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::types::MarketId;

/// A chunk that failed upstream
#[derive(Debug, Clone, PartialEq)]
pub struct FailedChunk {
    pub ids: Vec<MarketId>,
    pub error: PipelineError,
}

/// Merged result of a multi-chunk fetch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome<T> {
    /// Successful chunk results, concatenated in chunk order
    pub records: Vec<T>,
    pub failed_chunks: Vec<FailedChunk>,
    /// Upstream calls issued (one per chunk)
    pub total_chunks: usize,
}

impl<T> BatchOutcome<T> {
    fn empty() -> Self {
        Self { records: Vec::new(), failed_chunks: Vec::new(), total_chunks: 0 }
    }

    /// `PartialBatchFailure` warning when any chunk failed
    pub fn partial_failure(&self) -> Option<PipelineError> {
        if self.failed_chunks.is_empty() {
            None
        } else {
            Some(PipelineError::PartialBatchFailure {
                failed: self.failed_chunks.len(),
                total: self.total_chunks,
            })
        }
    }

    /// Ids whose chunk failed
    pub fn failed_ids(&self) -> impl Iterator<Item = &MarketId> {
        self.failed_chunks.iter().flat_map(|chunk| chunk.ids.iter())
    }

    /// Every chunk failed
    pub fn all_failed(&self) -> bool {
        self.total_chunks > 0 && self.failed_chunks.len() == self.total_chunks
    }
}

/// Chunked upstream dispatcher
#[derive(Debug, Clone, Copy)]
pub struct BatchFetcher {
    batch_size: usize,
    max_concurrency: usize,
}

impl BatchFetcher {
    /// Both limits are clamped to at least 1. `max_concurrency = 1` dispatches sequentially.
    pub fn new(batch_size: usize, max_concurrency: usize) -> Self {
        Self { batch_size: batch_size.max(1), max_concurrency: max_concurrency.max(1) }
    }

    /// Most ids per upstream call
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Most chunks in flight at once
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of upstream calls `n` ids will take
    pub fn chunk_count(&self, n: usize) -> usize {
        n.div_ceil(self.batch_size)
    }

    /// Fetch `ids` in chunks of at most `batch_size`, `fetch_chunk` once per chunk
    pub async fn fetch_many<T, F, Fut>(&self, ids: &[MarketId], fetch_chunk: F) -> BatchOutcome<T>
    where
        F: Fn(Vec<MarketId>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, PipelineError>>,
    {
        if ids.is_empty() {
            return BatchOutcome::empty();
        }

        let chunks: Vec<Vec<MarketId>> = ids.chunks(self.batch_size).map(<[MarketId]>::to_vec).collect();
        let total_chunks = chunks.len();
        debug!(
            "Fetching {} ids in {} chunks (size {}, concurrency {})",
            ids.len(),
            total_chunks,
            self.batch_size,
            self.max_concurrency
        );

        // `buffered` keeps chunk order regardless of completion order
        let results: Vec<(Vec<MarketId>, Result<Vec<T>, PipelineError>)> = stream::iter(chunks)
            .map(|chunk| {
                let call = fetch_chunk(chunk.clone());
                async move { (chunk, call.await) }
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut outcome = BatchOutcome { records: Vec::new(), failed_chunks: Vec::new(), total_chunks };
        for (index, (chunk, result)) in results.into_iter().enumerate() {
            match result {
                Ok(mut records) => outcome.records.append(&mut records),
                Err(error) => {
                    warn!("Batch {}/{} ({} ids) failed: {}", index + 1, total_chunks, chunk.len(), error);
                    outcome.failed_chunks.push(FailedChunk { ids: chunk, error });
                }
            }
        }

        outcome
    }
}
