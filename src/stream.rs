//! Streaming API: candidate records batch by batch.
//!
//! [`crate::extract::extract_records`] returns only after the whole document
//! has been read and reconciled. [`candidate_stream`] exposes the same work
//! one batch at a time so callers can show partial results, persist
//! candidates as they arrive, or stop early.
//!
//! The stream is lazy: a batch is rendered only when the previous outcome has
//! been consumed, so at most one batch of page images is alive at a time.
//! The first error ends the stream.

use crate::error::ExtractError;
use crate::pipeline::fields::FieldExtractor;
use crate::pipeline::ocr::{self, OcrEngine};
use crate::pipeline::pool::EnginePool;
use crate::pipeline::render::{BatchRenderer, BatchStream};
use crate::record::CandidateRecord;
use futures::stream::{self, TryStreamExt};
use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::Stream;

/// Candidates produced by one batch of pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// 0-indexed batch number.
    pub batch_index: usize,
    /// 0-indexed pages the batch covered.
    pub pages: Range<usize>,
    /// One entry per page that yielded an identifier, in page order.
    pub candidates: Vec<CandidateRecord>,
}

impl BatchOutcome {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Pages in the batch whose text named no identifier.
    pub fn misses(&self) -> usize {
        self.page_count().saturating_sub(self.candidates.len())
    }
}

/// A boxed stream of batch outcomes borrowing the engine pool.
pub type CandidateStream<'a> =
    Pin<Box<dyn Stream<Item = Result<BatchOutcome, ExtractError>> + Send + 'a>>;

/// Render and recognise a document of `total_pages` pages in batches of
/// `batch_size`, yielding each batch's candidates once it is complete.
pub fn candidate_stream<'a, E>(
    renderer: &BatchRenderer,
    total_pages: usize,
    pool: &'a EnginePool<E>,
    extractor: Arc<dyn FieldExtractor>,
    batch_size: usize,
    ocr_timeout: Option<Duration>,
) -> CandidateStream<'a>
where
    E: OcrEngine + 'static,
{
    let start = OutcomeCursor {
        batches: renderer.render_batches_of(total_pages, batch_size),
        pool,
        extractor,
        ocr_timeout,
        index: 0,
        next_page: 0,
    };
    Box::pin(stream::try_unfold(start, OutcomeCursor::advance))
}

struct OutcomeCursor<'a, E> {
    batches: BatchStream,
    pool: &'a EnginePool<E>,
    extractor: Arc<dyn FieldExtractor>,
    ocr_timeout: Option<Duration>,
    index: usize,
    next_page: usize,
}

impl<'a, E: OcrEngine + 'static> OutcomeCursor<'a, E> {
    async fn advance(mut self) -> Result<Option<(BatchOutcome, Self)>, ExtractError> {
        let Some(images) = self.batches.try_next().await? else {
            return Ok(None);
        };

        let pages = self.next_page..self.next_page + images.len();
        let candidates =
            ocr::recognize_batch(self.pool, &self.extractor, images, self.ocr_timeout).await?;

        let outcome = BatchOutcome {
            batch_index: self.index,
            pages: pages.clone(),
            candidates,
        };
        self.index += 1;
        self.next_page = pages.end;
        Ok(Some((outcome, self)))
    }
}
