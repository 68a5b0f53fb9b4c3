//! Progress-callback trait for per-batch extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to be told
//! when each batch of pages has been rendered, recognised and parsed.
//!
//! Notifications are fire-and-forget: a callback that panics is caught and
//! logged, and the extraction carries on as if it had returned normally.
//!
//! # Example
//!
//! ```rust
//! use pdf_ocr_records::{BatchProgress, ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl ExtractionProgressCallback for Printer {
//!     fn on_batch_complete(&self, progress: &BatchProgress) {
//!         eprintln!("{:.1}% done", progress.percent_complete());
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(Printer) as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Snapshot handed to [`ExtractionProgressCallback::on_batch_complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// 0-indexed batch number.
    pub batch_index: usize,
    /// Pages in the batch that just finished.
    pub batch_pages: usize,
    /// Pages finished so far, including this batch.
    pub pages_done: usize,
    /// Pages in the whole document.
    pub total_pages: usize,
    /// Candidate records the batch produced.
    pub candidates: usize,
}

impl BatchProgress {
    /// Share of the document this batch represents, in percent.
    pub fn increment_percent(&self) -> f64 {
        percent(self.batch_pages, self.total_pages)
    }

    /// Share of the document finished so far, in percent.
    pub fn percent_complete(&self) -> f64 {
        percent(self.pages_done, self.total_pages)
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Called by the extraction pipeline as it works through the document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Calls are made from the driving task, one at a time.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once, after the page count is known and before any rendering.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called once per batch, after all of its pages were recognised.
    fn on_batch_complete(&self, progress: &BatchProgress) {
        let _ = progress;
    }

    /// Called once the record set has been reconciled.
    ///
    /// # Arguments
    /// * `records`: rows in the final record set
    /// * `valid`: rows passing the validity predicate
    fn on_extraction_complete(&self, records: usize, valid: usize) {
        let _ = (records, valid);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

/// Invoke `f` on the callback if one is configured, swallowing panics.
pub(crate) fn notify<F>(callback: Option<&ProgressCallback>, f: F)
where
    F: FnOnce(&dyn ExtractionProgressCallback),
{
    if let Some(cb) = callback {
        if catch_unwind(AssertUnwindSafe(|| f(cb.as_ref()))).is_err() {
            warn!("Progress callback panicked; ignoring");
        }
    }
}
