//! # pdf-ocr-records
//!
//! Turn a large scanned PDF into an ordered, gap-free table of records.
//!
//! Every page of the document is rasterised, read by a pool of OCR engines and
//! searched for two numbers: a record **identifier** and a **score**. The
//! per-page results arrive unordered, sometimes twice, sometimes not at all;
//! a reconciliation pass turns them into one canonical sequence in which
//! every identifier in range appears exactly once.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Render     rasterise a batch of pages via pdfium (spawn_blocking)
//!  ├─ 3. Recognise  one pooled tesseract engine per page, N in flight
//!  ├─ 4. Extract    identifier + score by regular expression
//!  ├─ 5. Reconcile  collapse duplicates, order, fill gaps
//!  └─ 6. Output     RecordSet + stats (CSV / JSON via the CLI)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_ocr_records::{extract_records, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::default();
//!     let output = extract_records("survey.pdf", &config).await?;
//!     eprintln!(
//!         "{} records, {} valid",
//!         output.stats.records, output.stats.valid_records
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Runtime requirements
//!
//! * a pdfium shared library (`PDFIUM_LIB_PATH`, the working directory, or
//!   the system library path)
//! * the `tesseract` executable with trained data for the configured
//!   languages (default `deu+ita+fra+eng`)
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2records` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf-ocr-records = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, IdentifierBounds, OcrSettings};
pub use error::{EngineError, ExtractError, RasterError};
pub use export::{counted_file_name, export_csv, write_csv};
pub use extract::{
    extract_records, extract_records_from_bytes, extract_records_sync, extract_records_with,
    extract_records_with_pool, extract_to_csv, inspect, ENGINE_RELEASE_GRACE,
};
pub use output::{ExtractionOutput, ExtractionStats};
pub use pipeline::fields::{FieldExtractor, RegexFieldExtractor};
pub use pipeline::ocr::{OcrEngine, TesseractEngine};
pub use pipeline::pool::{EngineLease, EnginePool};
pub use pipeline::reconcile::{Reconciler, Reconciliation};
pub use pipeline::render::{PageImage, PdfiumRasterizer, Rasterizer};
pub use progress::{
    BatchProgress, ExtractionProgressCallback, NoopProgressCallback, ProgressCallback,
};
pub use record::{CandidateRecord, Record, RecordSet};
pub use stream::{candidate_stream, BatchOutcome};
