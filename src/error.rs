//! Error types for the pdf-ocr-records library.
//!
//! Three layers of errors reflect three layers of the pipeline:
//!
//! * [`ExtractError`] is **fatal**: the extraction cannot produce a
//!   [`crate::record::RecordSet`] (unreadable document, a page that will not
//!   rasterise, a failed or hung OCR call, a closed engine pool). Returned as
//!   `Err(ExtractError)` from the top-level `extract*` functions. There is no
//!   partial-result mode: either every page is processed or nothing is returned.
//!
//! * [`RasterError`] and [`EngineError`]: raised by the pluggable
//!   collaborators ([`crate::pipeline::render::Rasterizer`] and
//!   [`crate::pipeline::ocr::OcrEngine`]). The pipeline attaches the page
//!   number and converts them into the matching [`ExtractError`] variant.
//!
//! A page whose text matches no identifier is *not* an error. It simply
//! contributes no candidate record. Duplicate identifiers are likewise encoded
//! in the data (a record with no score) rather than surfaced here.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf-ocr-records library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Document / rendering errors ───────────────────────────────────────
    /// The source document could not be opened (corrupt, encrypted, truncated).
    #[error("Cannot read document '{path}': {detail}")]
    DocumentUnreadable { path: PathBuf, detail: String },

    /// A specific page could not be rasterised. `page` is 1-indexed.
    #[error("Rendering failed for page {page}: {detail}")]
    PageRenderFailed { page: usize, detail: String },

    /// Rendering a page exceeded the configured per-page timeout.
    #[error("Rendering page {page} timed out after {secs}s")]
    RenderTimeout { page: usize, secs: u64 },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The OCR engines could not be created (binary missing, language data absent).
    #[error("OCR engine unavailable: {detail}")]
    EngineUnavailable { detail: String },

    /// An engine was requested after the pool was shut down.
    #[error("OCR engine pool is closed")]
    PoolClosed,

    /// Recognition failed for a page. `page` is 1-indexed.
    #[error("Text recognition failed for page {page}: {detail}")]
    RecognitionFailed { page: usize, detail: String },

    /// Recognition exceeded the configured per-page timeout.
    #[error("Text recognition on page {page} timed out after {secs}s")]
    RecognitionTimeout { page: usize, secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library next to the\n\
executable, or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (a worker task panicked, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Classify a rasteriser failure raised while opening or counting pages.
    pub(crate) fn unreadable(err: RasterError, path: &std::path::Path) -> Self {
        match err {
            RasterError::Binding(detail) => ExtractError::PdfiumBindingFailed(detail),
            RasterError::Open(detail) | RasterError::Page(detail) => {
                ExtractError::DocumentUnreadable {
                    path: path.to_path_buf(),
                    detail,
                }
            }
        }
    }

    /// Classify a rasteriser failure raised while rendering page `page` (1-indexed).
    pub(crate) fn render_failed(err: RasterError, page: usize) -> Self {
        match err {
            RasterError::Binding(detail) => ExtractError::PdfiumBindingFailed(detail),
            RasterError::Open(detail) | RasterError::Page(detail) => {
                ExtractError::PageRenderFailed { page, detail }
            }
        }
    }
}

/// Failure reported by a [`crate::pipeline::render::Rasterizer`].
#[derive(Debug, Clone, Error)]
pub enum RasterError {
    /// The rendering backend itself is unavailable.
    #[error("rendering backend unavailable: {0}")]
    Binding(String),

    /// The document could not be opened.
    #[error("cannot open document: {0}")]
    Open(String),

    /// The document opened but this page could not be rasterised.
    #[error("{0}")]
    Page(String),
}

/// Failure reported by a [`crate::pipeline::ocr::OcrEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// Scratch-file or process I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine ran but reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The engine gave up on a page at its deadline and stopped the work.
    #[error("recognition stopped after {0:?}")]
    TimedOut(std::time::Duration),
}
