//! Pipeline stages for PDF-to-records extraction.
//!
//! Each submodule implements one step; the collaborators at the edges
//! ([`render::Rasterizer`], [`ocr::OcrEngine`], [`fields::FieldExtractor`])
//! are traits so tests can swap in doubles without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ ocr (pool) ──▶ fields ──▶ reconcile
//! (URL/path) (pdfium)  (tesseract)    (regex)    (dedup, order, gap-fill)
//! ```
//!
//! 1. [`input`]: canonicalise the user-supplied path or URL to a local file
//! 2. [`render`]: rasterise pages in batches; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`]: greyscale PNG encoding of each rendered page
//! 4. [`pool`]: fixed set of OCR engines handed out one lease at a time
//! 5. [`ocr`]: recognise each page of a batch on a leased engine
//! 6. [`fields`]: pull the identifier and score out of the page text
//! 7. [`reconcile`]: repair the candidate set into a gap-free sequence

pub mod encode;
pub mod fields;
pub mod input;
pub mod ocr;
pub mod pool;
pub mod reconcile;
pub mod render;
