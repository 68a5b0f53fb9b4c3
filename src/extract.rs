//! Full-document extraction entry points.
//!
//! [`extract_records`] is the one-call API: resolve the input, start the OCR
//! engines, work through the document batch by batch, reconcile, shut the
//! engines down. [`extract_records_with`] runs the same loop over
//! caller-supplied collaborators, which is how tests and embedders plug in
//! their own rasteriser, engines or field extractor;
//! [`extract_records_with_pool`] adds the bounded pool shutdown.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::export;
use crate::output::{ExtractionOutput, ExtractionStats};
use crate::pipeline::fields::{FieldExtractor, RegexFieldExtractor};
use crate::pipeline::input;
use crate::pipeline::ocr::{self, OcrEngine};
use crate::pipeline::pool::EnginePool;
use crate::pipeline::reconcile::Reconciler;
use crate::pipeline::render::{BatchRenderer, PdfiumRasterizer, Rasterizer};
use crate::progress::{notify, BatchProgress};
use crate::stream::candidate_stream;
use futures::TryStreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long shutdown waits for engines still busy with an abandoned page.
pub const ENGINE_RELEASE_GRACE: Duration = Duration::from_secs(2);

/// Extract the record set from a PDF file or URL.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `input`: Local file path or HTTP/HTTPS URL to a PDF
/// * `config`: Extraction configuration
///
/// # Errors
/// Any render or recognition failure aborts the whole extraction; there is
/// no partial result. Pages without an identifier and duplicate identifiers
/// are not errors, they show up as placeholder records instead.
///
/// # Example
/// ```rust,no_run
/// use pdf_ocr_records::{extract_records, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::builder().parallelism(8).build()?;
/// let output = extract_records("survey.pdf", &config).await?;
/// for record in &output.records {
///     println!("{} → {:?}", record.identifier, record.score);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract_records(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let started = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;

    // ── Step 2: Start the OCR engines ────────────────────────────────────
    let pool = start_tesseract_pool(config).await?;

    // ── Step 3: Render, recognise, reconcile, release the engines ────────
    let rasterizer: Arc<dyn Rasterizer> =
        Arc::new(PdfiumRasterizer::new(config.password.clone()));
    let extractor = field_extractor(config);
    let mut output =
        extract_records_with_pool(resolved.path(), rasterizer, pool, extractor, config).await?;
    output.stats.total_duration_ms = started.elapsed().as_millis() as u64;
    info!(
        "Extraction complete: {} records ({} valid) from {} pages in {}ms",
        output.stats.records,
        output.stats.valid_records,
        output.stats.total_pages,
        output.stats.total_duration_ms
    );
    Ok(output)
}

/// Run [`extract_records_with`] on a pool this call owns, then shut the pool
/// down on every path.
///
/// A recognition that timed out may still hold its engine. Shutdown waits at
/// most [`ENGINE_RELEASE_GRACE`] for such leases and then detaches them, so a
/// hung engine cannot keep the caller waiting past its timeout.
pub async fn extract_records_with_pool<E>(
    document: &Path,
    rasterizer: Arc<dyn Rasterizer>,
    pool: EnginePool<E>,
    extractor: Arc<dyn FieldExtractor>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError>
where
    E: OcrEngine + 'static,
{
    let result = extract_records_with(document, rasterizer, &pool, extractor, config).await;
    if !pool.shutdown_within(ENGINE_RELEASE_GRACE).await {
        warn!("OCR engines still busy after the run; they are released as they return");
    }
    result
}

/// Run the extraction loop over a local document with injected collaborators.
///
/// Batches hold `config.parallelism` pages. The caller owns `pool` and is
/// responsible for shutting it down.
pub async fn extract_records_with<E>(
    document: &Path,
    rasterizer: Arc<dyn Rasterizer>,
    pool: &EnginePool<E>,
    extractor: Arc<dyn FieldExtractor>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError>
where
    E: OcrEngine + 'static,
{
    let started = Instant::now();
    let renderer = BatchRenderer::new(rasterizer, document, config.dpi)
        .with_timeout(config.render_timeout());

    let total_pages = renderer.total_pages().await?;
    info!(
        "Document has {} pages; batches of {} on {} engines",
        total_pages,
        config.parallelism,
        pool.size()
    );
    let callback = config.progress_callback.as_ref();
    notify(callback, |cb| cb.on_extraction_start(total_pages));

    let mut stats = ExtractionStats {
        total_pages,
        ..Default::default()
    };
    let mut candidates = Vec::new();
    let mut outcomes = candidate_stream(
        &renderer,
        total_pages,
        pool,
        extractor,
        config.parallelism,
        config.ocr_timeout(),
    );

    while let Some(outcome) = outcomes.try_next().await? {
        let progress = BatchProgress {
            batch_index: outcome.batch_index,
            batch_pages: outcome.page_count(),
            pages_done: outcome.pages.end,
            total_pages,
            candidates: outcome.candidates.len(),
        };
        debug!(
            "Batch {} done: pages {}–{}, {} candidates",
            outcome.batch_index + 1,
            outcome.pages.start + 1,
            outcome.pages.end,
            outcome.candidates.len()
        );

        stats.batches += 1;
        stats.pages_without_match += outcome.misses();
        candidates.extend(outcome.candidates);
        notify(callback, |cb| cb.on_batch_complete(&progress));
    }
    drop(outcomes);

    let reconciliation = Reconciler::new(config.bounds)
        .with_max_gap(config.max_gap)
        .reconcile(&candidates);
    let records = reconciliation.records;

    stats.candidates = candidates.len();
    stats.absorb(&reconciliation.stats);
    stats.records = records.len();
    stats.valid_records = records.valid_count();
    stats.total_duration_ms = started.elapsed().as_millis() as u64;
    notify(callback, |cb| {
        cb.on_extraction_complete(stats.records, stats.valid_records)
    });

    Ok(ExtractionOutput { records, stats })
}

/// Extract and write the records to `output_path` as CSV.
///
/// With `count_suffix` the file name gains a `_(valid of total)` suffix, e.g.
/// `results.csv` → `results_(41 of 52).csv`. Returns the path actually
/// written together with the run statistics.
pub async fn extract_to_csv(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    count_suffix: bool,
    config: &ExtractionConfig,
) -> Result<(PathBuf, ExtractionStats), ExtractError> {
    let output = extract_records(input_str, config).await?;
    let path = if count_suffix {
        export::counted_file_name(
            output_path.as_ref(),
            output.stats.valid_records,
            output.stats.records,
        )
    } else {
        output_path.as_ref().to_path_buf()
    };

    let records = output.records;
    let target = path.clone();
    tokio::task::spawn_blocking(move || export::export_csv(&records, &target))
        .await
        .map_err(|e| ExtractError::Internal(format!("CSV export task panicked: {e}")))??;

    Ok((path, output.stats))
}

/// Synchronous wrapper around [`extract_records`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_records_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_records(input_str, config))
}

/// Extract records from PDF bytes held in memory.
///
/// The bytes are written to a managed temporary file that is removed when
/// this function returns.
pub async fn extract_records_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| ExtractError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| ExtractError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    extract_records(&path, config).await
}

/// Count the pages of a PDF without starting any OCR engine.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<usize, ExtractError> {
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let rasterizer: Arc<dyn Rasterizer> =
        Arc::new(PdfiumRasterizer::new(config.password.clone()));
    BatchRenderer::new(rasterizer, resolved.path(), config.dpi)
        .total_pages()
        .await
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Create `config.parallelism` tesseract engines off the async workers;
/// each one shells out to verify its language data.
async fn start_tesseract_pool(
    config: &ExtractionConfig,
) -> Result<EnginePool<ocr::TesseractEngine>, ExtractError> {
    let size = config.parallelism;
    let settings = config.ocr.clone();
    let deadline = config.ocr_timeout();
    let started = Instant::now();

    let pool = tokio::task::spawn_blocking(move || ocr::tesseract_pool(size, &settings, deadline))
        .await
        .map_err(|e| ExtractError::Internal(format!("Engine start-up panicked: {e}")))??;

    debug!(
        "Started {} OCR engines in {}ms",
        pool.size(),
        started.elapsed().as_millis()
    );
    Ok(pool)
}

fn field_extractor(config: &ExtractionConfig) -> Arc<dyn FieldExtractor> {
    match &config.field_extractor {
        Some(extractor) => Arc::clone(extractor),
        None => Arc::new(RegexFieldExtractor::default()),
    }
}
