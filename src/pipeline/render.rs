//! PDF rasterisation: turn pages into PNG images, one batch at a time.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is CPU-bound
//! and not async-aware. Every page render runs on Tokio's blocking pool so the
//! async workers driving OCR and progress reporting never stall.
//!
//! ## Why reopen the document per page?
//!
//! A pdfium document handle cannot be shared between threads. Opening the
//! file once per page lets every page of a batch render on its own blocking
//! thread; the source is only ever read, so concurrent opens are safe.
//!
//! ## Batching
//!
//! [`BatchRenderer::render_batches`] is a lazy stream: nothing is rendered
//! until the consumer polls, and only one batch of images is alive at a time.
//! Within a batch all pages render concurrently and the batch is yielded once
//! every page is done, ordered by page index rather than completion time.

use crate::error::{ExtractError, RasterError};
use crate::pipeline::encode;
use futures::future::try_join_all;
use futures::stream::{self, Stream};
use pdfium_render::prelude::*;
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Environment variable pointing at an existing pdfium shared library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// One rendered page, ready for recognition.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 0-indexed page this image was rendered from.
    pub page_index: usize,
    /// Resolution the page was rendered at; forwarded to the OCR engine.
    pub dpi: u32,
    /// Encoded image bytes (PNG for [`PdfiumRasterizer`]).
    pub bytes: Vec<u8>,
}

impl PageImage {
    pub fn new(page_index: usize, dpi: u32, bytes: Vec<u8>) -> Self {
        Self {
            page_index,
            dpi,
            bytes,
        }
    }

    /// 1-indexed page number, as shown to users.
    pub fn page_number(&self) -> usize {
        self.page_index + 1
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("page_index", &self.page_index)
            .field("dpi", &self.dpi)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// Turns document pages into images.
///
/// Implementations are called from blocking worker threads, possibly for
/// several pages of the same document at once, and must be deterministic for
/// a given `(path, page_index, dpi)`.
pub trait Rasterizer: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self, path: &Path) -> Result<usize, RasterError>;

    /// Render one 0-indexed page at `dpi`.
    fn render_page(&self, path: &Path, page_index: usize, dpi: u32)
        -> Result<PageImage, RasterError>;
}

/// [`Rasterizer`] backed by pdfium.
///
/// The library is located, in order, at `$PDFIUM_LIB_PATH`, next to the
/// current working directory, or in the system library path.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
    password: Option<String>,
}

impl PdfiumRasterizer {
    pub fn new(password: Option<String>) -> Self {
        Self {
            library_path: std::env::var_os(PDFIUM_LIB_PATH_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            password,
        }
    }

    /// Bind to a specific pdfium library file.
    pub fn with_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    fn bind(&self) -> Result<Pdfium, RasterError> {
        let bindings = match &self.library_path {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| RasterError::Binding(format!("{:?}", e)))?;

        Ok(Pdfium::new(bindings))
    }

    // The password must outlive the document, so it borrows `self` for `'a` too.
    fn open<'a>(&'a self, pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, RasterError> {
        pdfium
            .load_pdf_from_file(path, self.password.as_deref())
            .map_err(|e| {
                let detail = format!("{:?}", e);
                if detail.contains("Password") || detail.contains("password") {
                    if self.password.is_some() {
                        RasterError::Open("wrong password".into())
                    } else {
                        RasterError::Open("document is encrypted; provide --password".into())
                    }
                } else {
                    RasterError::Open(detail)
                }
            })
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn page_count(&self, path: &Path) -> Result<usize, RasterError> {
        let pdfium = self.bind()?;
        let document = self.open(&pdfium, path)?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(
        &self,
        path: &Path,
        page_index: usize,
        dpi: u32,
    ) -> Result<PageImage, RasterError> {
        let pdfium = self.bind()?;
        let document = self
            .open(&pdfium, path)
            .map_err(|e| RasterError::Page(format!("reopening document failed: {e}")))?;

        let index = page_index
            .try_into()
            .map_err(|_| RasterError::Page(format!("page index {page_index} out of range")))?;
        let page = document
            .pages()
            .get(index)
            .map_err(|e| RasterError::Page(format!("{:?}", e)))?;

        // PDF user space is 72 units per inch.
        let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RasterError::Page(format!("{:?}", e)))?;

        let image = bitmap.as_image();
        let bytes = encode::encode_png(&image)
            .map_err(|e| RasterError::Page(format!("PNG encoding failed: {e}")))?;

        debug!(
            "Rendered page {} → {}x{} px, {} bytes",
            page_index + 1,
            image.width(),
            image.height(),
            bytes.len()
        );
        Ok(PageImage::new(page_index, dpi, bytes))
    }
}

/// A boxed, lazily-evaluated stream of page batches.
pub type BatchStream = Pin<Box<dyn Stream<Item = Result<Vec<PageImage>, ExtractError>> + Send>>;

/// Split `total_pages` into contiguous ranges of at most `batch_size` pages.
///
/// A `batch_size` of zero is treated as one.
pub fn batch_ranges(total_pages: usize, batch_size: usize) -> Vec<Range<usize>> {
    let size = batch_size.max(1);
    (0..total_pages)
        .step_by(size)
        .map(|start| start..(start + size).min(total_pages))
        .collect()
}

/// Renders a document as a sequence of page batches.
#[derive(Clone)]
pub struct BatchRenderer {
    rasterizer: Arc<dyn Rasterizer>,
    document: PathBuf,
    dpi: u32,
    timeout: Option<Duration>,
}

impl fmt::Debug for BatchRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRenderer")
            .field("document", &self.document)
            .field("dpi", &self.dpi)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BatchRenderer {
    pub fn new(rasterizer: Arc<dyn Rasterizer>, document: impl Into<PathBuf>, dpi: u32) -> Self {
        Self {
            rasterizer,
            document: document.into(),
            dpi,
            timeout: None,
        }
    }

    /// Abort a page render that takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn document(&self) -> &Path {
        &self.document
    }

    /// Number of pages in the document.
    pub async fn total_pages(&self) -> Result<usize, ExtractError> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let path = self.document.clone();

        tokio::task::spawn_blocking(move || rasterizer.page_count(&path))
            .await
            .map_err(|e| ExtractError::Internal(format!("Page-count task panicked: {}", e)))?
            .map_err(|e| ExtractError::unreadable(e, &self.document))
    }

    /// Lazily render the whole document in batches of `batch_size` pages.
    ///
    /// The page count is read when the stream is first polled.
    pub fn render_batches(&self, batch_size: usize) -> BatchStream {
        self.batches(None, batch_size)
    }

    /// Like [`BatchRenderer::render_batches`] when the page count is already known.
    pub fn render_batches_of(&self, total_pages: usize, batch_size: usize) -> BatchStream {
        self.batches(Some(total_pages), batch_size)
    }

    fn batches(&self, total_pages: Option<usize>, batch_size: usize) -> BatchStream {
        let start = BatchCursor {
            renderer: self.clone(),
            total: total_pages,
            next: 0,
            size: batch_size.max(1),
        };
        Box::pin(stream::try_unfold(start, BatchCursor::advance))
    }

    /// Render `pages` concurrently and return them in ascending page order.
    ///
    /// The first failing page fails the whole batch.
    pub async fn render_batch(&self, pages: Range<usize>) -> Result<Vec<PageImage>, ExtractError> {
        let started = Instant::now();
        let first = pages.start;
        let count = pages.len();

        let images = try_join_all(pages.map(|page_index| self.render_one(page_index))).await?;

        info!(
            "Rendered pages {}–{} in {}ms",
            first + 1,
            first + count,
            started.elapsed().as_millis()
        );
        Ok(images)
    }

    async fn render_one(&self, page_index: usize) -> Result<PageImage, ExtractError> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let path = self.document.clone();
        let dpi = self.dpi;
        let page = page_index + 1;

        let task =
            tokio::task::spawn_blocking(move || rasterizer.render_page(&path, page_index, dpi));

        let joined = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
                ExtractError::RenderTimeout {
                    page,
                    secs: limit.as_secs(),
                }
            })?,
            None => task.await,
        };

        joined
            .map_err(|e| ExtractError::Internal(format!("Render task for page {page} panicked: {e}")))?
            .map_err(|e| ExtractError::render_failed(e, page))
    }
}

/// Position of a [`BatchStream`] within the document.
struct BatchCursor {
    renderer: BatchRenderer,
    total: Option<usize>,
    next: usize,
    size: usize,
}

impl BatchCursor {
    async fn advance(mut self) -> Result<Option<(Vec<PageImage>, Self)>, ExtractError> {
        let total = match self.total {
            Some(total) => total,
            None => {
                let total = self.renderer.total_pages().await?;
                self.total = Some(total);
                total
            }
        };
        if self.next >= total {
            return Ok(None);
        }

        let end = (self.next + self.size).min(total);
        let batch = self.renderer.render_batch(self.next..end).await?;
        self.next = end;
        Ok(Some((batch, self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Renders page `i` as the bytes of `"page {i}"`; later pages finish first.
    struct SlowFirstRasterizer {
        pages: usize,
        fail_on: Option<usize>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowFirstRasterizer {
        fn new(pages: usize) -> Self {
            Self {
                pages,
                fail_on: None,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl Rasterizer for SlowFirstRasterizer {
        fn page_count(&self, _path: &Path) -> Result<usize, RasterError> {
            Ok(self.pages)
        }

        fn render_page(
            &self,
            _path: &Path,
            page_index: usize,
            dpi: u32,
        ) -> Result<PageImage, RasterError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5 * (4 - (page_index % 4)) as u64));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on == Some(page_index) {
                return Err(RasterError::Page("corrupt content stream".into()));
            }
            Ok(PageImage::new(page_index, dpi, format!("page {page_index}").into_bytes()))
        }
    }

    struct UnreadableRasterizer;

    impl Rasterizer for UnreadableRasterizer {
        fn page_count(&self, _path: &Path) -> Result<usize, RasterError> {
            Err(RasterError::Open("not a PDF".into()))
        }

        fn render_page(&self, _: &Path, _: usize, _: u32) -> Result<PageImage, RasterError> {
            unreachable!("nothing to render")
        }
    }

    #[test]
    fn batch_ranges_cover_every_page_once() {
        let ranges = batch_ranges(10, 3);
        assert_eq!(ranges, vec![0..3, 3..6, 6..9, 9..10]);
        assert_eq!(batch_ranges(6, 3), vec![0..3, 3..6]);
        assert_eq!(batch_ranges(2, 8), vec![0..2]);
        assert!(batch_ranges(0, 4).is_empty());
        assert_eq!(batch_ranges(2, 0), vec![0..1, 1..2]);
    }

    #[test]
    fn page_image_debug_hides_bytes() {
        let img = PageImage::new(4, 300, vec![0; 1024]);
        let dbg = format!("{img:?}");
        assert!(dbg.contains("<1024 bytes>"));
        assert_eq!(img.page_number(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn batches_are_complete_and_ordered() {
        let renderer = BatchRenderer::new(Arc::new(SlowFirstRasterizer::new(10)), "doc.pdf", 200);

        let batches: Vec<Vec<PageImage>> = renderer
            .render_batches(4)
            .map(|b| b.expect("batch should render"))
            .collect()
            .await;

        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);

        let order: Vec<usize> = batches.iter().flatten().map(|p| p.page_index).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
        assert!(batches.iter().flatten().all(|p| p.dpi == 200));
        assert_eq!(batches[1][0].bytes, b"page 4".to_vec());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pages_within_a_batch_render_concurrently() {
        let rasterizer = Arc::new(SlowFirstRasterizer::new(8));
        let renderer = BatchRenderer::new(rasterizer.clone(), "doc.pdf", 150);

        let batch = renderer.render_batch(0..4).await.unwrap();
        assert_eq!(batch.len(), 4);
        assert!(
            rasterizer.peak.load(Ordering::SeqCst) > 1,
            "expected parallel fan-out within a batch"
        );
        assert!(rasterizer.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn failing_page_aborts_the_stream() {
        let mut rasterizer = SlowFirstRasterizer::new(9);
        rasterizer.fail_on = Some(4);
        let renderer = BatchRenderer::new(Arc::new(rasterizer), "doc.pdf", 150);

        let results: Vec<_> = renderer.render_batches(3).collect().await;
        assert_eq!(results.len(), 2, "stream must stop after the failure");
        assert_eq!(results[0].as_ref().unwrap().len(), 3);
        match &results[1] {
            Err(ExtractError::PageRenderFailed { page, .. }) => assert_eq!(*page, 5),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreadable_document_fails_page_count() {
        let renderer = BatchRenderer::new(Arc::new(UnreadableRasterizer), "doc.pdf", 150);
        let err = renderer.total_pages().await.unwrap_err();
        assert!(matches!(err, ExtractError::DocumentUnreadable { .. }));

        let results: Vec<_> = renderer.render_batches(4).collect().await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ExtractError::DocumentUnreadable { .. })));
    }

    #[tokio::test]
    async fn empty_document_yields_no_batches() {
        let renderer = BatchRenderer::new(Arc::new(SlowFirstRasterizer::new(0)), "doc.pdf", 150);
        let results: Vec<_> = renderer.render_batches(4).collect().await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn slow_page_hits_the_render_timeout() {
        struct HangingRasterizer;
        impl Rasterizer for HangingRasterizer {
            fn page_count(&self, _: &Path) -> Result<usize, RasterError> {
                Ok(1)
            }
            fn render_page(&self, _: &Path, i: usize, dpi: u32) -> Result<PageImage, RasterError> {
                std::thread::sleep(Duration::from_millis(1500));
                Ok(PageImage::new(i, dpi, Vec::new()))
            }
        }

        let renderer = BatchRenderer::new(Arc::new(HangingRasterizer), "doc.pdf", 150)
            .with_timeout(Some(Duration::from_millis(50)));
        let err = renderer.render_batch(0..1).await.unwrap_err();
        assert!(matches!(err, ExtractError::RenderTimeout { page: 1, .. }));
    }

    #[test]
    fn missing_pdfium_library_is_a_binding_error() {
        let rasterizer = PdfiumRasterizer::new(Some("secret".into()))
            .with_library("/nonexistent/libpdfium-for-tests.so");
        let path = Path::new("doc.pdf");

        let err = rasterizer.page_count(path).unwrap_err();
        assert!(matches!(err, RasterError::Binding(_)), "got: {err:?}");
        let err = rasterizer.render_page(path, 0, 150).unwrap_err();
        assert!(matches!(err, RasterError::Binding(_)), "got: {err:?}");
    }
}
