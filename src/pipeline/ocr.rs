//! Text recognition: run pooled OCR engines over a batch of page images.
//!
//! ## Engines
//!
//! [`OcrEngine`] is the seam between the pipeline and the recogniser. The
//! shipped implementation, [`TesseractEngine`], drives the `tesseract`
//! executable. Each engine owns a private scratch directory, so two engines
//! never touch the same file even when they recognise pages concurrently.
//! Recognition runs out of process so that a page past its deadline can be
//! killed outright.
//!
//! ## Per-page flow
//!
//! ```text
//! PageImage ──▶ pool.acquire() ──▶ spawn_blocking { recognize; release; extract }
//!                                          │
//!                                          └──▶ Option<CandidateRecord>
//! ```
//!
//! The engine is released before field extraction runs, so it is held only
//! for the duration of the recogniser call itself.

use crate::config::OcrSettings;
use crate::error::{EngineError, ExtractError};
use crate::pipeline::fields::FieldExtractor;
use crate::pipeline::pool::EnginePool;
use crate::pipeline::render::PageImage;
use crate::record::CandidateRecord;
use futures::future::try_join_all;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, trace, warn};

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

/// A text recogniser that can be checked out of an [`EnginePool`].
///
/// An engine is used by one caller at a time (`&mut self`) but may move
/// between threads between calls.
pub trait OcrEngine: Send {
    /// Recognise the text on one page image.
    fn recognize(&mut self, image: &PageImage) -> Result<String, EngineError>;
}

impl<T: OcrEngine + ?Sized> OcrEngine for Box<T> {
    fn recognize(&mut self, image: &PageImage) -> Result<String, EngineError> {
        (**self).recognize(image)
    }
}

/// [`OcrEngine`] backed by the `tesseract` command-line tool.
///
/// One engine is created per pool slot and lives until the pool shuts down.
/// Creation verifies the trained data for every configured language and
/// allocates the scratch directory; each page then only writes its image and
/// runs one recognition process. With a deadline set, a process still running
/// when it expires is killed, so a hung page never pins the engine.
///
/// `recognize` blocks. Call it from a blocking worker, as the pipeline does.
#[derive(Debug)]
pub struct TesseractEngine {
    settings: OcrSettings,
    /// `-l` argument, checked against the installed data at creation.
    languages: String,
    deadline: Option<Duration>,
    scratch: TempDir,
    slot: usize,
    pages_recognized: usize,
}

impl TesseractEngine {
    /// Prepare engine number `slot`.
    ///
    /// Verifies that the executable runs and that every configured language
    /// has its trained data installed, then allocates the scratch directory.
    pub fn create(slot: usize, settings: &OcrSettings) -> Result<Self, EngineError> {
        let installed = installed_languages(settings)?;
        let missing: Vec<&str> = settings
            .languages
            .iter()
            .map(String::as_str)
            .filter(|lang| !installed.contains(*lang))
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::Failed(format!(
                "language data not installed: {} (available: {})",
                missing.join(", "),
                sorted(&installed).join(", ")
            )));
        }

        let scratch = tempfile::Builder::new()
            .prefix(&format!("pdf2records-ocr-{slot}-"))
            .tempdir()?;
        let languages = settings.language_arg();
        debug!(
            "Engine {} ready: languages {}, scratch {}",
            slot,
            languages,
            scratch.path().display()
        );

        Ok(Self {
            settings: settings.clone(),
            languages,
            deadline: None,
            scratch,
            slot,
            pages_recognized: 0,
        })
    }

    /// Kill any recognition that runs longer than `deadline`.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Pages this engine has recognised since it was created.
    pub fn pages_recognized(&self) -> usize {
        self.pages_recognized
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.settings.binary);
        if let Some(dir) = &self.settings.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        cmd
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&mut self, image: &PageImage) -> Result<String, EngineError> {
        let image_path = self
            .scratch
            .path()
            .join(format!("page-{:05}.png", image.page_index));
        std::fs::write(&image_path, &image.bytes)?;

        let started = Instant::now();
        let mut cmd = self.command();
        cmd.arg(&image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .arg("--psm")
            .arg(self.settings.page_segmentation_mode.to_string())
            .arg("--dpi")
            .arg(image.dpi.to_string())
            .arg("-c")
            .arg(format!("debug_file={NULL_DEVICE}"));
        let output = run_to_deadline(cmd, self.deadline, &self.settings.binary);

        if let Err(e) = std::fs::remove_file(&image_path) {
            trace!("Could not remove {}: {}", image_path.display(), e);
        }

        let output = output.map_err(|e| {
            if let EngineError::TimedOut(limit) = &e {
                warn!(
                    "Engine {} killed tesseract on page {} after {:?}",
                    self.slot,
                    image.page_number(),
                    limit
                );
            }
            e
        })?;
        if !output.status.success() {
            return Err(EngineError::Failed(failure_detail(&output)));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        self.pages_recognized += 1;
        trace!(
            "Engine {} recognised page {} in {}ms ({} chars)",
            self.slot,
            image.page_number(),
            started.elapsed().as_millis(),
            text.len()
        );
        Ok(text)
    }
}

impl Drop for TesseractEngine {
    fn drop(&mut self) {
        debug!(
            "Engine {} released after {} pages",
            self.slot, self.pages_recognized
        );
    }
}

/// Run `cmd` to completion, killing it if it outlives `deadline`.
fn run_to_deadline(
    mut cmd: Command,
    deadline: Option<Duration>,
    binary: &Path,
) -> Result<Output, EngineError> {
    let Some(limit) = deadline else {
        return cmd.output().map_err(|e| spawn_error(binary, e));
    };

    let mut cmd = tokio::process::Command::from(cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let run = async move {
        let child = cmd.spawn()?;
        // Dropping the unfinished wait drops the child, which kills it.
        Ok::<_, std::io::Error>(tokio::time::timeout(limit, child.wait_with_output()).await)
    };

    let finished = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle.block_on(run),
        Err(_) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(run),
    };
    match finished {
        Ok(Ok(output)) => output.map_err(EngineError::Io),
        Ok(Err(_)) => Err(EngineError::TimedOut(limit)),
        Err(e) => Err(spawn_error(binary, e)),
    }
}

/// Languages reported by `tesseract --list-langs`.
fn installed_languages(settings: &OcrSettings) -> Result<HashSet<String>, EngineError> {
    let mut cmd = Command::new(&settings.binary);
    if let Some(dir) = &settings.tessdata_dir {
        cmd.arg("--tessdata-dir").arg(dir);
    }
    let output = cmd
        .arg("--list-langs")
        .output()
        .map_err(|e| spawn_error(&settings.binary, e))?;
    if !output.status.success() {
        return Err(EngineError::Failed(format!(
            "'--list-langs' failed: {}",
            failure_detail(&output)
        )));
    }

    // Older releases print the list on stderr.
    let mut listing = String::from_utf8_lossy(&output.stdout).into_owned();
    listing.push('\n');
    listing.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(parse_language_list(&listing))
}

/// Parse `--list-langs` output: a header line ending in `:` followed by one
/// language code per line.
fn parse_language_list(listing: &str) -> HashSet<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(':') && !line.contains(' '))
        .map(str::to_string)
        .collect()
}

fn sorted(set: &HashSet<String>) -> Vec<&str> {
    let mut v: Vec<&str> = set.iter().map(String::as_str).collect();
    v.sort_unstable();
    v
}

fn spawn_error(binary: &Path, err: std::io::Error) -> EngineError {
    if err.kind() == ErrorKind::NotFound {
        EngineError::Failed(format!(
            "executable '{}' not found; install tesseract-ocr or pass --tesseract",
            binary.display()
        ))
    } else {
        EngineError::Io(err)
    }
}

fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        format!("exited with {}: {}", output.status, stderr)
    }
}

/// Build one [`TesseractEngine`] per pool slot, each killing recognitions
/// that outlive `deadline`.
///
/// Blocks while each engine checks its language data; call from a blocking
/// context.
pub fn tesseract_pool(
    size: usize,
    settings: &OcrSettings,
    deadline: Option<Duration>,
) -> Result<EnginePool<TesseractEngine>, ExtractError> {
    EnginePool::new(size, |slot| {
        Ok(TesseractEngine::create(slot, settings)?.with_deadline(deadline))
    })
}

/// Recognise every page of a batch and extract candidate records.
///
/// All pages are submitted at once; the pool bounds how many recognise at the
/// same time. The result is in page order and contains one entry per page
/// whose text yielded an identifier. The first failing page fails the batch.
pub async fn recognize_batch<E>(
    pool: &EnginePool<E>,
    extractor: &Arc<dyn FieldExtractor>,
    images: Vec<PageImage>,
    timeout: Option<Duration>,
) -> Result<Vec<CandidateRecord>, ExtractError>
where
    E: OcrEngine + 'static,
{
    let started = Instant::now();
    let pages = images.len();

    let results = try_join_all(
        images
            .into_iter()
            .map(|image| recognize_page(pool, Arc::clone(extractor), image, timeout)),
    )
    .await?;

    let candidates: Vec<CandidateRecord> = results.into_iter().flatten().collect();
    info!(
        "Recognised {} pages in {}ms → {} candidates",
        pages,
        started.elapsed().as_millis(),
        candidates.len()
    );
    Ok(candidates)
}

/// Recognise one page on a pooled engine.
///
/// `Ok(None)` means the page was read but named no identifier.
pub async fn recognize_page<E>(
    pool: &EnginePool<E>,
    extractor: Arc<dyn FieldExtractor>,
    image: PageImage,
    timeout: Option<Duration>,
) -> Result<Option<CandidateRecord>, ExtractError>
where
    E: OcrEngine + 'static,
{
    let page = image.page_number();
    let mut lease = pool.acquire().await?;

    let task = tokio::task::spawn_blocking(move || {
        let text = lease.recognize(&image);
        drop(lease);
        text.map(|text| {
            let candidate = extractor.extract_candidate(&text, image.page_index);
            if candidate.is_none() {
                debug!("Page {} has no identifier", image.page_number());
            }
            candidate
        })
    });

    let joined = match timeout {
        Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
            warn!("Recognition of page {} exceeded {:?}", page, limit);
            ExtractError::RecognitionTimeout {
                page,
                secs: limit.as_secs(),
            }
        })?,
        None => task.await,
    };

    joined
        .map_err(|e| ExtractError::Internal(format!("OCR task for page {page} panicked: {e}")))?
        .map_err(|e| match e {
            EngineError::TimedOut(limit) => ExtractError::RecognitionTimeout {
                page,
                secs: limit.as_secs(),
            },
            other => ExtractError::RecognitionFailed {
                page,
                detail: other.to_string(),
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fields::RegexFieldExtractor;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns canned text per page and tracks concurrent use.
    struct ScriptedEngine {
        texts: Arc<HashMap<usize, String>>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl OcrEngine for ScriptedEngine {
        fn recognize(&mut self, image: &PageImage) -> Result<String, EngineError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);

            match self.texts.get(&image.page_index).map(String::as_str) {
                Some("FAIL") => Err(EngineError::Failed("image too small".into())),
                Some("PANIC") => panic!("engine crashed"),
                Some(text) => Ok(text.to_string()),
                None => Ok(String::new()),
            }
        }
    }

    struct Fixture {
        pool: EnginePool<ScriptedEngine>,
        peak: Arc<AtomicUsize>,
    }

    fn fixture(size: usize, texts: &[(usize, &str)], delay: Duration) -> Fixture {
        let texts: Arc<HashMap<usize, String>> = Arc::new(
            texts
                .iter()
                .map(|(page, text)| (*page, text.to_string()))
                .collect(),
        );
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = {
            let (texts, active, peak) = (texts.clone(), active.clone(), peak.clone());
            EnginePool::new(size, move |_| {
                Ok(ScriptedEngine {
                    texts: Arc::clone(&texts),
                    active: Arc::clone(&active),
                    peak: Arc::clone(&peak),
                    delay,
                })
            })
            .unwrap()
        };
        Fixture { pool, peak }
    }

    fn images(pages: std::ops::Range<usize>) -> Vec<PageImage> {
        pages.map(|i| PageImage::new(i, 300, vec![0u8; 8])).collect()
    }

    fn extractor() -> Arc<dyn FieldExtractor> {
        Arc::new(RegexFieldExtractor::default())
    }

    #[test]
    fn parses_language_listing() {
        let listing = "List of available languages in \"/usr/share/tessdata/\" (4):\n\
                       deu\neng\nfra\nosd\n";
        let langs = parse_language_list(listing);
        assert_eq!(langs.len(), 4);
        assert!(langs.contains("deu"));
        assert!(langs.contains("osd"));
        assert!(parse_language_list("").is_empty());
    }

    #[test]
    fn missing_executable_is_reported() {
        let settings = OcrSettings {
            binary: PathBuf::from("/nonexistent/tesseract-for-tests"),
            ..OcrSettings::default()
        };
        let err = TesseractEngine::create(0, &settings).unwrap_err();
        assert!(err.to_string().contains("not found"), "got: {err}");
    }

    #[tokio::test]
    async fn batch_yields_candidates_in_page_order() {
        let fx = fixture(
            3,
            &[
                (0, "Uferabschnitt Nr. 1\nNOTE = 90"),
                (1, "Inhaltsverzeichnis"),
                (2, "de segment: 2\nTOTALE = 75"),
                (3, "Uferabschnitt Nr. 3"),
            ],
            Duration::from_millis(5),
        );

        let candidates = recognize_batch(&fx.pool, &extractor(), images(0..4), None)
            .await
            .unwrap();
        assert_eq!(
            candidates,
            vec![
                CandidateRecord::new(1, Some(90), 0),
                CandidateRecord::new(2, Some(75), 2),
                CandidateRecord::new(3, None, 3),
            ]
        );
        assert_eq!(fx.pool.available(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded_by_pool_size() {
        let fx = fixture(2, &[], Duration::from_millis(30));
        recognize_batch(&fx.pool, &extractor(), images(0..8), None)
            .await
            .unwrap();
        assert!(fx.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(fx.pool.in_use(), 0);
    }

    #[tokio::test]
    async fn engine_failure_names_the_page() {
        let fx = fixture(2, &[(2, "FAIL")], Duration::ZERO);
        let err = recognize_batch(&fx.pool, &extractor(), images(0..4), None)
            .await
            .unwrap_err();
        match err {
            ExtractError::RecognitionFailed { page, detail } => {
                assert_eq!(page, 3);
                assert!(detail.contains("image too small"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn engine_panic_is_internal_and_returns_engine() {
        let fx = fixture(1, &[(0, "PANIC")], Duration::ZERO);
        let err = recognize_page(
            &fx.pool,
            extractor(),
            PageImage::new(0, 300, Vec::new()),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExtractError::Internal(_)));
        assert_eq!(fx.pool.available(), 1);
    }

    #[tokio::test]
    async fn slow_recognition_times_out() {
        let fx = fixture(1, &[], Duration::from_millis(500));
        let err = recognize_page(
            &fx.pool,
            extractor(),
            PageImage::new(6, 300, Vec::new()),
            Some(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExtractError::RecognitionTimeout { page: 7, .. }));

        // The abandoned call still hands its engine back once it finishes.
        fx.pool.shutdown().await;
        assert_eq!(fx.pool.in_use(), 0);
    }

    /// Stand-in `tesseract`: logs its first argument, lists the default
    /// languages and otherwise runs `recognise`.
    #[cfg(unix)]
    fn fake_tesseract(dir: &Path, recognise: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("calls.log");
        let script = format!(
            "#!/bin/sh\n\
             echo \"$1\" >> '{}'\n\
             if [ \"$1\" = \"--list-langs\" ]; then\n\
             printf 'List of available languages (4):\\ndeu\\neng\\nfra\\nita\\n'\n\
             exit 0\n\
             fi\n\
             {recognise}\n",
            log.display()
        );
        let path = dir.join("tesseract");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn engine_checks_languages_once_and_serves_many_pages() {
        let dir = tempfile::tempdir().unwrap();
        let settings = OcrSettings {
            binary: fake_tesseract(dir.path(), "echo 'Uferabschnitt Nr. 5'"),
            ..OcrSettings::default()
        };

        let mut engine = TesseractEngine::create(0, &settings).unwrap();
        for page in 0..3 {
            let text = engine
                .recognize(&PageImage::new(page, 300, vec![0u8; 8]))
                .unwrap();
            assert!(text.contains("Uferabschnitt Nr. 5"), "got: {text}");
        }
        assert_eq!(engine.pages_recognized(), 3);

        let log = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert_eq!(log.lines().filter(|l| *l == "--list-langs").count(), 1);
        assert_eq!(log.lines().count(), 4);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hung_tesseract_is_killed_and_frees_its_engine() {
        let dir = tempfile::tempdir().unwrap();
        let settings = OcrSettings {
            binary: fake_tesseract(dir.path(), "exec sleep 30"),
            ..OcrSettings::default()
        };
        let limit = Duration::from_millis(300);
        let pool = tesseract_pool(1, &settings, Some(limit)).unwrap();

        let started = Instant::now();
        let err = recognize_page(
            &pool,
            extractor(),
            PageImage::new(0, 300, vec![0u8; 8]),
            Some(limit),
        )
        .await
        .unwrap_err();
        assert!(
            matches!(err, ExtractError::RecognitionTimeout { page: 1, .. }),
            "got: {err:?}"
        );

        tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("the killed process must hand its engine back");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(pool.in_use(), 0);
    }
}
