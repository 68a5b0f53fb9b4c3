//! Configuration types for record extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Every knob lives in one cloneable
//! struct so the same config can be shared by the renderer, the OCR workers
//! and the reconciler.

use crate::error::ExtractError;
use crate::pipeline::fields::FieldExtractor;
use crate::pipeline::reconcile::DEFAULT_MAX_GAP;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Languages the original scans are written in (German, Italian, French, English).
pub const DEFAULT_LANGUAGES: &[&str] = &["deu", "ita", "fra", "eng"];

/// Configuration for a PDF-to-records extraction.
///
/// # Example
/// ```rust
/// use pdf_ocr_records::{ExtractionConfig, IdentifierBounds};
///
/// let config = ExtractionConfig::builder()
///     .dpi(300)
///     .parallelism(8)
///     .bounds(IdentifierBounds::new(Some(1), None))
///     .build()
///     .unwrap();
/// assert_eq!(config.parallelism, 8);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI. Range: 72–600. Default: 300.
    ///
    /// The same value is passed to the OCR engine as the image resolution so
    /// that glyph sizes are interpreted at the scale they were rendered.
    pub dpi: u32,

    /// Degree of parallelism: engine-pool size and page-batch size. Default:
    /// twice the number of available CPUs.
    pub parallelism: usize,

    /// OCR engine settings shared by every pooled engine.
    pub ocr: OcrSettings,

    /// Identifier range the gap-fill must cover. Default: observed range only.
    pub bounds: IdentifierBounds,

    /// Widest gap between two observed identifiers that gap-fill closes.
    /// Wider gaps are left open and counted. `None` fills every gap.
    /// Default: [`DEFAULT_MAX_GAP`].
    pub max_gap: Option<u64>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Per-page rendering timeout in seconds. `None` waits indefinitely.
    pub render_timeout_secs: Option<u64>,

    /// Per-page recognition timeout in seconds. `None` waits indefinitely.
    pub ocr_timeout_secs: Option<u64>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Field extractor applied to every page's text. `None` uses
    /// [`crate::pipeline::fields::RegexFieldExtractor::default`].
    pub field_extractor: Option<Arc<dyn FieldExtractor>>,

    /// Optional observer notified once per batch.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            parallelism: default_parallelism(),
            ocr: OcrSettings::default(),
            bounds: IdentifierBounds::default(),
            max_gap: Some(DEFAULT_MAX_GAP),
            password: None,
            render_timeout_secs: None,
            ocr_timeout_secs: None,
            download_timeout_secs: 120,
            field_extractor: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("parallelism", &self.parallelism)
            .field("ocr", &self.ocr)
            .field("bounds", &self.bounds)
            .field("max_gap", &self.max_gap)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "field_extractor",
                &self.field_extractor.as_ref().map(|_| "<dyn FieldExtractor>"),
            )
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn render_timeout(&self) -> Option<Duration> {
        self.render_timeout_secs.map(Duration::from_secs)
    }

    pub fn ocr_timeout(&self) -> Option<Duration> {
        self.ocr_timeout_secs.map(Duration::from_secs)
    }
}

/// `2 × available CPUs`, falling back to 2 when the count is unknown.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(2)
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn parallelism(mut self, n: usize) -> Self {
        self.config.parallelism = n;
        self
    }

    pub fn ocr(mut self, settings: OcrSettings) -> Self {
        self.config.ocr = settings;
        self
    }

    pub fn languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.ocr.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.ocr.tessdata_dir = Some(dir.into());
        self
    }

    pub fn bounds(mut self, bounds: IdentifierBounds) -> Self {
        self.config.bounds = bounds;
        self
    }

    pub fn max_gap(mut self, max_gap: Option<u64>) -> Self {
        self.config.max_gap = max_gap;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = Some(secs);
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = Some(secs);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn field_extractor(mut self, extractor: Arc<dyn FieldExtractor>) -> Self {
        self.config.field_extractor = Some(extractor);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if !(72..=600).contains(&c.dpi) {
            return Err(ExtractError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.parallelism == 0 {
            return Err(ExtractError::InvalidConfig(
                "Parallelism must be ≥ 1".into(),
            ));
        }
        if c.ocr.languages.is_empty() {
            return Err(ExtractError::InvalidConfig(
                "At least one OCR language is required".into(),
            ));
        }
        if let (Some(lo), Some(hi)) = (c.bounds.lower, c.bounds.upper) {
            if lo > hi {
                return Err(ExtractError::InvalidConfig(format!(
                    "Identifier bounds are inverted: {lo} > {hi}"
                )));
            }
        }
        if c.max_gap == Some(0) {
            return Err(ExtractError::InvalidConfig(
                "Gap limit must be at least 1 (omit it to fill every gap)".into(),
            ));
        }
        if c.render_timeout_secs == Some(0) || c.ocr_timeout_secs == Some(0) {
            return Err(ExtractError::InvalidConfig(
                "Timeouts must be at least one second".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Settings for the tesseract engines in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrSettings {
    /// Tesseract language codes, joined with `+` on the command line.
    pub languages: Vec<String>,
    /// Directory holding `*.traineddata`. `None` uses tesseract's default.
    pub tessdata_dir: Option<PathBuf>,
    /// Executable to run. Default: `tesseract` from `PATH`.
    pub binary: PathBuf,
    /// Page segmentation mode (`--psm`). Default: 3 (fully automatic).
    pub page_segmentation_mode: u8,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            languages: DEFAULT_LANGUAGES.iter().map(|s| s.to_string()).collect(),
            tessdata_dir: None,
            binary: PathBuf::from("tesseract"),
            page_segmentation_mode: 3,
        }
    }
}

impl OcrSettings {
    /// Language argument as tesseract expects it, e.g. `deu+ita+fra+eng`.
    pub fn language_arg(&self) -> String {
        self.languages.join("+")
    }
}

/// Inclusive identifier range the reconciled sequence must span.
///
/// An unset side falls back to the smallest / largest observed identifier.
/// A set side only ever *extends* the sequence with placeholders; observed
/// identifiers outside it are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierBounds {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
}

impl IdentifierBounds {
    pub fn new(lower: Option<i64>, upper: Option<i64>) -> Self {
        Self { lower, upper }
    }

    /// Only the observed range is filled.
    pub fn observed() -> Self {
        Self::default()
    }

    /// Resolve the fill range given the observed minimum and maximum.
    pub fn resolve(&self, observed: Option<(i64, i64)>) -> Option<(i64, i64)> {
        match (observed, self.lower, self.upper) {
            (Some((min, max)), lo, hi) => Some((
                lo.map_or(min, |lo| lo.min(min)),
                hi.map_or(max, |hi| hi.max(max)),
            )),
            (None, Some(lo), Some(hi)) => Some((lo, hi)),
            (None, _, _) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ExtractionConfig::builder().build().unwrap();
        assert_eq!(config.dpi, 300);
        assert!(config.parallelism >= 2);
        assert_eq!(config.ocr.language_arg(), "deu+ita+fra+eng");
        assert_eq!(config.bounds, IdentifierBounds::observed());
        assert!(config.render_timeout().is_none());
        assert_eq!(config.max_gap, Some(DEFAULT_MAX_GAP));
    }

    #[test]
    fn zero_gap_limit_is_rejected() {
        let err = ExtractionConfig::builder().max_gap(Some(0)).build().unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
        assert!(ExtractionConfig::builder().max_gap(None).build().is_ok());
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let err = ExtractionConfig::builder().parallelism(0).build().unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }

    #[test]
    fn dpi_out_of_range_is_rejected() {
        assert!(ExtractionConfig::builder().dpi(50).build().is_err());
        assert!(ExtractionConfig::builder().dpi(601).build().is_err());
        assert!(ExtractionConfig::builder().dpi(600).build().is_ok());
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = ExtractionConfig::builder()
            .bounds(IdentifierBounds::new(Some(10), Some(2)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("inverted"));
    }

    #[test]
    fn empty_language_list_is_rejected() {
        let err = ExtractionConfig::builder()
            .languages(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }

    #[test]
    fn timeouts_convert_to_durations() {
        let config = ExtractionConfig::builder()
            .ocr_timeout_secs(30)
            .render_timeout_secs(5)
            .build()
            .unwrap();
        assert_eq!(config.ocr_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.render_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn debug_redacts_password() {
        let config = ExtractionConfig::builder().password("hunter2").build().unwrap();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn bounds_resolution() {
        let observed = Some((4, 9));
        assert_eq!(IdentifierBounds::observed().resolve(observed), Some((4, 9)));
        assert_eq!(
            IdentifierBounds::new(Some(1), None).resolve(observed),
            Some((1, 9))
        );
        assert_eq!(
            IdentifierBounds::new(None, Some(12)).resolve(observed),
            Some((4, 12))
        );
        // A bound inside the observed range never shrinks it.
        assert_eq!(
            IdentifierBounds::new(Some(6), Some(7)).resolve(observed),
            Some((4, 9))
        );
        assert_eq!(IdentifierBounds::new(Some(1), Some(3)).resolve(None), Some((1, 3)));
        assert_eq!(IdentifierBounds::new(Some(1), None).resolve(None), None);
    }
}
