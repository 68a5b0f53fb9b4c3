//! CLI binary for pdf-ocr-records.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_ocr_records::{
    extract_records, extract_to_csv, inspect, BatchProgress, ExtractionConfig, ExtractionOutput,
    ExtractionProgressCallback, ExtractionStats, IdentifierBounds, OcrSettings, ProgressCallback,
    RecordSet, RegexFieldExtractor,
};
use pdf_ocr_records::pipeline::reconcile::DEFAULT_MAX_GAP;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner while the document is opened and
/// the engines start, then a page bar advanced once per finished batch.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Starting OCR engines…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {percent:>3}%  {pos}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Parsing PDF");
        self.bar.reset_eta();
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reading {total_pages} pages…"))
        ));
    }

    fn on_batch_complete(&self, progress: &BatchProgress) {
        let first = progress.pages_done - progress.batch_pages + 1;
        self.bar.println(format!(
            "  {} Pages {:>4}–{:<4}  {}  {}",
            green("✓"),
            first,
            progress.pages_done,
            dim(&format!("{:>3} records", progress.candidates)),
            dim(&format!("+{:.1}%", progress.increment_percent())),
        ));
        self.bar.set_position(progress.pages_done as u64);
    }

    fn on_extraction_complete(&self, records: usize, valid: usize) {
        self.bar.finish_and_clear();
        let icon = if valid == records { green("✔") } else { cyan("⚠") };
        eprintln!(
            "{} {} of {} records detected",
            icon,
            bold(&valid.to_string()),
            records
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Print the record table
  pdf2records survey.pdf

  # Export to CSV; file name gains the "_(valid of total)" suffix
  pdf2records survey.pdf -o results/thunersee.csv --count-suffix

  # Identifiers are known to run from 1 to 240
  pdf2records survey.pdf --first-id 1 --last-id 240 -o out.csv

  # Different sheet layout
  pdf2records --identifier-pattern 'Section (\d+)' --score-pattern 'Total: (\d+)' scan.pdf

  # Page count only
  pdf2records --inspect-only survey.pdf

  # JSON (records + stats)
  pdf2records --json survey.pdf > records.json

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH         Path to an existing libpdfium
  RUST_LOG                Log filter, e.g. pdf_ocr_records=debug
  PDF2RECORDS_*           Every flag, e.g. PDF2RECORDS_PARALLELISM=16

REQUIREMENTS:
  tesseract with trained data for each --languages entry, e.g.
    apt install tesseract-ocr tesseract-ocr-deu tesseract-ocr-ita tesseract-ocr-fra
"#;

/// Extract ordered, gap-filled record tables from scanned PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2records",
    version,
    about = "Extract ordered, gap-filled record tables from scanned PDFs",
    long_about = "Render every page of a scanned PDF, read it with a pool of tesseract \
engines, pull an identifier and a score out of each page, and reconcile the results into \
one ordered sequence with duplicates cleared and gaps filled.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write the records to this CSV file.
    #[arg(short, long, env = "PDF2RECORDS_OUTPUT")]
    output: Option<PathBuf>,

    /// Append "_(valid of total)" to the CSV file name.
    #[arg(long, env = "PDF2RECORDS_COUNT_SUFFIX", requires = "output")]
    count_suffix: bool,

    /// Rendering DPI (72–600), also passed to the OCR engine.
    #[arg(long, env = "PDF2RECORDS_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// OCR engines and pages per batch. Default: 2 × CPUs.
    #[arg(short = 'j', long, env = "PDF2RECORDS_PARALLELISM")]
    parallelism: Option<usize>,

    /// Tesseract languages, comma-separated.
    #[arg(long, env = "PDF2RECORDS_LANGUAGES", value_delimiter = ',',
          default_value = "deu,ita,fra,eng")]
    languages: Vec<String>,

    /// Directory containing *.traineddata files.
    #[arg(long, env = "PDF2RECORDS_TESSDATA_DIR")]
    tessdata_dir: Option<PathBuf>,

    /// Tesseract executable.
    #[arg(long, env = "PDF2RECORDS_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// Tesseract page segmentation mode.
    #[arg(long, env = "PDF2RECORDS_PSM", default_value_t = 3)]
    psm: u8,

    /// Regex for the identifier; the first capture group is the number.
    #[arg(long, env = "PDF2RECORDS_IDENTIFIER_PATTERN")]
    identifier_pattern: Option<String>,

    /// Regex for the score; the first capture group is the number.
    #[arg(long, env = "PDF2RECORDS_SCORE_PATTERN")]
    score_pattern: Option<String>,

    /// Fill placeholders down to this identifier.
    #[arg(long, env = "PDF2RECORDS_FIRST_ID", allow_negative_numbers = true)]
    first_id: Option<i64>,

    /// Fill placeholders up to this identifier.
    #[arg(long, env = "PDF2RECORDS_LAST_ID", allow_negative_numbers = true)]
    last_id: Option<i64>,

    /// Leave gaps wider than this many identifiers unfilled (misread numbers).
    #[arg(long, env = "PDF2RECORDS_MAX_GAP", default_value_t = DEFAULT_MAX_GAP,
          value_parser = clap::value_parser!(u64).range(1..), conflicts_with = "no_gap_limit")]
    max_gap: u64,

    /// Fill every gap, however wide.
    #[arg(long, env = "PDF2RECORDS_NO_GAP_LIMIT")]
    no_gap_limit: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2RECORDS_PASSWORD")]
    password: Option<String>,

    /// Per-page render timeout in seconds.
    #[arg(long, env = "PDF2RECORDS_RENDER_TIMEOUT")]
    render_timeout: Option<u64>,

    /// Per-page OCR timeout in seconds.
    #[arg(long, env = "PDF2RECORDS_OCR_TIMEOUT")]
    ocr_timeout: Option<u64>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2RECORDS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output structured JSON (records + stats) instead of a table.
    #[arg(long, env = "PDF2RECORDS_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2RECORDS_NO_PROGRESS")]
    no_progress: bool,

    /// Print the page count only, no OCR.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2RECORDS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2RECORDS_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = build_config(&cli, None)?;
        let pages = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect PDF")?;
        if cli.json {
            println!("{}", serde_json::json!({ "file": cli.input, "pages": pages }));
        } else {
            println!("File:   {}", cli.input);
            println!("Pages:  {}", pages);
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run extraction ───────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        let (written, stats) = extract_to_csv(&cli.input, output_path, cli.count_suffix, &config)
            .await
            .context("Extraction failed")?;

        if !cli.quiet {
            print_summary(&stats);
            eprintln!(
                "{}  Exported {} records to {}  {}",
                green("✔"),
                stats.records,
                bold(&written.display().to_string()),
                dim(&format!("{}ms", stats.total_duration_ms)),
            );
        }
    } else {
        let output = extract_records(&cli.input, &config)
            .await
            .context("Extraction failed")?;

        if cli.json {
            let json =
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            println!("{json}");
        } else {
            print_table(&output.records).context("Failed to write to stdout")?;
        }

        if !cli.quiet && !cli.json {
            print_summary(&output.stats);
            print_timing(&output);
        }
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let extractor = RegexFieldExtractor::with_patterns(
        cli.identifier_pattern.as_deref(),
        cli.score_pattern.as_deref(),
    )
    .context("Invalid field pattern")?;

    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .ocr(OcrSettings {
            languages: cli.languages.clone(),
            tessdata_dir: cli.tessdata_dir.clone(),
            binary: cli.tesseract.clone(),
            page_segmentation_mode: cli.psm,
        })
        .bounds(IdentifierBounds::new(cli.first_id, cli.last_id))
        .max_gap((!cli.no_gap_limit).then_some(cli.max_gap))
        .download_timeout_secs(cli.download_timeout)
        .field_extractor(Arc::new(extractor));

    if let Some(n) = cli.parallelism {
        builder = builder.parallelism(n);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(secs) = cli.render_timeout {
        builder = builder.render_timeout_secs(secs);
    }
    if let Some(secs) = cli.ocr_timeout {
        builder = builder.ocr_timeout_secs(secs);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Print the record table to stdout.
fn print_table(records: &RecordSet) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{:>10}  {:>6}  {}", "Identifier", "Score", "Valid")?;
    writeln!(out, "{:─>10}  {:─>6}  {:─>5}", "", "", "")?;
    for record in records {
        let score = record
            .score
            .map_or_else(|| "NULL".to_string(), |s| s.to_string());
        let valid = if record.is_valid() {
            green("yes")
        } else {
            red("no")
        };
        writeln!(out, "{:>10}  {:>6}  {}", record.identifier, score, valid)?;
    }
    Ok(())
}

/// Detected / failed breakdown bar on stderr.
fn print_summary(stats: &ExtractionStats) {
    const WIDTH: usize = 60;
    let total = stats.records;
    let detected = stats.valid_records;
    let failed = stats.invalid_records();

    let green_cells = if total == 0 {
        0
    } else {
        (detected * WIDTH + total / 2) / total
    };
    eprintln!();
    eprintln!(
        "{}{}",
        green(&"█".repeat(green_cells)),
        red(&"█".repeat(WIDTH - green_cells))
    );
    eprintln!(
        "{} Successfully detected {}   {} Failed to detect {}",
        green("■"),
        bold(&detected.to_string()),
        red("■"),
        bold(&failed.to_string()),
    );
}

fn print_timing(output: &ExtractionOutput) {
    let s = &output.stats;
    eprintln!(
        "   {} pages  /  {} without identifier  /  {} duplicates  /  {} gaps  /  {}ms total",
        dim(&s.total_pages.to_string()),
        dim(&s.pages_without_match.to_string()),
        dim(&s.duplicates_collapsed.to_string()),
        dim(&s.gaps_filled.to_string()),
        s.total_duration_ms,
    );
    if s.gaps_skipped > 0 {
        eprintln!(
            "   {} {} gap(s) wider than the gap limit left open; check for misread identifiers",
            yellow("!"),
            s.gaps_skipped
        );
    }
}
