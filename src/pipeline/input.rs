//! Input resolution: turn a user-supplied path or URL into a local PDF file.
//!
//! The rasteriser reopens the document once per page, so it needs a path on
//! disk rather than a byte buffer. URLs are streamed into a `TempDir` that is
//! removed when the [`ResolvedInput`] is dropped. Both kinds of input are
//! checked for the `%PDF` signature up front so a wrong file fails with a
//! clear message instead of an opaque pdfium error on page one.

use crate::error::ExtractError;
use futures::StreamExt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A local PDF ready for the rasteriser.
#[derive(Debug)]
pub enum ResolvedInput {
    /// The input already named a local file.
    Local(PathBuf),
    /// The input was a URL. The directory lives as long as this value.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` to a local PDF, downloading it first when it is a URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, ExtractError> {
    if is_url(input) {
        download(input, timeout_secs).await
    } else if input.trim().is_empty() {
        Err(ExtractError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        resolve_local(Path::new(input))
    }
}

fn resolve_local(path: &Path) -> Result<ResolvedInput, ExtractError> {
    let path = path.to_path_buf();
    if !path.is_file() {
        return Err(ExtractError::FileNotFound { path });
    }

    let mut head = [0u8; 4];
    let read = std::fs::File::open(&path).and_then(|mut f| f.read_exact(&mut head));
    match read {
        Ok(()) => check_magic(&path, &head)?,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ExtractError::PermissionDenied { path });
        }
        // Shorter than the signature: certainly not a PDF.
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ExtractError::NotAPdf { path, magic: head });
        }
        Err(_) => return Err(ExtractError::FileNotFound { path }),
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

fn check_magic(path: &Path, head: &[u8; 4]) -> Result<(), ExtractError> {
    if head == PDF_MAGIC {
        Ok(())
    } else {
        Err(ExtractError::NotAPdf {
            path: path.to_path_buf(),
            magic: *head,
        })
    }
}

/// Stream `url` into a fresh temporary directory.
async fn download(url: &str, timeout_secs: u64) -> Result<ResolvedInput, ExtractError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| ExtractError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            ExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;
    let response = client.get(url).send().await.map_err(classify)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let temp_dir = tempfile::Builder::new()
        .prefix("pdf2records-")
        .tempdir()
        .map_err(|e| ExtractError::Internal(format!("Cannot create temp dir: {e}")))?;
    let path = temp_dir.path().join(filename_from_url(url));
    let write_err = |e: std::io::Error| ExtractError::Internal(format!("Cannot write temp file: {e}"));

    let mut file = tokio::fs::File::create(&path).await.map_err(write_err)?;
    let mut head = Vec::with_capacity(PDF_MAGIC.len());
    let mut written: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(classify)?;
        if head.len() < PDF_MAGIC.len() {
            let take = (PDF_MAGIC.len() - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
        }
        file.write_all(&chunk).await.map_err(write_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_err)?;

    let mut magic = [0u8; 4];
    magic[..head.len()].copy_from_slice(&head);
    check_magic(&path, &magic)?;

    info!("Downloaded {} bytes to {}", written, path.display());
    Ok(ResolvedInput::Downloaded {
        path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of `url` when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[tokio::test]
    async fn local_pdf_resolves_to_itself() {
        let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        file.write_all(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let resolved = resolve_input(&path, 5).await.unwrap();
        assert_eq!(resolved.path(), file.path());
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/nonexistent/scans.pdf", 5)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExtractError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn empty_input_is_invalid() {
        let err = resolve_input("  ", 5).await.err().unwrap();
        assert!(matches!(err, ExtractError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn non_pdf_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"PK\x03\x04 not a pdf").unwrap();
        let path = file.path().to_string_lossy().to_string();

        match resolve_input(&path, 5).await.err().unwrap() {
            ExtractError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_file_is_not_a_pdf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"%P").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let err = resolve_input(&path, 5).await.err().unwrap();
        assert!(matches!(err, ExtractError::NotAPdf { .. }));
    }

    #[test]
    fn filename_from_url_path() {
        assert_eq!(
            filename_from_url("https://example.org/a/b/report.pdf"),
            "report.pdf"
        );
        assert_eq!(
            filename_from_url("https://example.org/download"),
            "downloaded.pdf"
        );
        assert_eq!(filename_from_url("not a url"), "downloaded.pdf");
    }
}
