//! Getting text out of report files.
//!
//! Real OCR happens elsewhere. We accept plain text files as-is, and we can
//! pull the text layer out of "searchable" PDFs with `pdftotext`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{process::Command, time};

use crate::{
    async_utils::{check_for_command_failure, io::read_text_file},
    prelude::*,
};

/// Interface for extracting text from a file.
#[async_trait]
pub trait TextExtractor: Send + Sync + 'static {
    /// A short name for log messages.
    fn name(&self) -> &'static str;

    /// Extract the text of the file at `path`.
    async fn extract_text(&self, path: &Path) -> Result<String>;
}

/// Reads UTF-8 text files.
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "text"
    }

    async fn extract_text(&self, path: &Path) -> Result<String> {
        read_text_file(path).await
    }
}

/// Extractor wrapping the `pdftotext` CLI tool from `poppler-utils`.
///
/// This will miss any "non-searchable" text in a PDF.
pub struct PdfToTextExtractor;

#[async_trait]
impl TextExtractor for PdfToTextExtractor {
    fn name(&self) -> &'static str {
        "pdftotext"
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    async fn extract_text(&self, path: &Path) -> Result<String> {
        // "-" writes the text to standard output.
        let output = Command::new("pdftotext")
            .arg("-layout")
            .arg(path)
            .arg("-")
            .kill_on_drop(true)
            .output()
            .await
            .context("cannot run pdftotext")?;
        check_for_command_failure("pdftotext", &output)?;
        String::from_utf8(output.stdout).context("pdftotext output was not UTF-8")
    }
}

/// Choose an extractor based on the file extension.
pub fn extractor_for_path(path: &Path) -> Arc<dyn TextExtractor> {
    let is_pdf = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        Arc::new(PdfToTextExtractor)
    } else {
        Arc::new(PlainTextExtractor)
    }
}

/// Extract text from `path`, giving up after `timeout`.
///
/// Dropping the extraction future kills any child process it started.
pub async fn extract_text_with_timeout(path: &Path, timeout: Duration) -> Result<String> {
    let extractor = extractor_for_path(path);
    debug!(extractor = extractor.name(), path = %path.display(), "Extracting text");
    match time::timeout(timeout, extractor.extract_text(path)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(anyhow!(
            "{} timed out after {:?} extracting text from {:?}",
            extractor.name(),
            timeout,
            path
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn test_extractor_for_path() {
        assert_eq!(extractor_for_path(Path::new("report.PDF")).name(), "pdftotext");
        assert_eq!(extractor_for_path(Path::new("report.txt")).name(), "text");
        assert_eq!(extractor_for_path(Path::new("report")).name(), "text");
    }

    #[tokio::test]
    async fn test_extract_plain_text() {
        let mut file = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(file, "Hemoglobin: 150 g/L").unwrap();
        let text = extract_text_with_timeout(file.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(text, "Hemoglobin: 150 g/L\n");
    }

    #[tokio::test]
    async fn test_extract_missing_file_fails() {
        let result =
            extract_text_with_timeout(Path::new("does/not/exist.txt"), Duration::from_secs(5))
                .await;
        assert!(result.is_err());
    }
}
