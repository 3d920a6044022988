//! Clean up OCR output before we search it.

use std::sync::LazyLock;

use regex::Regex;

use crate::catalog::ReportRecognition;

static WHITESPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("failed to compile regex"));

/// Collapse whitespace and fix a couple of common OCR misreadings.
pub fn normalize_text(text: &str) -> String {
    WHITESPACE_REGEX
        .replace_all(text, " ")
        .replace('|', "I")
        .replace('°', "o")
        .trim()
        .to_owned()
}

/// How many of the configured indicator phrases appear in `text`?
pub fn count_indicators(recognition: &ReportRecognition, text: &str) -> usize {
    let text = text.to_lowercase();
    recognition
        .indicators
        .iter()
        .filter(|indicator| text.contains(&indicator.to_lowercase()))
        .count()
}

/// Does `text` look like a lab report?
pub fn is_recognized_report(recognition: &ReportRecognition, text: &str) -> bool {
    recognition.indicators.is_empty()
        || count_indicators(recognition, text) >= recognition.min_indicators
}
