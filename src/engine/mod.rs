//! Extract lab results from report text and flag them.
//!
//! [`analyze`] is a pure function of its inputs: it reads the shared catalog,
//! allocates a fresh result, and never touches global state. It's safe to call
//! from as many threads as you like.

pub mod flag;
pub mod normalize;
pub mod patterns;
pub mod summary;

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::Serializer;
use thiserror::Error;

use self::{
    flag::Flag,
    normalize::{is_recognized_report, normalize_text},
    patterns::find_first_value,
    summary::Summary,
};
use crate::{
    catalog::{Bounds, Catalog, PanelDefinition, ReferenceRange, TestDefinition},
    prelude::*,
};

/// Shorter texts are almost certainly OCR failures.
pub const DEFAULT_MIN_TEXT_LENGTH: usize = 10;

/// Options controlling a single analysis.
#[derive(Clone, Debug)]
pub struct AnalysisOptions {
    /// Minimum length of the normalized text, in characters.
    pub min_text_length: usize,

    /// Which demographic range variant to prefer when the caller doesn't tell
    /// us. Compared case-insensitively.
    pub range_priority: Vec<String>,

    /// The patient's demographic group, if known (for example, `"female"`).
    pub demographic: Option<String>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            min_text_length: DEFAULT_MIN_TEXT_LENGTH,
            range_priority: vec!["female".to_owned(), "male".to_owned()],
            demographic: None,
        }
    }
}

/// Why an analysis produced no results.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum AnalysisError {
    /// The text is too short to contain any results.
    #[error(
        "could not read document: only {length} characters of text (need at least {minimum})"
    )]
    InsufficientText { length: usize, minimum: usize },

    /// We looked for every test in the catalog and found none.
    #[error("not a recognizable lab report: none of {tests_searched} known tests were found")]
    NoMatch { tests_searched: usize },
}

/// A single extracted and flagged result.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedTest {
    /// The test id (used as the map key when serialized).
    #[serde(skip)]
    pub id: String,

    pub name: String,
    pub value: f64,
    pub unit: String,

    /// Human-readable range, like `"120 - 155 g/L"`.
    pub reference_range: String,

    /// The numeric range we flagged against.
    pub range: Bounds,

    /// Which demographic variant of the range was used, if there was a choice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_variant: Option<String>,

    pub flag: Flag,
    pub explanation: String,
    pub category: String,
}

/// Matched results for one panel.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
pub struct PanelResult {
    /// The panel id (used as the map key when serialized).
    #[serde(skip)]
    pub id: String,

    pub name: String,
    pub description: String,

    /// Matched tests, in catalog order. Never empty.
    #[serde(serialize_with = "serialize_keyed")]
    #[schemars(with = "BTreeMap<String, ExtractedTest>")]
    pub tests: Vec<ExtractedTest>,
}

/// Every panel with at least one matched test.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
pub struct AnalysisResult {
    /// Panels in catalog order, serialized as an object keyed by panel id.
    #[serde(serialize_with = "serialize_keyed")]
    #[schemars(with = "BTreeMap<String, PanelResult>")]
    pub panels: Vec<PanelResult>,
}

impl AnalysisResult {
    /// All matched tests, in catalog order.
    pub fn tests(&self) -> impl Iterator<Item = &ExtractedTest> {
        self.panels.iter().flat_map(|panel| panel.tests.iter())
    }

    /// Count our results by flag.
    pub fn summary(&self) -> Summary {
        Summary::from_tests(self.tests())
    }
}

/// Extra information about an analysis.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    pub tests_found: usize,
    pub panels_identified: usize,

    /// Characters of normalized text.
    pub total_characters: usize,

    /// Words of normalized text.
    pub total_words: usize,

    /// Did the text contain enough of the catalog's report indicators?
    pub recognized_report: bool,
}

/// The output of [`analyze`].
#[derive(Clone, Debug, PartialEq)]
pub struct Analysis {
    pub result: AnalysisResult,
    pub metadata: AnalysisMetadata,
}

/// Things with an id, which we serialize as JSON objects keyed by that id.
trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for ExtractedTest {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for PanelResult {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Serialize `items` as a map, preserving order.
fn serialize_keyed<S, T>(items: &[T], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Keyed + Serialize,
{
    serializer.collect_map(items.iter().map(|item| (item.key(), item)))
}

/// Extract and classify every catalog test found in `text`.
#[instrument(level = "debug", skip_all, fields(text_len = text.len()))]
pub fn analyze(
    text: &str,
    catalog: &Catalog,
    options: &AnalysisOptions,
) -> Result<Analysis, AnalysisError> {
    let text = normalize_text(text);
    let length = text.chars().count();
    if length < options.min_text_length {
        return Err(AnalysisError::InsufficientText {
            length,
            minimum: options.min_text_length,
        });
    }

    let panels = catalog
        .panels()
        .iter()
        .filter_map(|panel| analyze_panel(panel, &text, options))
        .collect::<Vec<_>>();
    if panels.is_empty() {
        return Err(AnalysisError::NoMatch {
            tests_searched: catalog.test_count(),
        });
    }

    let recognized_report = is_recognized_report(catalog.report(), &text);
    if !recognized_report {
        warn!("Document may not be a lab report, but some tests matched anyway");
    }

    let result = AnalysisResult { panels };
    let metadata = AnalysisMetadata {
        tests_found: result.tests().count(),
        panels_identified: result.panels.len(),
        total_characters: length,
        total_words: text.split_whitespace().count(),
        recognized_report,
    };
    Ok(Analysis { result, metadata })
}

/// Extract a panel's tests, returning `None` if nothing matched.
fn analyze_panel(
    panel: &PanelDefinition,
    text: &str,
    options: &AnalysisOptions,
) -> Option<PanelResult> {
    let tests = panel
        .tests
        .iter()
        .filter_map(|test| extract_test(test, text, options))
        .collect::<Vec<_>>();
    if tests.is_empty() {
        None
    } else {
        Some(PanelResult {
            id: panel.id.clone(),
            name: panel.name.clone(),
            description: panel.description.clone(),
            tests,
        })
    }
}

/// Find and classify a single test. Returns `None` if the test isn't in the
/// text, which is perfectly normal.
fn extract_test(
    test: &TestDefinition,
    text: &str,
    options: &AnalysisOptions,
) -> Option<ExtractedTest> {
    let found = find_first_value(&test.rules, text)?;
    let (range_variant, bounds) = resolve_range(&test.range, options)?;
    let flag = Flag::classify(found.value, bounds);
    debug!(
        test = %test.id,
        pattern = %found.pattern,
        value = found.value,
        ?flag,
        "Matched test"
    );
    Some(ExtractedTest {
        id: test.id.clone(),
        name: test.name.clone(),
        value: found.value,
        unit: test.unit.clone(),
        reference_range: format_reference_range(bounds, &test.unit),
        range: bounds,
        range_variant: range_variant.map(str::to_owned),
        flag,
        explanation: test.explanation.clone(),
        category: test.category.clone(),
    })
}

/// Pick the reference range to flag against.
///
/// For demographic ranges, we prefer the caller's demographic, then
/// `options.range_priority`, then the first variant. This is a guess whenever
/// the demographic is unknown.
fn resolve_range<'a>(
    range: &'a ReferenceRange,
    options: &AnalysisOptions,
) -> Option<(Option<&'a str>, Bounds)> {
    match range {
        ReferenceRange::Flat(bounds) => Some((None, *bounds)),
        ReferenceRange::ByDemographic(variants) => {
            let wanted = options.demographic.iter().chain(&options.range_priority);
            let chosen = wanted
                .filter_map(|key| {
                    variants
                        .iter()
                        .find(|variant| variant.key.eq_ignore_ascii_case(key.trim()))
                })
                .next()
                .or_else(|| variants.first())?;
            Some((Some(chosen.key.as_str()), chosen.bounds))
        }
    }
}

/// Format a range for humans.
fn format_reference_range(bounds: Bounds, unit: &str) -> String {
    format!("{} - {} {}", bounds.min, bounds.max, unit)
        .trim_end()
        .to_owned()
}
