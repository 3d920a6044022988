//! Turn a [`RawCatalog`] into a [`Catalog`], or explain why we can't.

use std::{collections::HashSet, ops::Range};

use codespan_reporting::{
    diagnostic::{Diagnostic, Label},
    files::SimpleFile,
    term::{
        self,
        termcolor::{ColorChoice, StandardStream},
    },
};
use thiserror::Error;
use toml_span::{DeserError, Span, Spanned};

use super::{
    Bounds, Catalog, DemographicRange, PanelDefinition, ReferenceRange,
    ReportRecognition, TestDefinition,
    raw::{RawBounds, RawCatalog, RawPanel, RawRange, RawTest},
};
use crate::{engine::patterns::compile_match_rules, toml_utils::line_and_column};

/// A catalog document could not be loaded.
///
/// This collects every problem we found, not just the first one.
#[derive(Debug, Error)]
#[error("catalog {name} is invalid:{}", format_problems(.problems))]
pub struct ValidationError {
    /// A human-readable name for the catalog (usually a path).
    pub name: String,

    /// The catalog source, kept around for rendering diagnostics.
    source_text: String,

    /// Everything that was wrong.
    pub problems: Vec<Problem>,
}

impl ValidationError {
    /// Build a [`Diagnostic`] for each problem.
    pub fn to_diagnostics(&self) -> Vec<Diagnostic<()>> {
        self.problems
            .iter()
            .map(|problem| {
                Diagnostic::error()
                    .with_message(problem.message.clone())
                    .with_labels(vec![Label::primary((), problem.span.clone())])
            })
            .collect()
    }

    /// Print pretty diagnostics to standard error.
    pub fn emit_to_stderr(&self) -> anyhow::Result<()> {
        let file = SimpleFile::new(self.name.as_str(), self.source_text.as_str());
        let writer = StandardStream::stderr(ColorChoice::Auto);
        let config = term::Config::default();
        for diagnostic in self.to_diagnostics() {
            term::emit(&mut writer.lock(), &config, &file, &diagnostic)?;
        }
        Ok(())
    }
}

/// A single problem with a catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct Problem {
    pub message: String,
    pub span: Range<usize>,
    pub line: usize,
    pub column: usize,
}

fn format_problems(problems: &[Problem]) -> String {
    problems
        .iter()
        .map(|p| format!("\n  {}:{}: {}", p.line, p.column, p.message))
        .collect()
}

/// Accumulates problems while we walk the catalog.
struct Problems<'a> {
    source: &'a str,
    problems: Vec<Problem>,
}

impl Problems<'_> {
    fn push(&mut self, span: Span, message: impl Into<String>) {
        let (line, column) = line_and_column(self.source, span.start);
        self.problems.push(Problem {
            message: message.into(),
            span: span.start..span.end,
            line,
            column,
        });
    }

    fn into_error(self, name: &str) -> ValidationError {
        ValidationError {
            name: name.to_owned(),
            source_text: self.source.to_owned(),
            problems: self.problems,
        }
    }
}

/// Convert a parse failure into a [`ValidationError`].
pub(super) fn deser_error_to_validation_error(
    name: &str,
    source: &str,
    err: DeserError,
) -> ValidationError {
    let mut problems = Problems {
        source,
        problems: Vec::new(),
    };
    for err in err.errors {
        problems.push(err.span, err.to_string());
    }
    problems.into_error(name)
}

/// Validate a parsed catalog.
pub(super) fn validate(
    name: &str,
    source: &str,
    raw: RawCatalog,
) -> Result<Catalog, ValidationError> {
    let mut problems = Problems {
        source,
        problems: Vec::new(),
    };

    let report = match raw.report {
        Some(report) => {
            let min_indicators = match report.min_indicators {
                Some(Spanned { value, span }) => match usize::try_from(value) {
                    Ok(min) => min,
                    Err(_) => {
                        problems.push(span, "min_indicators must not be negative");
                        0
                    }
                },
                None => report.indicators.len().min(1),
            };
            ReportRecognition {
                indicators: report.indicators,
                min_indicators,
            }
        }
        None => ReportRecognition::default(),
    };

    let mut panel_ids = HashSet::new();
    let mut panels = Vec::with_capacity(raw.panels.len());
    for raw_panel in raw.panels {
        if let Some(panel) = validate_panel(&mut problems, &mut panel_ids, raw_panel) {
            panels.push(panel);
        }
    }

    if problems.problems.is_empty() {
        Ok(Catalog { report, panels })
    } else {
        Err(problems.into_error(name))
    }
}

/// Require a non-empty string field.
fn required(
    problems: &mut Problems<'_>,
    field: Option<Spanned<String>>,
    parent_span: Span,
    what: &str,
) -> Option<String> {
    match field {
        Some(Spanned { value, span }) if value.trim().is_empty() => {
            problems.push(span, format!("{what} must not be empty"));
            None
        }
        Some(Spanned { value, .. }) => Some(value),
        None => {
            problems.push(parent_span, format!("missing required field {what}"));
            None
        }
    }
}

fn validate_panel(
    problems: &mut Problems<'_>,
    panel_ids: &mut HashSet<String>,
    raw: RawPanel,
) -> Option<PanelDefinition> {
    let id_span = raw.id.as_ref().map(|id| id.span);
    let id = required(problems, raw.id, raw.span, "panel `id`");
    let name = required(problems, raw.name, raw.span, "panel `name`");
    if let (Some(id), Some(span)) = (&id, id_span) {
        if !panel_ids.insert(id.clone()) {
            problems.push(span, format!("duplicate panel id `{id}`"));
        }
    }

    let mut test_ids = HashSet::new();
    let mut tests = Vec::with_capacity(raw.tests.len());
    for raw_test in raw.tests {
        let panel_id = id.as_deref().unwrap_or("?");
        if let Some(test) = validate_test(problems, &mut test_ids, panel_id, raw_test) {
            tests.push(test);
        }
    }

    Some(PanelDefinition {
        id: id?,
        name: name?,
        description: raw.description.unwrap_or_default(),
        tests,
    })
}

fn validate_test(
    problems: &mut Problems<'_>,
    test_ids: &mut HashSet<String>,
    panel_id: &str,
    raw: RawTest,
) -> Option<TestDefinition> {
    let id_span = raw.id.as_ref().map(|id| id.span);
    let id = required(problems, raw.id, raw.span, "test `id`");
    let name = required(problems, raw.name, raw.span, "test `name`");
    let unit = required(problems, raw.unit, raw.span, "test `unit`");
    if let (Some(id), Some(span)) = (&id, id_span) {
        if !test_ids.insert(id.clone()) {
            problems.push(
                span,
                format!("duplicate test id `{id}` in panel `{panel_id}`"),
            );
        }
    }

    let range = match raw.range {
        Some(RawRange::Flat(bounds)) => {
            validate_bounds(problems, &bounds).map(ReferenceRange::Flat)
        }
        Some(RawRange::ByDemographic { span, variants }) => {
            if variants.is_empty() {
                problems.push(span, "reference range must have at least one variant");
                None
            } else {
                let mut valid = Vec::with_capacity(variants.len());
                for (key, bounds) in &variants {
                    if let Some(bounds) = validate_bounds(problems, bounds) {
                        valid.push(DemographicRange {
                            key: key.name.clone(),
                            bounds,
                        });
                    }
                }
                (valid.len() == variants.len())
                    .then_some(ReferenceRange::ByDemographic(valid))
            }
        }
        None => {
            problems.push(raw.span, "missing required field test `range`");
            None
        }
    };

    let mut test = TestDefinition {
        id: id?,
        name: name?,
        synonyms: raw.synonyms,
        unit: unit?,
        range: range?,
        explanation: raw.explanation.unwrap_or_default(),
        category: raw.category.unwrap_or_default(),
        rules: Vec::new(),
    };
    match compile_match_rules(&test) {
        Ok(rules) => test.rules = rules,
        Err(err) => {
            problems.push(raw.span, format!("cannot build match rules: {err}"));
            return None;
        }
    }
    Some(test)
}

fn validate_bounds(problems: &mut Problems<'_>, raw: &RawBounds) -> Option<Bounds> {
    match (raw.min, raw.max) {
        (Some(min), Some(max)) if min.0 < max.0 => Some(Bounds {
            min: min.0,
            max: max.0,
        }),
        (Some(min), Some(max)) => {
            problems.push(
                raw.span,
                format!(
                    "reference range min ({}) must be less than max ({})",
                    min.0, max.0
                ),
            );
            None
        }
        _ => {
            problems.push(raw.span, "reference range needs both `min` and `max`");
            None
        }
    }
}
