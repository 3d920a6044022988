//! Lenient, span-preserving representation of a catalog document.
//!
//! Everything here is optional, so that a missing `name` or `unit` becomes a
//! validation problem that points at the right test, instead of aborting the
//! parse at the first missing field.

use toml_span::{
    DeserError, Deserialize, Span, Spanned, Value, de_helpers::TableHelper,
    value::ValueInner,
};

use crate::toml_utils::{TomlNumber, custom_deser_error};

/// A whole catalog document.
#[derive(Debug)]
pub struct RawCatalog {
    pub report: Option<RawReport>,
    pub panels: Vec<RawPanel>,
}

impl<'de> Deserialize<'de> for RawCatalog {
    fn deserialize(value: &mut Value<'de>) -> Result<Self, DeserError> {
        let mut th = TableHelper::new(value)?;
        let report = th.optional("report");
        let panels = th.optional("panels").unwrap_or_default();
        th.finalize(None)?;
        Ok(RawCatalog { report, panels })
    }
}

/// The optional `[report]` table, used to recognize documents.
#[derive(Debug)]
pub struct RawReport {
    pub indicators: Vec<String>,
    pub min_indicators: Option<Spanned<i64>>,
}

impl<'de> Deserialize<'de> for RawReport {
    fn deserialize(value: &mut Value<'de>) -> Result<Self, DeserError> {
        let mut th = TableHelper::new(value)?;
        let indicators = th.optional("indicators").unwrap_or_default();
        let min_indicators = th.optional_s("min_indicators");
        th.finalize(None)?;
        Ok(RawReport {
            indicators,
            min_indicators,
        })
    }
}

/// A `[[panels]]` entry.
#[derive(Debug)]
pub struct RawPanel {
    pub span: Span,
    pub id: Option<Spanned<String>>,
    pub name: Option<Spanned<String>>,
    pub description: Option<String>,
    pub tests: Vec<RawTest>,
}

impl<'de> Deserialize<'de> for RawPanel {
    fn deserialize(value: &mut Value<'de>) -> Result<Self, DeserError> {
        let span = value.span;
        let mut th = TableHelper::new(value)?;
        let id = th.optional_s("id");
        let name = th.optional_s("name");
        let description = th.optional("description");
        let tests = th.optional("tests").unwrap_or_default();
        th.finalize(None)?;
        Ok(RawPanel {
            span,
            id,
            name,
            description,
            tests,
        })
    }
}

/// A `[[panels.tests]]` entry.
#[derive(Debug)]
pub struct RawTest {
    pub span: Span,
    pub id: Option<Spanned<String>>,
    pub name: Option<Spanned<String>>,
    pub synonyms: Vec<String>,
    pub unit: Option<Spanned<String>>,
    pub range: Option<RawRange>,
    pub explanation: Option<String>,
    pub category: Option<String>,
}

impl<'de> Deserialize<'de> for RawTest {
    fn deserialize(value: &mut Value<'de>) -> Result<Self, DeserError> {
        let span = value.span;
        let mut th = TableHelper::new(value)?;
        let id = th.optional_s("id");
        let name = th.optional_s("name");
        let synonyms = th.optional("synonyms").unwrap_or_default();
        let unit = th.optional_s("unit");
        let range = th.optional("range");
        let explanation = th.optional("explanation");
        let category = th.optional("category");
        th.finalize(None)?;
        Ok(RawTest {
            span,
            id,
            name,
            synonyms,
            unit,
            range,
            explanation,
            category,
        })
    }
}

/// A reference range, either flat or keyed by a demographic group.
#[derive(Debug)]
pub enum RawRange {
    Flat(RawBounds),
    ByDemographic {
        span: Span,
        variants: Vec<(RawKey, RawBounds)>,
    },
}

/// A table key, with its location.
#[derive(Debug)]
pub struct RawKey {
    pub name: String,
    pub span: Span,
}

impl<'de> Deserialize<'de> for RawRange {
    fn deserialize(value: &mut Value<'de>) -> Result<Self, DeserError> {
        let span = value.span;
        let table = match value.take() {
            ValueInner::Table(table) => table,
            _ => {
                return Err(custom_deser_error(
                    span,
                    "expected a table like `{ min = 1, max = 2 }`",
                ));
            }
        };

        // `{ min = .., max = .. }` is flat; anything else is keyed.
        let is_flat = table
            .keys()
            .any(|key| key.name == "min" || key.name == "max");
        if is_flat {
            let mut value = Value::with_span(ValueInner::Table(table), span);
            return Ok(RawRange::Flat(RawBounds::deserialize(&mut value)?));
        }

        let mut variants = Vec::with_capacity(table.len());
        let mut errors = Vec::new();
        for (key, mut bounds) in table {
            match RawBounds::deserialize(&mut bounds) {
                Ok(bounds) => variants.push((
                    RawKey {
                        name: key.name.into_owned(),
                        span: key.span,
                    },
                    bounds,
                )),
                Err(err) => errors.extend(err.errors),
            }
        }
        if errors.is_empty() {
            // Tables come back sorted by key. Restore declaration order.
            variants.sort_by_key(|(key, _)| key.span.start);
            Ok(RawRange::ByDemographic { span, variants })
        } else {
            Err(DeserError { errors })
        }
    }
}

/// A `{ min, max }` pair.
#[derive(Debug)]
pub struct RawBounds {
    pub span: Span,
    pub min: Option<TomlNumber>,
    pub max: Option<TomlNumber>,
}

impl<'de> Deserialize<'de> for RawBounds {
    fn deserialize(value: &mut Value<'de>) -> Result<Self, DeserError> {
        let span = value.span;
        let mut th = TableHelper::new(value)?;
        let min = th.optional("min");
        let max = th.optional("max");
        th.finalize(None)?;
        Ok(RawBounds { span, min, max })
    }
}
