//! The catalog of lab panels and tests that drives extraction.
//!
//! A catalog is loaded once, validated, and then shared read-only (usually
//! behind an [`Arc`]) by every analysis.

mod raw;
mod validate;

use std::sync::Arc;

use schemars::JsonSchema;

pub use self::validate::ValidationError;
use self::{
    raw::RawCatalog,
    validate::{deser_error_to_validation_error, validate},
};
use crate::{
    async_utils::io::read_text_file, engine::patterns::MatchRule, prelude::*,
    toml_utils::from_toml_str,
};

/// The catalog compiled into our binary.
const BUILTIN_CATALOG: &str = include_str!("../../catalogs/default.toml");

/// Name used for [`BUILTIN_CATALOG`] in error messages.
const BUILTIN_CATALOG_NAME: &str = "<builtin catalog>";

/// A validated, immutable catalog.
#[derive(Debug, JsonSchema, Serialize)]
pub struct Catalog {
    /// How to recognize a document as a lab report.
    pub(crate) report: ReportRecognition,

    /// All known panels, in declaration order.
    pub(crate) panels: Vec<PanelDefinition>,
}

impl Catalog {
    /// Parse and validate a catalog from TOML source.
    ///
    /// `name` is only used in error messages.
    pub fn from_toml_str(name: &str, source: &str) -> Result<Self, ValidationError> {
        let raw = from_toml_str::<RawCatalog>(source)
            .map_err(|err| deser_error_to_validation_error(name, source, err))?;
        validate(name, source, raw)
    }

    /// The catalog shipped with this binary.
    pub fn builtin() -> Result<Self, ValidationError> {
        Self::from_toml_str(BUILTIN_CATALOG_NAME, BUILTIN_CATALOG)
    }

    /// Load a catalog from `path`, or use the builtin catalog.
    ///
    /// Validation problems are printed to standard error as diagnostics.
    #[instrument(level = "debug")]
    pub async fn load(path: Option<&Path>) -> Result<Arc<Self>> {
        let result = match path {
            Some(path) => {
                let source = read_text_file(path).await?;
                Self::from_toml_str(&path.display().to_string(), &source)
            }
            None => Self::builtin(),
        };
        match result {
            Ok(catalog) => {
                debug!(
                    panels = catalog.panels.len(),
                    tests = catalog.test_count(),
                    "Loaded catalog"
                );
                Ok(Arc::new(catalog))
            }
            Err(err) => {
                err.emit_to_stderr()?;
                Err(err.into())
            }
        }
    }

    /// Our panels, in declaration order.
    pub fn panels(&self) -> &[PanelDefinition] {
        &self.panels
    }

    /// Settings for recognizing reports.
    pub fn report(&self) -> &ReportRecognition {
        &self.report
    }

    /// The total number of test definitions.
    pub fn test_count(&self) -> usize {
        self.panels.iter().map(|panel| panel.tests.len()).sum()
    }
}

/// Phrases that suggest a document really is a lab report.
#[derive(Clone, Debug, Default, JsonSchema, Serialize)]
pub struct ReportRecognition {
    /// Case-insensitive phrases to look for.
    pub indicators: Vec<String>,

    /// How many distinct indicators must be present.
    pub min_indicators: usize,
}

/// A group of related tests, like a "Complete Blood Count".
#[derive(Debug, JsonSchema, Serialize)]
pub struct PanelDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tests: Vec<TestDefinition>,
}

/// How to recognize and interpret a single lab test.
#[derive(Debug, JsonSchema, Serialize)]
pub struct TestDefinition {
    /// Unique within its panel.
    pub id: String,

    /// Display name, also the first name we search for.
    pub name: String,

    /// Other names this test goes by on reports.
    pub synonyms: Vec<String>,

    pub unit: String,
    pub range: ReferenceRange,
    pub explanation: String,
    pub category: String,

    /// Match rules, compiled once at load time.
    #[serde(skip)]
    #[schemars(skip)]
    pub(crate) rules: Vec<MatchRule>,
}

/// A closed interval of normal values. Always `min < max`.
#[derive(Clone, Copy, Debug, JsonSchema, PartialEq, Serialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

/// A reference range.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReferenceRange {
    /// One range for everybody.
    Flat(Bounds),

    /// Ranges keyed by a demographic group, such as `"male"` or `"female"`.
    ByDemographic(Vec<DemographicRange>),
}

/// One variant of a [`ReferenceRange::ByDemographic`].
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
pub struct DemographicRange {
    pub key: String,
    #[serde(flatten)]
    pub bounds: Bounds,
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_CATALOG: &str = r#"
[report]
indicators = ["laboratory report", "reference range"]
min_indicators = 1

[[panels]]
id = "cbc"
name = "Complete Blood Count"
description = "Blood cells."

[[panels.tests]]
id = "hemoglobin"
name = "Hemoglobin"
synonyms = ["HGB"]
unit = "g/L"
range = { male = { min = 135, max = 175 }, female = { min = 120, max = 155 } }
explanation = "Oxygen-carrying protein."
category = "blood"

[[panels.tests]]
id = "wbc"
name = "White Blood Cells (WBC)"
unit = "x10^9/L"
range = { min = 4.0, max = 11.0 }

[[panels]]
id = "thyroid"
name = "Thyroid"

[[panels.tests]]
id = "tsh"
name = "TSH"
unit = "mU/L"
range = { min = 0.4, max = 4.0 }
"#;

    fn problems_for(source: &str) -> Vec<String> {
        Catalog::from_toml_str("test.toml", source)
            .expect_err("catalog should be invalid")
            .problems
            .into_iter()
            .map(|p| p.message)
            .collect()
    }

    #[test]
    fn test_parses_good_catalog() {
        let catalog = Catalog::from_toml_str("test.toml", GOOD_CATALOG).unwrap();
        assert_eq!(catalog.panels().len(), 2);
        assert_eq!(catalog.test_count(), 3);
        assert_eq!(catalog.report().min_indicators, 1);

        let cbc = &catalog.panels()[0];
        assert_eq!(cbc.id, "cbc");
        assert_eq!(cbc.tests[0].id, "hemoglobin");
        assert_eq!(cbc.tests[0].synonyms, vec!["HGB".to_owned()]);
        assert_eq!(
            cbc.tests[0].range,
            ReferenceRange::ByDemographic(vec![
                DemographicRange {
                    key: "male".to_owned(),
                    bounds: Bounds {
                        min: 135.0,
                        max: 175.0
                    },
                },
                DemographicRange {
                    key: "female".to_owned(),
                    bounds: Bounds {
                        min: 120.0,
                        max: 155.0
                    },
                },
            ])
        );
        assert_eq!(
            cbc.tests[1].range,
            ReferenceRange::Flat(Bounds {
                min: 4.0,
                max: 11.0
            })
        );
        assert_eq!(catalog.panels()[1].description, "");
    }

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.test_count() > 10);
    }

    #[test]
    fn test_rejects_duplicate_test_ids() {
        let problems = problems_for(
            r#"
[[panels]]
id = "cbc"
name = "CBC"

[[panels.tests]]
id = "hgb"
name = "Hemoglobin"
unit = "g/L"
range = { min = 120, max = 155 }

[[panels.tests]]
id = "hgb"
name = "Haemoglobin"
unit = "g/L"
range = { min = 120, max = 155 }
"#,
        );
        assert_eq!(problems, vec!["duplicate test id `hgb` in panel `cbc`"]);
    }

    #[test]
    fn test_allows_same_test_id_in_different_panels() {
        let catalog = Catalog::from_toml_str(
            "test.toml",
            r#"
[[panels]]
id = "a"
name = "A"

[[panels.tests]]
id = "glucose"
name = "Glucose"
unit = "mmol/L"
range = { min = 3.6, max = 6.0 }

[[panels]]
id = "b"
name = "B"

[[panels.tests]]
id = "glucose"
name = "Glucose"
unit = "mmol/L"
range = { min = 3.6, max = 7.8 }
"#,
        );
        assert!(catalog.is_ok());
    }

    #[test]
    fn test_rejects_duplicate_panel_ids() {
        let problems = problems_for(
            r#"
[[panels]]
id = "cbc"
name = "CBC"

[[panels]]
id = "cbc"
name = "CBC again"
"#,
        );
        assert_eq!(problems, vec!["duplicate panel id `cbc`"]);
    }

    #[test]
    fn test_rejects_inverted_and_empty_ranges() {
        let problems = problems_for(
            r#"
[[panels]]
id = "p"
name = "P"

[[panels.tests]]
id = "flat"
name = "Flat"
unit = "g/L"
range = { min = 155, max = 120 }

[[panels.tests]]
id = "equal"
name = "Equal"
unit = "g/L"
range = { min = 5, max = 5 }

[[panels.tests]]
id = "keyed"
name = "Keyed"
unit = "g/L"
range = { male = { min = 1, max = 2 }, female = { min = 3, max = 2 } }
"#,
        );
        assert_eq!(
            problems,
            vec![
                "reference range min (155) must be less than max (120)",
                "reference range min (5) must be less than max (5)",
                "reference range min (3) must be less than max (2)",
            ]
        );
    }

    #[test]
    fn test_rejects_missing_required_fields() {
        let problems = problems_for(
            r#"
[[panels]]
id = "p"
name = "P"

[[panels.tests]]
id = "no_unit"
name = "No Unit"
range = { min = 1, max = 2 }

[[panels.tests]]
id = "no_name"
unit = "g/L"
range = { min = 1, max = 2 }

[[panels.tests]]
id = "blank_name"
name = "  "
unit = "g/L"
range = { min = 1, max = 2 }
"#,
        );
        assert_eq!(
            problems,
            vec![
                "missing required field test `unit`",
                "missing required field test `name`",
                "test `name` must not be empty",
            ]
        );
    }

    #[test]
    fn test_problem_locations() {
        let err = Catalog::from_toml_str(
            "test.toml",
            "[[panels]]\nid = \"p\"\nname = \"P\"\n\n[[panels]]\nid = \"p\"\nname = \"Q\"\n",
        )
        .unwrap_err();
        assert_eq!(err.problems.len(), 1);
        assert_eq!(err.problems[0].line, 6);
        assert!(err.problems[0].column >= 6);
        assert!(err.to_string().contains("duplicate panel id `p`"));
        assert_eq!(err.to_diagnostics().len(), 1);
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_toml() {
        let err = Catalog::from_toml_str(
            "test.toml",
            "[[panels]]\nid = \"p\"\nname = \"P\"\ncolour = \"red\"\n",
        )
        .unwrap_err();
        assert!(!err.problems.is_empty());

        let err = Catalog::from_toml_str("test.toml", "[[panels]\n").unwrap_err();
        assert!(!err.problems.is_empty());
    }
}
