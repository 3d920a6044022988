//! Find a test's value in report text.
//!
//! Each test gets an ordered list of [`MatchRule`]s, built purely from its
//! definition. Rules are tried in order and the first one that finds a value
//! wins, even if a later rule would have found a "better" match.

use std::sync::LazyLock;

use regex::Regex;

use crate::{catalog::TestDefinition, prelude::*};

/// Parenthetical content, like the " (WBC)" in "White Blood Cells (WBC)".
static PARENTHETICAL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]*\)").expect("failed to compile regex"));

/// Separators we replace with spaces when turning an id into a name.
const ID_SEPARATORS: &[char] = &['_', '-', '.'];

/// A number: digits with at most one decimal point.
const NUMBER_PATTERN: &str = r"(\d+(?:\.\d+)?|\.\d+)";

/// Candidate names for a test, in the order we try them.
pub fn candidate_patterns(test: &TestDefinition) -> Vec<String> {
    let stripped = PARENTHETICAL_REGEX.replace_all(&test.name, "");
    let candidates = [
        test.name.trim().to_owned(),
        stripped.trim().to_owned(),
        test.id.to_uppercase(),
        test.id.replace(ID_SEPARATORS, " ").to_uppercase(),
    ];

    let mut patterns: Vec<String> = Vec::with_capacity(candidates.len());
    let synonyms = test.synonyms.iter().map(|s| s.trim().to_owned());
    for candidate in candidates.into_iter().chain(synonyms) {
        // Rules are case-insensitive, so case-only variants are duplicates.
        let seen = patterns
            .iter()
            .any(|pattern| pattern.to_lowercase() == candidate.to_lowercase());
        if !candidate.is_empty() && !seen {
            patterns.push(candidate);
        }
    }
    patterns
}

/// A compiled rule for finding a value after one candidate name.
#[derive(Debug)]
pub struct MatchRule {
    /// The name this rule looks for.
    pub pattern: String,

    /// `<pattern> [:] <number> [unit]`, case-insensitive.
    regex: Regex,
}

impl MatchRule {
    /// Build a rule for `pattern`, optionally followed by `unit`.
    pub fn new(pattern: &str, unit: &str) -> Result<Self, regex::Error> {
        // Don't let "ALT" match the tail of "BASALT".
        let boundary = if pattern.starts_with(|c: char| c.is_alphanumeric()) {
            r"\b"
        } else {
            ""
        };
        let unit = if unit.trim().is_empty() {
            String::new()
        } else {
            format!(r"(?:\s*{})?", regex::escape(unit.trim()))
        };
        let regex = Regex::new(&format!(
            r"(?i){boundary}{}\s*:?\s*{NUMBER_PATTERN}{unit}",
            regex::escape(pattern),
        ))?;
        Ok(Self {
            pattern: pattern.to_owned(),
            regex,
        })
    }

    /// Find the first value following our pattern in `text`.
    pub fn find_value(&self, text: &str) -> Option<f64> {
        self.regex.captures_iter(text).find_map(|caps| {
            let number = caps.get(1)?.as_str();
            match number.parse::<f64>() {
                Ok(value) => Some(value),
                Err(err) => {
                    trace!(pattern = %self.pattern, %number, %err, "Skipping unparsable number");
                    None
                }
            }
        })
    }
}

/// Compile the match rules for a test.
pub fn compile_match_rules(test: &TestDefinition) -> Result<Vec<MatchRule>, regex::Error> {
    candidate_patterns(test)
        .iter()
        .map(|pattern| MatchRule::new(pattern, &test.unit))
        .collect()
}

/// A value found by [`find_first_value`].
#[derive(Debug, PartialEq)]
pub struct FoundValue<'a> {
    /// The candidate name that matched.
    pub pattern: &'a str,

    /// The value after it.
    pub value: f64,
}

/// Try each rule in order, returning the first value found.
pub fn find_first_value<'a>(rules: &'a [MatchRule], text: &str) -> Option<FoundValue<'a>> {
    rules.iter().find_map(|rule| {
        rule.find_value(text).map(|value| FoundValue {
            pattern: &rule.pattern,
            value,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn test_definition(name: &str, id: &str, synonyms: &[&str]) -> TestDefinition {
        let synonyms = synonyms
            .iter()
            .map(|s| format!("{s:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        let source = format!(
            r#"
[[panels]]
id = "p"
name = "P"

[[panels.tests]]
id = "{id}"
name = "{name}"
synonyms = [{synonyms}]
unit = "g/L"
range = {{ min = 1, max = 2 }}
"#
        );
        let catalog = Catalog::from_toml_str("test.toml", &source).unwrap();
        catalog.panels.into_iter().next().unwrap().tests.remove(0)
    }

    #[test]
    fn test_candidate_pattern_order() {
        let test = test_definition("White Blood Cells (WBC)", "white_blood-cells", &["Leukocytes"]);
        assert_eq!(
            candidate_patterns(&test),
            vec![
                "White Blood Cells (WBC)",
                "White Blood Cells",
                "WHITE_BLOOD-CELLS",
                "Leukocytes",
            ]
        );
    }

    #[test]
    fn test_candidate_patterns_skip_duplicates() {
        let test = test_definition("TSH", "tsh", &["TSH", "Thyrotropin"]);
        assert_eq!(candidate_patterns(&test), vec!["TSH", "Thyrotropin"]);

        let test = test_definition("Ferritin", "ferritin", &["FERRITIN", "Serum Ferritin"]);
        assert_eq!(candidate_patterns(&test), vec!["Ferritin", "Serum Ferritin"]);
    }

    #[test]
    fn test_rule_matches_with_and_without_colon_and_unit() {
        let rule = MatchRule::new("Hemoglobin", "g/L").unwrap();
        assert_eq!(rule.find_value("Hemoglobin: 150 g/L"), Some(150.0));
        assert_eq!(rule.find_value("HEMOGLOBIN 150"), Some(150.0));
        assert_eq!(rule.find_value("hemoglobin:12.5g/L"), Some(12.5));
        assert_eq!(rule.find_value("Hemoglobin: .5"), Some(0.5));
        assert_eq!(rule.find_value("Hemoglobin: 1.2.3"), Some(1.2));
        assert_eq!(rule.find_value("Hemoglobin: pending"), None);
    }

    #[test]
    fn test_rule_skips_mentions_without_values() {
        let rule = MatchRule::new("Glucose", "mmol/L").unwrap();
        let text = "Glucose tolerance notes. Fasting results: Glucose: 5.4 mmol/L";
        assert_eq!(rule.find_value(text), Some(5.4));
    }

    #[test]
    fn test_rule_respects_word_boundary() {
        let rule = MatchRule::new("ALT", "U/L").unwrap();
        assert_eq!(rule.find_value("BASALT 40"), None);
        assert_eq!(rule.find_value("ALT 40 U/L"), Some(40.0));
    }

    #[test]
    fn test_rule_escapes_regex_metacharacters() {
        let rule = MatchRule::new("Vitamin B12 (total)", "pmol/L").unwrap();
        assert_eq!(rule.find_value("Vitamin B12 (total): 300 pmol/L"), Some(300.0));
        assert_eq!(rule.find_value("Vitamin B12 total: 300"), None);
    }

    #[test]
    fn test_first_rule_wins() {
        let test = test_definition("Hemoglobin", "hgb", &[]);
        let rules = compile_match_rules(&test).unwrap();
        // "HGB" appears first in the text, but the display name is tried first.
        let found = find_first_value(&rules, "HGB 99 ... Hemoglobin: 150").unwrap();
        assert_eq!(
            found,
            FoundValue {
                pattern: "Hemoglobin",
                value: 150.0
            }
        );
        let found = find_first_value(&rules, "HGB 99").unwrap();
        assert_eq!(found.pattern, "HGB");
        assert_eq!(find_first_value(&rules, "nothing here"), None);
    }
}
