//! Counts of results by flag.

use schemars::JsonSchema;

use super::{ExtractedTest, flag::Flag};
use crate::prelude::*;

/// Flag counts for a set of results. Always derived from the results
/// themselves; see [`super::AnalysisResult::summary`].
#[derive(Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_tests: usize,
    pub normal_count: usize,
    pub borderline_count: usize,
    pub abnormal_count: usize,
    pub critical_count: usize,

    /// Everything that isn't normal.
    pub flagged_count: usize,
}

impl Summary {
    /// Count the flags of `tests`.
    pub fn from_tests<'a>(tests: impl IntoIterator<Item = &'a ExtractedTest>) -> Self {
        let mut summary = tests
            .into_iter()
            .fold(Summary::default(), |mut summary, test| {
                summary.total_tests += 1;
                match test.flag {
                    Flag::Normal => summary.normal_count += 1,
                    Flag::Borderline => summary.borderline_count += 1,
                    Flag::Abnormal => summary.abnormal_count += 1,
                    Flag::Critical => summary.critical_count += 1,
                }
                summary
            });
        summary.flagged_count = summary.total_tests - summary.normal_count;
        summary
    }
}
