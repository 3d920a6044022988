//! Analyze a stream of lab reports.

use std::{sync::Arc, time::Duration};

use futures::{FutureExt as _, StreamExt as _};
use schemars::JsonSchema;
use serde::Deserializer;

use super::work::{WorkInput, WorkOutput};
use crate::{
    async_utils::{BoxedFuture, BoxedStream, spawn_blocking_propagating_panics},
    catalog::Catalog,
    engine::{
        AnalysisError, AnalysisMetadata, AnalysisOptions, AnalysisResult, analyze,
        summary::Summary,
    },
    extract::extract_text_with_timeout,
    prelude::*,
};

/// An input record describing a report to analyze.
///
/// Either `text` or `path` must be present. If both are, `text` wins.
#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct AnalyzeInput {
    /// Text extracted from the report by OCR.
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub text: Option<String>,

    /// A text file or searchable PDF to read the report from.
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub path: Option<PathBuf>,

    /// OCR confidence score between 0 and 1. Passed through untouched.
    #[serde(default, deserialize_with = "deserialize_number")]
    pub confidence: Option<f64>,

    /// The patient's demographic group (for example, "female"), used to
    /// choose between reference ranges.
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub sex: Option<String>,
}

/// Treat empty strings (as found in CSV files) as missing.
fn deserialize_non_empty<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .filter(|s| !s.trim().is_empty())
        .map(T::from))
}

/// Accept numbers, or strings containing numbers (as found in CSV files).
fn deserialize_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::String(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrString::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid number: {s:?}"))),
        None => Ok(None),
    }
}

/// An output record describing an analyzed report.
#[derive(Clone, Debug, JsonSchema, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AnalyzeOutput {
    /// The input path, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// The OCR confidence from the input, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// Our results. Present if and only if the analysis succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisReport>,

    /// Why we have no results. Present if and only if the analysis failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<AnalysisFailure>,
}

/// Successful results for a report.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct AnalysisReport {
    /// Matched panels and tests.
    #[serde(flatten)]
    pub result: AnalysisResult,

    /// Counts by flag, computed from `result`.
    pub summary: Summary,

    /// Extra information about the analysis.
    pub metadata: AnalysisMetadata,
}

/// A structured failure.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
pub struct AnalysisFailure {
    /// What kind of failure this is.
    pub kind: FailureKind,

    /// A user-facing explanation.
    pub message: String,
}

/// Kinds of [`AnalysisFailure`].
#[derive(Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// We couldn't get any text for the report.
    Extraction,
    /// The text was too short to contain results.
    InsufficientText,
    /// None of the catalog's tests appeared in the text.
    NoMatch,
}

impl From<&AnalysisError> for FailureKind {
    fn from(err: &AnalysisError) -> Self {
        match err {
            AnalysisError::InsufficientText { .. } => FailureKind::InsufficientText,
            AnalysisError::NoMatch { .. } => FailureKind::NoMatch,
        }
    }
}

/// Shared settings for [`analyze_reports`].
#[derive(Clone, Debug)]
pub struct AnalyzeSettings {
    /// Options for the engine. Per-record demographics are filled in later.
    pub options: AnalysisOptions,

    /// How long to wait for text extraction from a file.
    pub extract_timeout: Duration,
}

/// Turn a stream of inputs into a stream of futures yielding outputs.
///
/// Use [`futures::StreamExt::buffered`] to run them concurrently.
pub fn analyze_reports(
    input: BoxedStream<Result<WorkInput<AnalyzeInput>>>,
    catalog: Arc<Catalog>,
    settings: Arc<AnalyzeSettings>,
) -> BoxedStream<BoxedFuture<Result<WorkOutput<AnalyzeOutput>>>> {
    input
        .map(move |input| {
            let catalog = catalog.clone();
            let settings = settings.clone();
            async move { analyze_report(input?, catalog, &settings).await }.boxed()
        })
        .boxed()
}

/// Analyze a single report.
///
/// Per-report problems become failed output records, not errors. An `Err`
/// here means something is badly wrong with the process itself.
#[instrument(level = "debug", skip_all, fields(id = %input.id))]
pub async fn analyze_report(
    input: WorkInput<AnalyzeInput>,
    catalog: Arc<Catalog>,
    settings: &AnalyzeSettings,
) -> Result<WorkOutput<AnalyzeOutput>> {
    let WorkInput { id, data } = input;
    let mut output = AnalyzeOutput {
        path: data.path.clone(),
        confidence: data.confidence,
        analysis: None,
        failure: None,
    };

    let text = match report_text(&data, settings.extract_timeout).await {
        Ok(text) => text,
        Err(err) => {
            output.failure = Some(AnalysisFailure {
                kind: FailureKind::Extraction,
                message: "could not read document".to_owned(),
            });
            return Ok(WorkOutput::new_failed(id, vec![format!("{err:?}")], output));
        }
    };

    let options = AnalysisOptions {
        demographic: data.sex.clone(),
        ..settings.options.clone()
    };
    let result =
        spawn_blocking_propagating_panics(move || analyze(&text, &catalog, &options))
            .await?;

    match result {
        Ok(analysis) => {
            let summary = analysis.result.summary();
            debug!(tests = summary.total_tests, flagged = summary.flagged_count, "Analyzed report");
            output.analysis = Some(AnalysisReport {
                result: analysis.result,
                summary,
                metadata: analysis.metadata,
            });
            Ok(WorkOutput::new_ok(id, output))
        }
        Err(err) => {
            debug!(%err, "Could not analyze report");
            output.failure = Some(AnalysisFailure {
                kind: FailureKind::from(&err),
                message: err.to_string(),
            });
            Ok(WorkOutput::new_failed(id, vec![err.to_string()], output))
        }
    }
}

/// Get the text of a report, from the record itself or from a file.
async fn report_text(input: &AnalyzeInput, timeout: Duration) -> Result<String> {
    match (&input.text, &input.path) {
        (Some(text), _) => Ok(text.clone()),
        (None, Some(path)) => extract_text_with_timeout(path, timeout).await,
        (None, None) => Err(anyhow!("input record has neither `text` nor `path`")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::queues::work::WorkStatus;

    fn settings() -> AnalyzeSettings {
        AnalyzeSettings {
            options: AnalysisOptions::default(),
            extract_timeout: Duration::from_secs(5),
        }
    }

    fn input(value: Value) -> WorkInput<AnalyzeInput> {
        WorkInput::from_json(value).unwrap()
    }

    #[test]
    fn test_csv_style_input() {
        let record = input(json!({
            "id": "r1",
            "text": "Hemoglobin 150",
            "path": "",
            "confidence": "0.93",
            "sex": " ",
        }));
        assert_eq!(record.data.text.as_deref(), Some("Hemoglobin 150"));
        assert_eq!(record.data.path, None);
        assert_eq!(record.data.confidence, Some(0.93));
        assert_eq!(record.data.sex, None);

        let record = input(json!({ "id": 1, "confidence": 0.5 }));
        assert_eq!(record.data.confidence, Some(0.5));
        assert!(
            WorkInput::<AnalyzeInput>::from_json(json!({ "id": 1, "confidence": "high" }))
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_successful_report() {
        let catalog = Arc::new(Catalog::builtin().unwrap());
        let output = analyze_report(
            input(json!({
                "id": "r1",
                "text": "Laboratory Report\nHemoglobin: 95 g/L\nPlatelets: 250",
                "confidence": 0.87,
                "sex": "female",
            })),
            catalog,
            &settings(),
        )
        .await
        .unwrap();
        assert_eq!(output.status, WorkStatus::Ok);
        assert!(output.errors.is_empty());
        assert!(output.data.failure.is_none());

        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["id"], "r1");
        assert_eq!(json["status"], "ok");
        assert_eq!(json["confidence"], 0.87);
        assert_eq!(
            json["analysis"]["panels"]["cbc"]["tests"]["hemoglobin"]["flag"],
            "critical"
        );
        assert_eq!(json["analysis"]["summary"]["totalTests"], 2);
        assert_eq!(json["analysis"]["summary"]["flaggedCount"], 1);
        assert_eq!(json["analysis"]["metadata"]["testsFound"], 2);
    }

    #[tokio::test]
    async fn test_failures_are_structured() {
        let catalog = Arc::new(Catalog::builtin().unwrap());

        let output = analyze_report(
            input(json!({ "id": 1, "text": "blurry" })),
            catalog.clone(),
            &settings(),
        )
        .await
        .unwrap();
        assert_eq!(output.status, WorkStatus::Failed);
        assert!(output.data.analysis.is_none());
        assert_eq!(
            output.data.failure.as_ref().unwrap().kind,
            FailureKind::InsufficientText
        );

        let output = analyze_report(
            input(json!({ "id": 2, "text": "Dear patient, your appointment is on Tuesday." })),
            catalog.clone(),
            &settings(),
        )
        .await
        .unwrap();
        assert_eq!(output.data.failure.as_ref().unwrap().kind, FailureKind::NoMatch);
        let json = serde_json::to_value(&output).unwrap();
        assert!(json.get("analysis").is_none());

        let output = analyze_report(input(json!({ "id": 3 })), catalog.clone(), &settings())
            .await
            .unwrap();
        assert_eq!(output.data.failure.as_ref().unwrap().kind, FailureKind::Extraction);
        assert_eq!(output.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_reads_text_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        std::fs::write(&path, "TSH: 9.1 mU/L\n").unwrap();

        let catalog = Arc::new(Catalog::builtin().unwrap());
        let output = analyze_report(
            input(json!({ "id": 1, "path": path })),
            catalog,
            &settings(),
        )
        .await
        .unwrap();
        assert_eq!(output.status, WorkStatus::Ok);
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(
            json["analysis"]["panels"]["thyroid"]["tests"]["tsh"]["flag"],
            "critical"
        );
    }
}
