//! The `analyze` subcommand.

use std::{sync::Arc, time::Duration};

use clap::Args;
use futures::StreamExt as _;

use super::{CatalogOpts, StreamOpts};
use crate::{
    engine::{AnalysisOptions, DEFAULT_MIN_TEXT_LENGTH},
    prelude::*,
    queues::{
        analyze::{AnalyzeInput, AnalyzeSettings, analyze_reports},
        work::{WorkInput, WorkOutput},
    },
    ui::{ProgressConfig, Ui},
};

/// Analyze command line arguments.
#[derive(Debug, Args)]
pub struct AnalyzeOpts {
    /// Input JSONL or CSV file, with `id` and either `text` or `path` fields.
    /// Reads standard input if omitted.
    pub input_path: Option<PathBuf>,

    /// Output JSONL file. Writes to standard output if omitted.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub catalog_opts: CatalogOpts,

    #[clap(flatten)]
    pub stream_opts: StreamOpts,

    /// Reject reports whose normalized text is shorter than this.
    #[clap(long, default_value_t = DEFAULT_MIN_TEXT_LENGTH)]
    pub min_text_length: usize,

    /// Which demographic reference ranges to prefer, in order, when a record
    /// has no `sex` field.
    #[clap(long, value_delimiter = ',', default_values = ["female", "male"])]
    pub range_priority: Vec<String>,

    /// Seconds to wait for text extraction from each file.
    #[clap(long = "extract-timeout", value_name = "SECS", default_value = "60")]
    pub extract_timeout_secs: u64,
}

/// The `analyze` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_analyze(ui: Ui, opts: &AnalyzeOpts) -> Result<()> {
    // Fail before reading any input if the catalog is bad.
    let catalog = opts.catalog_opts.load().await?;

    let settings = Arc::new(AnalyzeSettings {
        options: AnalysisOptions {
            min_text_length: opts.min_text_length,
            range_priority: opts.range_priority.clone(),
            demographic: None,
        },
        extract_timeout: Duration::from_secs(opts.extract_timeout_secs),
    });

    // Open up our input stream and parse into records.
    let (input, len) =
        WorkInput::<AnalyzeInput>::read_stream(&ui, opts.input_path.as_deref()).await?;
    let input = opts.stream_opts.apply_stream_input_opts(input);

    // Configure our progress bar.
    let pb = ui.new_for_len(
        &ProgressConfig {
            emoji: "🧪",
            msg: "Analyzing reports",
            done_msg: "Analyzed reports",
        },
        opts.stream_opts.effective_len(len),
    );

    let output = analyze_reports(input, catalog, settings)
        .buffered(opts.stream_opts.job_count);
    let output = pb.wrap_stream(output).boxed();

    WorkOutput::write_stream(
        &ui,
        opts.output_path.as_deref(),
        output,
        &opts.stream_opts,
    )
    .await
}
