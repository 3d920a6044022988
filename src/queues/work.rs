//! Input and output records for batch processing.
//!
//! Every input record has an `id`, which we copy to the matching output
//! record. Output records also carry a [`WorkStatus`] and any errors, so that
//! one bad input never aborts a whole batch.

use futures::StreamExt;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::{
    async_utils::{
        BoxedStream,
        io::{JsonlWriter, read_jsonl_or_csv},
    },
    cmd::StreamOpts,
    prelude::*,
    ui::Ui,
};

/// Input record for a batch of work.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WorkInput<T>
where
    T: 'static,
{
    /// The unique ID of the work item.
    pub id: Value,

    /// The input data for the work item.
    #[serde(flatten)]
    pub data: T,
}

impl<T> WorkInput<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Convert from a JSON value to the input type.
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value::<Self>(value).context("failed to deserialize input")
    }

    /// Read a stream from a [`Path`] or from standard input, along with the
    /// number of records if we know it.
    pub async fn read_stream(
        ui: &Ui,
        path: Option<&Path>,
    ) -> Result<(BoxedStream<Result<Self>>, Option<usize>)> {
        let records = read_jsonl_or_csv(ui, path).await?;
        let stream = records
            .stream
            .map(|value| Self::from_json(value?))
            .boxed();
        Ok((stream, records.len))
    }
}

/// Output status of a work item.
#[derive(Clone, Copy, Debug, JsonSchema, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// The work item was successful.
    Ok,

    /// The work item failed.
    Failed,
}

/// Output record for a batch of work.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct WorkOutput<T>
where
    T: 'static,
{
    /// The unique ID of the work item.
    pub id: Value,

    /// What is the status of this work item?
    pub status: WorkStatus,

    /// Any errors that occurred during processing.
    pub errors: Vec<String>,

    /// The output data for the work item.
    #[serde(flatten)]
    pub data: T,
}

impl<T> WorkOutput<T>
where
    T: Serialize + Send + 'static,
{
    /// Create a new successful output record.
    pub fn new_ok(id: Value, data: T) -> Self {
        Self {
            id,
            status: WorkStatus::Ok,
            errors: vec![],
            data,
        }
    }

    /// Create a new failed output record.
    pub fn new_failed(id: Value, errors: Vec<String>, data: T) -> Self {
        Self {
            id,
            status: WorkStatus::Failed,
            errors,
            data,
        }
    }

    /// Write a stream of outputs to a [`Path`] or to standard output.
    ///
    /// Fails if more records failed than `stream_opts` allows.
    pub async fn write_stream(
        ui: &Ui,
        path: Option<&Path>,
        mut stream: BoxedStream<Result<Self>>,
        stream_opts: &StreamOpts,
    ) -> Result<()> {
        let mut writer = JsonlWriter::create(path).await?;
        let mut counters = WorkOutputCounters::default();
        while let Some(output) = stream.next().await {
            let output = output?;
            counters.update(&output);
            writer.write(&output).await?;
        }
        writer.finish().await?;
        counters.finish(ui, stream_opts.allowed_failure_rate)
    }
}

/// Counters for a single run of [`WorkOutput::write_stream`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkOutputCounters {
    /// How many records did we process?
    pub total_record_count: usize,

    /// How many records did we fail to process?
    pub failure_count: usize,
}

impl WorkOutputCounters {
    /// Update counters for a work item.
    pub fn update<T>(&mut self, item: &WorkOutput<T>) {
        self.total_record_count += 1;
        if item.status != WorkStatus::Ok {
            self.failure_count += 1;
        }
    }

    /// The fraction of records that failed.
    pub fn failure_rate(&self) -> f32 {
        if self.total_record_count == 0 {
            0.0
        } else {
            self.failure_count as f32 / self.total_record_count as f32
        }
    }

    /// Display counter values to the user, and fail if too many records
    /// failed.
    pub fn finish(&self, ui: &Ui, allowed_failure_rate: f32) -> Result<()> {
        let failure_rate = self.failure_rate();
        if failure_rate > allowed_failure_rate {
            Err(anyhow!(
                "{}/{} ({:.2}%) of outputs were failures, but only {:.2}% were allowed",
                self.failure_count,
                self.total_record_count,
                failure_rate * 100.0,
                allowed_failure_rate * 100.0
            ))
        } else {
            if self.failure_count > 0 {
                ui.display_message(
                    "❌",
                    &format!("{} records could not be processed", self.failure_count),
                );
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_flattens_data() {
        #[derive(Debug, Deserialize)]
        struct Data {
            text: String,
        }

        let input =
            WorkInput::<Data>::from_json(serde_json::json!({ "id": 7, "text": "hi" }))
                .unwrap();
        assert_eq!(input.id, 7);
        assert_eq!(input.data.text, "hi");
        assert!(WorkInput::<Data>::from_json(serde_json::json!({ "text": "hi" })).is_err());
    }

    #[test]
    fn test_counters_enforce_failure_rate() {
        let ui = Ui::init_for_tests();
        let mut counters = WorkOutputCounters::default();
        assert_eq!(counters.failure_rate(), 0.0);

        counters.update(&WorkOutput::new_ok(Value::from(1), ()));
        counters.update(&WorkOutput::new_failed(Value::from(2), vec![], ()));
        assert_eq!(counters.total_record_count, 2);
        assert_eq!(counters.failure_count, 1);
        assert!(counters.finish(&ui, 0.5).is_ok());
        assert!(counters.finish(&ui, 0.1).is_err());
    }
}
