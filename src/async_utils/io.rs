//! I/O utilities.
//!
//! This module is responsible for reading catalogs, report text, and JSONL or
//! CSV input records, and for writing JSONL output. Input formats are detected
//! from file extensions, or from the first byte of standard input.

use std::{pin::Pin, sync::Arc, task::Context};

use futures::{TryStreamExt, stream::StreamExt as _};
use peekable::tokio::AsyncPeekable;
use serde_json::Map;
use tokio::{
    fs::File,
    io::{
        AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt as _,
        BufReader, BufWriter, ReadBuf,
    },
};
use tokio_stream::wrappers::LinesStream;

use crate::{
    prelude::*,
    ui::{ProgressConfig, Ui},
};

use super::BoxedStream;

/// A smart async reader that uses [`AsyncPeekable`] to detect whether the input is JSON
/// or JSONL, or something else.
pub struct SmartReader {
    /// Do we expect our input to be JSONL?
    is_json_like: bool,

    /// A human-readable description of the input source, for error messages.
    description: String,

    /// Our reader, pinned so that async reads can hold pointers into it.
    reader: Pin<Box<dyn AsyncBufRead + Unpin + Send + Sync + 'static>>,
}

impl SmartReader {
    /// Create a new `SmartReader` from an existing reader.
    pub async fn new_from_reader(
        description: String,
        reader: impl AsyncRead + Unpin + Send + Sync + 'static,
    ) -> Result<Self> {
        let reader = BufReader::new(reader);
        let mut peekable = AsyncPeekable::new(Box::new(reader));
        let mut buffer = vec![0; 1];
        peekable
            .peek_exact(&mut buffer)
            .await
            .with_context(|| format!("Failed to read from {description}"))?;
        let is_json_like = buffer[0] == b'{';
        Ok(Self {
            is_json_like,
            description,
            reader: Box::pin(BufReader::new(peekable)),
        })
    }

    /// Create a new `SmartReader` from a [`Path`].
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().unwrap_or_default();
        let is_json_like = ext == "json" || ext == "jsonl";
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open file at path: {:?}", path))?;
        Ok(Self {
            is_json_like,
            description: path.to_string_lossy().into_owned(),
            reader: Box::pin(BufReader::new(file)),
        })
    }

    /// Create a new `SmartReader` from either a [`Path`] or standard input.
    pub async fn new_from_path_or_stdin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::new_from_path(path).await,
            None => {
                let stdin = tokio::io::stdin();
                Self::new_from_reader("stdin".to_owned(), stdin).await
            }
        }
    }

    /// Is our input JSON-like?
    pub fn is_json_like(&self) -> bool {
        self.is_json_like
    }
}

impl AsyncRead for SmartReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        Pin::get_mut(self).reader.as_mut().poll_read(cx, buf)
    }
}

impl AsyncBufRead for SmartReader {
    fn poll_fill_buf(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> std::task::Poll<std::io::Result<&[u8]>> {
        Pin::get_mut(self).reader.as_mut().poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::get_mut(self).reader.as_mut().consume(amt)
    }
}

/// Read a UTF-8 text file.
pub async fn read_text_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))
}

/// Count JSONL or CSV records in a file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn count_jsonl_or_csv_records(ui: &Ui, path: &Path) -> Result<Option<usize>> {
    // If this isn't a file, we can't count records. This may happen if our
    // input is a named pipe.
    if !path.is_file() {
        return Ok(None);
    }

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "🧮",
        msg: "Counting input records",
        done_msg: "Counted input records",
    });

    let reader = SmartReader::new_from_path(path).await?;
    let count = if reader.is_json_like() {
        let lines = LinesStream::new(reader.lines());
        lines
            .try_fold(0, |acc, line| async move {
                Ok(if line.trim().is_empty() { acc } else { acc + 1 })
            })
            .await?
    } else {
        csv_async::AsyncReaderBuilder::new()
            .create_reader(reader)
            .into_byte_records()
            .try_fold(0, |acc, _record| async move { Ok(acc + 1) })
            .await?
    };
    spinner.finish_with_message(format!("Found {count} records"));
    Ok(Some(count))
}

/// A stream of [`serde_json::Value`] values.
pub type JsonStream = BoxedStream<Result<Value>>;

/// Input records, plus a count if we know it.
pub struct InputRecords {
    pub stream: JsonStream,
    pub len: Option<usize>,
}

/// Read JSONL or CSV from a file or stdin.
///
/// CSV records become JSON objects with string values.
pub async fn read_jsonl_or_csv(ui: &Ui, path: Option<&Path>) -> Result<InputRecords> {
    let len = match path {
        Some(path) => count_jsonl_or_csv_records(ui, path).await?,
        None => None,
    };

    let reader = SmartReader::new_from_path_or_stdin(path).await?;
    let description = Arc::new(reader.description.clone());
    let stream: JsonStream = if reader.is_json_like() {
        LinesStream::new(reader.lines())
            .try_filter(|line| futures::future::ready(!line.trim().is_empty()))
            .then(move |line| {
                let description = description.clone();
                async move {
                    let line = line?;
                    let value: Value = serde_json::from_str(&line).with_context(|| {
                        format!(
                            "Failed to parse JSON from line in {:?}: {:?}",
                            description, line
                        )
                    })?;
                    Ok(value)
                }
            })
            .boxed()
    } else {
        let mut reader = csv_async::AsyncReaderBuilder::new().create_reader(reader);
        let headers = Arc::new(
            reader
                .headers()
                .await
                .with_context(|| {
                    format!("Failed to read CSV headers from {:?}", description)
                })?
                .to_owned(),
        );
        reader
            .into_records()
            .then(move |record| {
                let description = description.clone();
                let headers = headers.clone();
                async move {
                    let record = record.with_context(|| {
                        format!("Failed to read CSV record from {:?}", description)
                    })?;
                    let map: Map<String, Value> = headers
                        .iter()
                        .zip(record.iter())
                        .map(|(header, value)| {
                            (header.to_owned(), Value::String(value.to_owned()))
                        })
                        .collect();
                    Ok(Value::Object(map))
                }
            })
            .boxed()
    };
    Ok(InputRecords { stream, len })
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Writes one JSON value per line to a file or standard output.
pub struct JsonlWriter {
    writer: BufWriter<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>>,
}

impl JsonlWriter {
    /// Create a writer for `path`, or for standard output.
    pub async fn create(path: Option<&Path>) -> Result<Self> {
        Ok(Self {
            writer: BufWriter::new(create_writer(path).await?),
        })
    }

    /// Write a single value.
    pub async fn write(&mut self, value: &impl Serialize) -> Result<()> {
        let json = serde_json::to_string(value).context("Failed to serialize JSON")?;
        self.writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write JSON to output")?;
        self.writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to output")?;
        Ok(())
    }

    /// Flush our output.
    pub async fn finish(mut self) -> Result<()> {
        self.writer.flush().await.context("Failed to flush output")
    }
}
