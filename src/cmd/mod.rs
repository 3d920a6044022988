//! Command-line entry points.

use std::sync::Arc;

use clap::Args;
use futures::StreamExt as _;

use crate::{async_utils::BoxedStream, catalog::Catalog, prelude::*};

pub mod analyze;
pub mod catalog;
pub mod schema;

/// Common options for subcommands that process data streams.
#[derive(Debug, Clone, Args)]
pub struct StreamOpts {
    /// Limit processing to the first N records.
    #[clap(long)]
    take_first: Option<usize>,

    /// Max number of reports to process at a time.
    #[clap(short = 'j', long = "jobs", default_value = "8")]
    pub job_count: usize,

    /// What portion of inputs should we allow to fail? Specified as a
    /// number between 0.0 and 1.0.
    #[clap(long, default_value = "0.01")]
    pub allowed_failure_rate: f32,
}

impl StreamOpts {
    /// Apply any necessary stream opts to our input stream.
    pub fn apply_stream_input_opts<T>(
        &self,
        input: BoxedStream<Result<T>>,
    ) -> BoxedStream<Result<T>>
    where
        T: 'static,
    {
        if let Some(take_first) = self.take_first {
            input.take(take_first).boxed()
        } else {
            input
        }
    }

    /// How many records will we actually process, if we know?
    pub fn effective_len(&self, len: Option<usize>) -> Option<usize> {
        match (len, self.take_first) {
            (Some(len), Some(take_first)) => Some(len.min(take_first)),
            (len, _) => len,
        }
    }
}

/// Options for choosing a catalog.
#[derive(Debug, Clone, Args)]
pub struct CatalogOpts {
    /// A TOML catalog of lab panels and tests. Defaults to the builtin
    /// catalog.
    #[clap(long = "catalog", env = "LAB_LENS_CATALOG", value_name = "PATH")]
    pub catalog_path: Option<PathBuf>,
}

impl CatalogOpts {
    /// Load and validate the selected catalog.
    pub async fn load(&self) -> Result<Arc<Catalog>> {
        Catalog::load(self.catalog_path.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_take_first() {
        let opts = StreamOpts {
            take_first: Some(2),
            job_count: 1,
            allowed_failure_rate: 0.0,
        };
        let input = futures::stream::iter((0..5).map(Ok)).boxed();
        let taken = opts
            .apply_stream_input_opts(input)
            .collect::<Vec<Result<i32>>>()
            .await;
        assert_eq!(taken.len(), 2);
        assert_eq!(opts.effective_len(Some(5)), Some(2));
        assert_eq!(opts.effective_len(Some(1)), Some(1));
        assert_eq!(opts.effective_len(None), None);
    }
}
