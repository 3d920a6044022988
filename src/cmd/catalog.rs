//! The `catalog` subcommand.

use clap::Args;
use tokio::io::AsyncWriteExt as _;

use super::CatalogOpts;
use crate::{async_utils::io::create_writer, prelude::*, ui::Ui};

/// Catalog command line arguments.
#[derive(Debug, Args)]
pub struct CatalogCmdOpts {
    #[clap(flatten)]
    pub catalog_opts: CatalogOpts,

    /// Print the validated catalog as JSON.
    #[clap(long)]
    pub dump: bool,

    /// Where to write the JSON dump. Defaults to standard output.
    #[clap(short = 'o', long = "out", requires = "dump")]
    pub output_path: Option<PathBuf>,
}

/// The `catalog` subcommand. Validates a catalog, and optionally dumps it.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_catalog(ui: Ui, opts: &CatalogCmdOpts) -> Result<()> {
    let catalog = opts.catalog_opts.load().await?;
    let name = match &opts.catalog_opts.catalog_path {
        Some(path) => path.display().to_string(),
        None => "builtin catalog".to_owned(),
    };
    ui.display_message(
        "✅",
        &format!(
            "{name} is valid: {} panels, {} tests",
            catalog.panels().len(),
            catalog.test_count()
        ),
    );

    if opts.dump {
        let mut wtr = create_writer(opts.output_path.as_deref()).await?;
        let json = serde_json::to_string_pretty(&*catalog)
            .context("failed to serialize catalog")?;
        wtr.write_all(json.as_bytes())
            .await
            .context("failed to write catalog")?;
        wtr.write_all(b"\n")
            .await
            .context("failed to write catalog")?;
        wtr.flush().await.context("failed to flush catalog")?;
    }
    Ok(())
}
