//! The `models` subcommand.

use clap::Args;
use tokio::io::AsyncWriteExt as _;

use crate::{
    async_utils::io::create_writer,
    config::{Config, ConfigOpts},
    cpu_limit::ProcessLimiter,
    ocr::{engines::OcrEngine as _, models::ModelSelector},
    prelude::*,
};

use super::tesseract_engine;

/// Command-line options for the `models` subcommand.
#[derive(Debug, Args)]
pub struct ModelsOpts {
    #[clap(flatten)]
    pub config: ConfigOpts,
}

/// The `models` subcommand. Lists installed models, marks the configured
/// ones, and fails if any configured model is missing.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_models(opts: &ModelsOpts) -> Result<()> {
    let config = Config::load(&opts.config).await?;
    let engine = tesseract_engine(&config, ProcessLimiter::new(1));
    let installed = engine.installed_models().await?;

    let mut wtr = create_writer(None).await?;
    for model in &installed {
        let line = match config.models.iter().position(|m| m == model) {
            Some(priority) => format!("{}\tconfigured (priority {})\n", model, priority + 1),
            None => format!("{}\n", model),
        };
        wtr.write_all(line.as_bytes())
            .await
            .context("failed to write model list")?;
    }
    wtr.flush().await.context("failed to flush model list")?;

    ModelSelector::new(
        config.models.clone(),
        config.effective_detection_model(),
        &installed,
    )?;
    Ok(())
}
