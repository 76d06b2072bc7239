//! The `run` subcommand.

use std::sync::Arc;

use clap::Args;

use crate::{
    async_utils::io::ensure_writable_dir,
    config::{Config, ConfigOpts},
    cpu_limit::ProcessLimiter,
    discover::discover_documents,
    ocr::{engines::OcrEngine as _, models::ModelSelector},
    pipeline::{Pipeline, PipelineOptions},
    prelude::*,
    rasterize::PopplerRasterizer,
    shutdown::Shutdown,
    ui::Ui,
};

use super::tesseract_engine;

/// Command-line options for the `run` subcommand.
#[derive(Debug, Args)]
pub struct RunOpts {
    #[clap(flatten)]
    pub config: ConfigOpts,
}

/// The `run` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_run(ui: Ui, opts: &RunOpts) -> Result<()> {
    // Everything that can be misconfigured is checked before we start.
    let config = Config::load(&opts.config).await?;
    debug!(?config, "Loaded configuration");
    ensure_writable_dir(&config.output_dir).await?;

    let limiter = ProcessLimiter::new(config.max_processes);
    let engine = tesseract_engine(&config, limiter.clone());
    let installed = engine.installed_models().await?;
    let selector = ModelSelector::new(
        config.models.clone(),
        config.effective_detection_model(),
        &installed,
    )?;

    let documents = discover_documents(&config.input_dir).await?;
    ui.display_message(
        "🔍",
        &format!(
            "Found {} PDFs in {}",
            documents.len(),
            config.input_dir.display()
        ),
    );

    let rasterizer = Arc::new(PopplerRasterizer::new(
        config.commands.pdfinfo.clone(),
        config.commands.pdftocairo.clone(),
        config.dpi,
        config.max_pages,
        Some(config.page_timeout),
        limiter,
    ));
    let shutdown = Shutdown::from_signals()?;
    let pipeline = Pipeline::new(
        rasterizer,
        engine,
        selector,
        PipelineOptions::from_config(&config),
    );
    let summary = pipeline.run(&ui, documents, shutdown.clone()).await?;
    if shutdown.is_requested() {
        warn!("Batch was interrupted before every document was started");
    }
    summary.finish(&ui)
}
