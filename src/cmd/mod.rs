//! Command-line entry points.

use std::sync::Arc;

use crate::{
    config::Config, cpu_limit::ProcessLimiter, ocr::engines::tesseract::TesseractEngine,
};

pub mod models;
pub mod run;
pub mod schema;

/// Build the OCR engine described by our configuration.
fn tesseract_engine(config: &Config, limiter: ProcessLimiter) -> Arc<TesseractEngine> {
    Arc::new(TesseractEngine::new(
        config.commands.tesseract.clone(),
        config.psm,
        limiter,
    ))
}
