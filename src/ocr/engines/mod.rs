//! OCR engine interface.

use std::time::Duration;

use crate::{async_utils::CommandError, prelude::*, rasterize::PageImage};

use super::{AttemptFailure, OcrAttempt};

pub mod tesseract;

/// Text recognized by an engine.
#[derive(Clone, Debug, PartialEq)]
pub struct Recognition {
    /// The recognized text, with trailing whitespace removed.
    pub text: String,

    /// Overall confidence between 0.0 and 1.0.
    pub confidence: f32,
}

/// Interface to an OCR engine.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// The models this engine can run.
    async fn installed_models(&self) -> Result<Vec<String>>;

    /// Recognize the text on a page using `model`.
    ///
    /// Implementations must give up after `timeout`. Report a timeout by
    /// returning a [`CommandError::TimedOut`], so that callers can tell it
    /// apart from other failures.
    async fn recognize(
        &self,
        page: &PageImage,
        model: &str,
        timeout: Duration,
    ) -> Result<Recognition>;
}

/// Run one OCR attempt. This never fails: errors become failed attempts.
#[instrument(level = "debug", skip_all, fields(id = %page.document_id, page = page.page_idx, model = model))]
pub async fn attempt(
    engine: &dyn OcrEngine,
    page: &PageImage,
    model: &str,
    timeout: Duration,
) -> OcrAttempt {
    match engine.recognize(page, model, timeout).await {
        Ok(recognition) => {
            debug!(confidence = recognition.confidence, "Recognized page");
            OcrAttempt::recognized(
                page.page_idx,
                model,
                recognition.text,
                recognition.confidence,
            )
        }
        Err(err) => {
            let failure = match err.downcast_ref::<CommandError>() {
                Some(CommandError::TimedOut(limit)) => AttemptFailure::TimedOut(*limit),
                _ => AttemptFailure::Engine(format!("{:#}", err)),
            };
            warn!(%failure, "OCR attempt failed");
            OcrAttempt::failed(page.page_idx, model, failure)
        }
    }
}
