//! Choosing which models to run on a page.

use std::time::Duration;

use super::{
    AttemptOutcome,
    engines::{OcrEngine, attempt},
    script::{Script, detect_script, model_handles_script},
};
use crate::{prelude::*, rasterize::PageImage};

/// Decides which models to try on each page, in priority order.
#[derive(Clone, Debug)]
pub struct ModelSelector {
    models: Vec<String>,
    detection_model: Option<String>,
}

impl ModelSelector {
    /// Create a selector, checking that every model we might run is installed.
    ///
    /// `detection_model` enables the detection pass. Combined models like
    /// `jpn+kor` are checked one component at a time.
    pub fn new(
        models: Vec<String>,
        detection_model: Option<String>,
        installed: &[String],
    ) -> Result<Self> {
        if models.is_empty() {
            return Err(anyhow!("no OCR models configured"));
        }
        let mut missing = vec![];
        for model in models.iter().chain(detection_model.iter()) {
            for part in model.split('+') {
                if part.is_empty() || !installed.iter().any(|m| m == part) {
                    missing.push(part.to_owned());
                }
            }
        }
        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(anyhow!(
                "OCR models not installed: {} (installed: {})",
                missing.join(", "),
                installed.join(", "),
            ));
        }
        Ok(Self {
            models,
            detection_model,
        })
    }

    /// The configured models, in priority order.
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Choose the models to try on `page`. Never empty.
    ///
    /// Without a detection model this is always the full list. Otherwise we
    /// run the detection model, guess the script of what it found, and keep
    /// only the models for that script. If anything goes wrong we fall back to
    /// the full list.
    pub async fn select(
        &self,
        engine: &dyn OcrEngine,
        page: &PageImage,
        timeout: Duration,
    ) -> Vec<String> {
        let Some(detection_model) = &self.detection_model else {
            return self.models.clone();
        };
        let detection = attempt(engine, page, detection_model, timeout).await;
        let AttemptOutcome::Recognized { text, .. } = &detection.outcome else {
            debug!(page = page.page_idx, "Script detection failed, trying all models");
            return self.models.clone();
        };
        let Some(script) = detect_script(text) else {
            debug!(page = page.page_idx, "No script detected, trying all models");
            return self.models.clone();
        };
        let narrowed = self.narrow_to_script(script);
        if narrowed.is_empty() {
            debug!(page = page.page_idx, ?script, "No model matches script");
            self.models.clone()
        } else {
            debug!(page = page.page_idx, ?script, models = ?narrowed, "Narrowed models");
            narrowed
        }
    }

    /// The configured models that handle `script`, in priority order.
    fn narrow_to_script(&self, script: Script) -> Vec<String> {
        self.models
            .iter()
            .filter(|m| model_handles_script(m, script))
            .cloned()
            .collect()
    }
}
