//! OCR attempts and per-page results.

use std::time::Duration;

use self::script::Script;

pub mod aggregate;
pub mod engines;
pub mod models;
pub mod script;

/// The result of running one model on one page.
#[derive(Clone, Debug, PartialEq)]
pub struct OcrAttempt {
    /// Zero-based page index.
    pub page_idx: usize,

    /// The model we ran.
    pub model: String,

    /// What happened.
    pub outcome: AttemptOutcome,
}

impl OcrAttempt {
    /// Build a successful attempt. `confidence` is clamped to `[0.0, 1.0]`.
    pub fn recognized(page_idx: usize, model: &str, text: String, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            page_idx,
            model: model.to_owned(),
            outcome: AttemptOutcome::Recognized { text, confidence },
        }
    }

    /// Build a failed attempt.
    pub fn failed(page_idx: usize, model: &str, failure: AttemptFailure) -> Self {
        Self {
            page_idx,
            model: model.to_owned(),
            outcome: AttemptOutcome::Failed(failure),
        }
    }

    /// The confidence, if this attempt succeeded.
    pub fn confidence(&self) -> Option<f32> {
        match &self.outcome {
            AttemptOutcome::Recognized { confidence, .. } => Some(*confidence),
            AttemptOutcome::Failed(_) => None,
        }
    }
}

/// The outcome of an [`OcrAttempt`].
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptOutcome {
    /// The engine returned text, with a confidence between 0.0 and 1.0.
    Recognized { text: String, confidence: f32 },

    /// The engine failed.
    Failed(AttemptFailure),
}

/// Why an [`OcrAttempt`] failed.
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptFailure {
    /// The engine ran past the per-page timeout.
    TimedOut(Duration),

    /// The engine reported an error.
    Engine(String),
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::TimedOut(limit) => {
                write!(f, "timed out after {}s", limit.as_secs_f64())
            }
            AttemptFailure::Engine(msg) => f.write_str(msg),
        }
    }
}

/// The chosen text for one page.
#[derive(Clone, Debug, PartialEq)]
pub struct PageResult {
    /// Zero-based page index.
    pub page_idx: usize,

    /// What we ended up with.
    pub outcome: PageOutcome,
}

impl PageResult {
    /// A page that could not be recognized.
    pub fn failed(page_idx: usize, reasons: Vec<String>) -> Self {
        Self {
            page_idx,
            outcome: PageOutcome::Failed { reasons },
        }
    }

    /// The recognized text, or `""` for a failed page.
    pub fn text(&self) -> &str {
        match &self.outcome {
            PageOutcome::Recognized { text, .. } => text,
            PageOutcome::Failed { .. } => "",
        }
    }

    /// Did we get text for this page?
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PageOutcome::Recognized { .. })
    }
}

/// The outcome of a [`PageResult`].
#[derive(Clone, Debug, PartialEq)]
pub enum PageOutcome {
    /// We picked the text from `model`.
    Recognized {
        text: String,
        model: String,
        confidence: f32,
        script: Option<Script>,
    },

    /// Every attempt failed. The reasons are formatted as `model: reason`.
    Failed { reasons: Vec<String> },
}
