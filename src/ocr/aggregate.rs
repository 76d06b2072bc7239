//! Combine OCR attempts into page results, and page results into documents.

use std::cmp::Ordering;

use super::{AttemptOutcome, OcrAttempt, PageOutcome, PageResult, script::detect_script};
use crate::prelude::*;

/// A successful attempt, with what we need to break ties.
struct Candidate {
    rank: usize,
    order: usize,
    model: String,
    text: String,
    confidence: f32,
}

/// Pick the best attempt for a page.
///
/// Failed attempts are ignored. The highest confidence wins, and ties go to
/// whichever model comes first in `priority`. Models missing from `priority`
/// lose ties to every listed model, and to earlier attempts.
pub fn aggregate(page_idx: usize, attempts: Vec<OcrAttempt>, priority: &[String]) -> PageResult {
    let rank = |model: &str| {
        priority
            .iter()
            .position(|m| m == model)
            .unwrap_or(usize::MAX)
    };

    let mut reasons = vec![];
    let mut best: Option<Candidate> = None;
    for (order, attempt) in attempts.into_iter().enumerate() {
        let OcrAttempt { model, outcome, .. } = attempt;
        let (text, confidence) = match outcome {
            AttemptOutcome::Recognized { text, confidence } => (text, confidence),
            AttemptOutcome::Failed(failure) => {
                reasons.push(format!("{}: {}", model, failure));
                continue;
            }
        };
        let candidate = Candidate {
            rank: rank(&model),
            order,
            model,
            text,
            confidence,
        };
        let better = match &best {
            None => true,
            Some(best) => match candidate.confidence.total_cmp(&best.confidence) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => (candidate.rank, candidate.order) < (best.rank, best.order),
            },
        };
        if better {
            best = Some(candidate);
        }
    }

    match best {
        Some(Candidate {
            model,
            text,
            confidence,
            ..
        }) => {
            let script = detect_script(&text);
            PageResult {
                page_idx,
                outcome: PageOutcome::Recognized {
                    text,
                    model,
                    confidence,
                    script,
                },
            }
        }
        None => {
            if reasons.is_empty() {
                reasons.push("no OCR attempts were made".to_owned());
            }
            PageResult::failed(page_idx, reasons)
        }
    }
}

/// All the pages of a document, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentResult {
    /// The document ID.
    pub id: String,

    /// The page texts joined by the page separator. Failed pages contribute
    /// an empty string.
    pub text: String,

    /// Per-page results, sorted by page index.
    pub pages: Vec<PageResult>,

    /// Indices of pages we could not recognize.
    pub failed_pages: Vec<usize>,
}

impl DocumentResult {
    /// How many pages did we get text for?
    pub fn recognized_page_count(&self) -> usize {
        self.pages.iter().filter(|p| p.is_success()).count()
    }

    /// Did we fail to get any text at all?
    pub fn has_no_content(&self) -> bool {
        self.recognized_page_count() == 0
    }
}

/// Put page results back in order and join them into a document.
///
/// `pages` may arrive in any order, but must contain exactly one result for
/// each index in `0..page_count`.
pub fn assemble(
    id: &str,
    page_count: usize,
    mut pages: Vec<PageResult>,
    separator: &str,
) -> Result<DocumentResult> {
    pages.sort_by_key(|p| p.page_idx);
    if pages.len() != page_count
        || pages.iter().enumerate().any(|(idx, p)| p.page_idx != idx)
    {
        return Err(anyhow!(
            "expected one result for each of {} pages of {}, got indices {:?}",
            page_count,
            id,
            pages.iter().map(|p| p.page_idx).collect::<Vec<_>>(),
        ));
    }

    let text = pages
        .iter()
        .map(PageResult::text)
        .collect::<Vec<_>>()
        .join(separator);
    let failed_pages = pages
        .iter()
        .filter(|p| !p.is_success())
        .map(|p| p.page_idx)
        .collect();
    Ok(DocumentResult {
        id: id.to_owned(),
        text,
        pages,
        failed_pages,
    })
}
