//! Per-document records and the batch summary.

use schemars::JsonSchema;

use crate::{
    ocr::{PageOutcome, PageResult, aggregate::DocumentResult, script::Script},
    outline::{Heading, Outline},
    prelude::*,
    ui::Ui,
};

/// Final status of a document.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Every page was recognized.
    Ok,

    /// Some pages failed, or we stopped at the page limit.
    Incomplete,

    /// The document could not be processed at all.
    Failed,

    /// The batch was shut down before this document was started.
    Cancelled,
}

impl DocumentStatus {
    /// Should we write a text file for this document?
    pub fn has_text(self) -> bool {
        matches!(self, DocumentStatus::Ok | DocumentStatus::Incomplete)
    }
}

/// Status of a single page.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Ok,
    Failed,
}

/// A page we could not recognize.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct FailedPage {
    /// Zero-based page index.
    pub page_index: usize,

    /// Why each attempt failed.
    pub reasons: Vec<String>,
}

/// What we chose for a single page.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct PageRecord {
    /// Zero-based page index.
    pub page_index: usize,

    pub status: PageStatus,

    /// The model whose text we used.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,

    /// Confidence of the chosen text, between 0.0 and 1.0.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confidence: Option<f32>,

    /// The writing system we think the page uses.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub script: Option<Script>,
}

impl From<&PageResult> for PageRecord {
    fn from(page: &PageResult) -> Self {
        match &page.outcome {
            PageOutcome::Recognized {
                model,
                confidence,
                script,
                ..
            } => PageRecord {
                page_index: page.page_idx,
                status: PageStatus::Ok,
                model: Some(model.clone()),
                confidence: Some(*confidence),
                script: *script,
            },
            PageOutcome::Failed { .. } => PageRecord {
                page_index: page.page_idx,
                status: PageStatus::Failed,
                model: None,
                confidence: None,
                script: None,
            },
        }
    }
}

/// The `<id>.ocr.json` file written for every document.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct DocumentRecord {
    /// Document ID. Output files are named after it.
    pub id: String,

    /// Input file name.
    pub source: String,

    pub status: DocumentStatus,

    /// Pages in the PDF, if we managed to open it.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub page_count: Option<usize>,

    /// Pages we tried to recognize.
    pub pages_processed: usize,

    /// True if we did not recognize any text at all.
    pub no_content: bool,

    /// Pages we could not recognize.
    #[serde(default)]
    pub failed_pages: Vec<FailedPage>,

    /// Document-level errors.
    #[serde(default)]
    pub errors: Vec<String>,

    /// Per-page results.
    #[serde(default)]
    pub pages: Vec<PageRecord>,

    /// A guess at the document title.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub title: Option<String>,

    /// Lines that look like headings.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub outline: Vec<Heading>,
}

impl DocumentRecord {
    /// A document that failed before we had any pages.
    pub fn new_failed(
        id: &str,
        source: String,
        page_count: Option<usize>,
        err: &anyhow::Error,
    ) -> Self {
        Self {
            id: id.to_owned(),
            source,
            status: DocumentStatus::Failed,
            page_count,
            pages_processed: 0,
            no_content: true,
            failed_pages: vec![],
            errors: vec![format!("{:#}", err)],
            pages: vec![],
            title: None,
            outline: vec![],
        }
    }

    /// A document that was never started.
    pub fn new_cancelled(id: &str, source: String) -> Self {
        Self {
            status: DocumentStatus::Cancelled,
            errors: vec![],
            ..Self::new_failed(id, source, None, &anyhow!("cancelled"))
        }
    }

    /// Build a record from the assembled pages of a document.
    pub fn from_result(
        source: String,
        page_count: usize,
        truncated: bool,
        result: &DocumentResult,
        outline: Option<Outline>,
    ) -> Self {
        let pages_processed = result.pages.len();
        let recognized = result.recognized_page_count();
        let status = if pages_processed > 0 && recognized == 0 {
            DocumentStatus::Failed
        } else if recognized < pages_processed || truncated {
            DocumentStatus::Incomplete
        } else {
            DocumentStatus::Ok
        };
        let failed_pages = result
            .pages
            .iter()
            .filter_map(|page| match &page.outcome {
                PageOutcome::Failed { reasons } => Some(FailedPage {
                    page_index: page.page_idx,
                    reasons: reasons.clone(),
                }),
                PageOutcome::Recognized { .. } => None,
            })
            .collect();
        let mut errors = vec![];
        if status == DocumentStatus::Failed {
            errors.push(format!("all {} pages failed OCR", pages_processed));
        }
        if truncated {
            errors.push(format!(
                "stopped after {} of {} pages",
                pages_processed, page_count
            ));
        }
        let outline = outline.unwrap_or_default();
        Self {
            id: result.id.clone(),
            source,
            status,
            page_count: Some(page_count),
            pages_processed,
            no_content: result.has_no_content(),
            failed_pages,
            errors,
            pages: result.pages.iter().map(PageRecord::from).collect(),
            title: outline.title,
            outline: outline.headings,
        }
    }
}

/// One document in the batch summary.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub source: String,
    pub status: DocumentStatus,

    /// Pages we could not recognize.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failed_pages: Vec<FailedPage>,

    /// Document-level errors.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
}

impl From<&DocumentRecord> for DocumentSummary {
    fn from(record: &DocumentRecord) -> Self {
        Self {
            id: record.id.clone(),
            source: record.source.clone(),
            status: record.status,
            failed_pages: record.failed_pages.clone(),
            errors: record.errors.clone(),
        }
    }
}

/// The `batch-summary.json` file.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Documents found in the input directory.
    pub total: usize,

    /// Documents with every page recognized.
    pub succeeded: usize,

    /// Documents with some pages missing.
    pub partial: usize,

    /// Documents we could not process.
    pub failed: usize,

    /// Documents skipped because of a shutdown request.
    pub cancelled: usize,

    /// Every document, sorted by ID.
    pub documents: Vec<DocumentSummary>,
}

impl BatchSummary {
    /// Summarize a batch.
    pub fn from_records(records: &[DocumentRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.total += 1;
            match record.status {
                DocumentStatus::Ok => summary.succeeded += 1,
                DocumentStatus::Incomplete => summary.partial += 1,
                DocumentStatus::Failed => summary.failed += 1,
                DocumentStatus::Cancelled => summary.cancelled += 1,
            }
            summary.documents.push(DocumentSummary::from(record));
        }
        summary.documents.sort_by(|a, b| a.id.cmp(&b.id));
        summary
    }

    /// Display the results to the user, and fail if any document failed or
    /// the batch was cancelled.
    pub fn finish(&self, ui: &Ui) -> Result<()> {
        ui.display_message(
            "📄",
            &format!(
                "{} documents: {} ok, {} incomplete, {} failed, {} cancelled",
                self.total, self.succeeded, self.partial, self.failed, self.cancelled,
            ),
        );
        for doc in &self.documents {
            if doc.status == DocumentStatus::Failed {
                ui.display_message("❌", &format!("{} ({})", doc.id, doc.source));
            }
        }
        if self.failed > 0 {
            Err(anyhow!("{} of {} documents failed", self.failed, self.total))
        } else if self.cancelled > 0 {
            Err(anyhow!(
                "batch was cancelled with {} documents unprocessed",
                self.cancelled
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::aggregate::assemble;

    fn recognized(page_idx: usize, text: &str) -> PageResult {
        PageResult {
            page_idx,
            outcome: PageOutcome::Recognized {
                text: text.to_owned(),
                model: "jpn".to_owned(),
                confidence: 0.8,
                script: Some(Script::Japanese),
            },
        }
    }

    fn record_for(pages: Vec<PageResult>, page_count: usize, truncated: bool) -> DocumentRecord {
        let processed = pages.len();
        let result = assemble("doc", processed, pages, "\n").expect("bad pages");
        DocumentRecord::from_result("doc.pdf".to_owned(), page_count, truncated, &result, None)
    }

    #[test]
    fn status_reflects_page_failures() {
        let ok = record_for(vec![recognized(0, "は"), recognized(1, "い")], 2, false);
        assert_eq!(ok.status, DocumentStatus::Ok);
        assert!(ok.failed_pages.is_empty());

        let partial = record_for(
            vec![recognized(0, "は"), PageResult::failed(1, vec!["jpn: crashed".to_owned()])],
            2,
            false,
        );
        assert_eq!(partial.status, DocumentStatus::Incomplete);
        assert_eq!(
            partial.failed_pages,
            [FailedPage {
                page_index: 1,
                reasons: vec!["jpn: crashed".to_owned()],
            }]
        );
        assert!(!partial.no_content);

        let failed = record_for(vec![PageResult::failed(0, vec![])], 1, false);
        assert_eq!(failed.status, DocumentStatus::Failed);
        assert!(failed.no_content);
    }

    #[test]
    fn truncated_documents_are_incomplete() {
        let record = record_for(vec![recognized(0, "は")], 5, true);
        assert_eq!(record.status, DocumentStatus::Incomplete);
        assert_eq!(record.page_count, Some(5));
        assert_eq!(record.pages_processed, 1);
    }

    #[test]
    fn empty_documents_are_ok_with_no_content() {
        let record = record_for(vec![], 0, false);
        assert_eq!(record.status, DocumentStatus::Ok);
        assert!(record.no_content);
    }

    #[test]
    fn summary_counts_and_sorts() {
        let records = vec![
            DocumentRecord::new_failed("b", "b.pdf".to_owned(), None, &anyhow!("bad")),
            record_for(vec![recognized(0, "x")], 1, false),
            DocumentRecord::new_cancelled("c", "c.pdf".to_owned()),
        ];
        let summary = BatchSummary::from_records(&records);
        assert_eq!(
            (summary.total, summary.succeeded, summary.partial, summary.failed, summary.cancelled),
            (3, 1, 0, 1, 1)
        );
        let ids = summary.documents.iter().map(|d| d.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["b", "c", "doc"]);
        assert!(summary.finish(&Ui::init_for_tests()).is_err());
    }

    #[test]
    fn clean_batches_finish_ok() {
        let summary = BatchSummary::from_records(&[record_for(vec![recognized(0, "x")], 1, false)]);
        assert!(summary.finish(&Ui::init_for_tests()).is_ok());
    }
}
