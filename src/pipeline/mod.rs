//! The batch pipeline: rasterize each document, OCR each page with every
//! selected model, keep the best text, and write the results.

use std::{collections::BTreeSet, pin::pin, sync::Arc, time::Duration};

use futures::{StreamExt as _, stream};

use crate::{
    async_utils::io::{write_file_atomically, write_json_atomically},
    config::{Config, PageSeparator},
    discover::Document,
    ocr::{
        PageResult,
        aggregate::{aggregate, assemble},
        engines::{OcrEngine, attempt},
        models::ModelSelector,
    },
    outline::detect_outline,
    prelude::*,
    rasterize::{PageImage, PageRasterizer, RasterDocument, page_images},
    shutdown::Shutdown,
    ui::{ProgressConfig, Ui},
};

use self::{
    report::{BatchSummary, DocumentRecord, DocumentStatus},
    state::DocumentState,
};

pub mod report;
pub mod state;
#[cfg(test)]
pub mod testing;

/// The name of the batch summary file in the output directory.
pub const SUMMARY_FILE_NAME: &str = "batch-summary.json";

/// Options controlling the pipeline.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Where to write results.
    pub output_dir: PathBuf,

    /// Max documents in flight.
    pub jobs: usize,

    /// Max pages in flight per document.
    pub page_jobs: usize,

    /// Time limit for each OCR attempt.
    pub page_timeout: Duration,

    /// Extra tries for a page where every model failed.
    pub page_retries: u32,

    /// Stop trying models once one reaches this confidence.
    pub early_accept_confidence: Option<f32>,

    /// Inserted between page texts.
    pub page_separator: PageSeparator,

    /// Should we look for titles and headings?
    pub outline: bool,
}

impl PipelineOptions {
    /// Extract pipeline options from our configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            jobs: config.jobs,
            page_jobs: config.page_jobs,
            page_timeout: config.page_timeout,
            page_retries: config.page_retries,
            early_accept_confidence: config.early_accept_confidence,
            page_separator: config.page_separator,
            outline: config.outline,
        }
    }
}

/// Output file names for a document.
fn text_path(output_dir: &Path, id: &str) -> PathBuf {
    output_dir.join(format!("{}.txt", id))
}

fn record_path(output_dir: &Path, id: &str) -> PathBuf {
    output_dir.join(format!("{}.ocr.json", id))
}

/// Runs documents through the rasterizer and OCR engine.
pub struct Pipeline {
    rasterizer: Arc<dyn PageRasterizer>,
    engine: Arc<dyn OcrEngine>,
    selector: ModelSelector,
    opts: PipelineOptions,
}

impl Pipeline {
    /// Create a new pipeline.
    pub fn new(
        rasterizer: Arc<dyn PageRasterizer>,
        engine: Arc<dyn OcrEngine>,
        selector: ModelSelector,
        opts: PipelineOptions,
    ) -> Self {
        Self {
            rasterizer,
            engine,
            selector,
            opts,
        }
    }

    /// Process every document, then write the batch summary.
    ///
    /// Once `shutdown` fires we stop starting new documents, but documents
    /// already in progress are finished and written. The rest are reported as
    /// cancelled.
    #[instrument(level = "debug", skip_all, fields(documents = documents.len()))]
    pub async fn run(
        &self,
        ui: &Ui,
        documents: Vec<Document>,
        shutdown: Shutdown,
    ) -> Result<BatchSummary> {
        let pb = ui.new_progress_bar(
            &ProgressConfig {
                emoji: "📄",
                msg: "Recognizing documents",
                done_msg: "Recognized documents",
            },
            documents.len() as u64,
        );

        let mut records = vec![];
        {
            let mut results = pin!(
                stream::iter(documents.iter().cloned())
                    .take_until(shutdown.cancelled())
                    .map(|document| self.process_document(document))
                    .buffered(self.opts.jobs)
            );
            while let Some(record) = results.next().await {
                pb.inc(1);
                records.push(record);
            }
        }
        pb.finish_using_style();

        let finished = records
            .iter()
            .map(|r| r.id.clone())
            .collect::<BTreeSet<_>>();
        for document in &documents {
            if !finished.contains(&document.id) {
                debug!(id = %document.id, "Document cancelled");
                records.push(DocumentRecord::new_cancelled(
                    &document.id,
                    document.file_name(),
                ));
            }
        }

        let summary = BatchSummary::from_records(&records);
        write_json_atomically(&self.opts.output_dir.join(SUMMARY_FILE_NAME), &summary)
            .await
            .context("cannot write batch summary")?;
        Ok(summary)
    }

    /// Process one document and write its outputs. Failures are recorded,
    /// never returned.
    #[instrument(level = "info", skip_all, fields(id = %document.id))]
    async fn process_document(&self, document: Document) -> DocumentRecord {
        let mut state = DocumentState::Discovered;
        let mut record = match self.recognize_document(&document, &mut state).await {
            Ok(record) => record,
            Err(err) => {
                error!("Document failed: {:?}", err);
                if let Err(state_err) = state.advance(DocumentState::Failed) {
                    warn!("{:?}", state_err);
                }
                DocumentRecord::new_failed(&document.id, document.file_name(), None, &err)
            }
        };

        if let Err(err) = self.write_outputs(&record).await {
            error!("Cannot write outputs: {:?}", err);
            record.status = DocumentStatus::Failed;
            record.errors.push(format!("{:#}", err));
            if let Err(err) = self.remove_stale_text(&record.id).await {
                warn!("{:?}", err);
            }
        } else if state == DocumentState::Aggregating {
            if let Err(err) = state.advance(DocumentState::Written) {
                warn!("{:?}", err);
            }
        }
        debug!(status = ?record.status, state = ?state, "Document finished");
        record
    }

    /// Rasterize, recognize and assemble a document.
    async fn recognize_document(
        &self,
        document: &Document,
        state: &mut DocumentState,
    ) -> Result<DocumentRecord> {
        state.advance(DocumentState::Rasterizing)?;
        let raster_doc = match self.rasterizer.open(document).await {
            Ok(raster_doc) => Arc::new(raster_doc),
            Err(err) => {
                state.advance(DocumentState::Failed)?;
                return Ok(DocumentRecord::new_failed(
                    &document.id,
                    document.file_name(),
                    None,
                    &err,
                ));
            }
        };
        if raster_doc.is_truncated() {
            warn!(
                pages = raster_doc.page_count,
                limit = raster_doc.pages_to_process,
                "Only processing some pages"
            );
        }

        state.advance(DocumentState::Ocring)?;
        let pages = page_images(self.rasterizer.clone(), raster_doc.clone())
            .map(|page_fut| {
                let raster_doc = raster_doc.clone();
                async move {
                    let (page_idx, page) = page_fut.await;
                    self.process_page(&raster_doc, page_idx, page).await
                }
            })
            .buffered(self.opts.page_jobs)
            .collect::<Vec<_>>()
            .await;

        state.advance(DocumentState::Aggregating)?;
        let result = assemble(
            &document.id,
            raster_doc.pages_to_process,
            pages,
            self.opts.page_separator.as_str(),
        )?;
        let outline = self
            .opts
            .outline
            .then(|| detect_outline(raster_doc.metadata_title.as_deref(), &result.pages));
        let record = DocumentRecord::from_result(
            document.file_name(),
            raster_doc.page_count,
            raster_doc.is_truncated(),
            &result,
            outline,
        );
        if record.status.has_text() {
            let mut text = result.text;
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            let path = text_path(&self.opts.output_dir, &document.id);
            write_file_atomically(&path, text.into_bytes())
                .await
                .context("cannot write text output")?;
        }
        Ok(record)
    }

    /// Recognize a page, re-rasterizing and retrying it if every attempt
    /// failed.
    #[instrument(level = "debug", skip_all, fields(page = page_idx))]
    async fn process_page(
        &self,
        document: &RasterDocument,
        page_idx: usize,
        mut page: Result<PageImage>,
    ) -> PageResult {
        let mut tries = 0;
        loop {
            let result = match page {
                Ok(image) => self.ocr_page(&image).await,
                Err(err) => {
                    warn!("Cannot rasterize page: {:?}", err);
                    PageResult::failed(page_idx, vec![format!("rasterize: {:#}", err)])
                }
            };
            if result.is_success() || tries >= self.opts.page_retries {
                return result;
            }
            tries += 1;
            debug!(attempt = tries + 1, "Retrying page");
            page = self.rasterizer.rasterize_page(document, page_idx).await;
        }
    }

    /// Run the selected models on a page, one at a time, and keep the best.
    async fn ocr_page(&self, page: &PageImage) -> PageResult {
        let engine = self.engine.as_ref();
        let timeout = self.opts.page_timeout;
        trace!(width = page.width, height = page.height, dpi = page.dpi, "OCRing page");
        let models = self.selector.select(engine, page, timeout).await;
        let mut attempts = Vec::with_capacity(models.len());
        for model in &models {
            let attempt = attempt(engine, page, model, timeout).await;
            let good_enough = match (self.opts.early_accept_confidence, attempt.confidence()) {
                (Some(threshold), Some(confidence)) => confidence >= threshold,
                _ => false,
            };
            attempts.push(attempt);
            if good_enough {
                debug!(model = %model, "Accepting early");
                break;
            }
        }
        aggregate(page.page_idx, attempts, self.selector.models())
    }

    /// Write the JSON record, and remove any stale text file for documents
    /// without text.
    async fn write_outputs(&self, record: &DocumentRecord) -> Result<()> {
        if !record.status.has_text() {
            self.remove_stale_text(&record.id).await?;
        }
        write_json_atomically(&record_path(&self.opts.output_dir, &record.id), record)
            .await
            .context("cannot write document record")
    }

    /// Remove a text file left over from an earlier run.
    async fn remove_stale_text(&self, id: &str) -> Result<()> {
        let path = text_path(&self.opts.output_dir, id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("cannot remove stale {:?}", path.display())),
        }
    }
}
