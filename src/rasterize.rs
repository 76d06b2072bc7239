//! Turn PDF pages into images, using Poppler's `pdfinfo` and `pdftocairo`.
//!
//! Pages are rasterized one at a time, each into its own temporary directory.
//! This costs an extra `pdftocairo` startup per page, but it means a page
//! that Poppler chokes on only loses that page, and we never have more than a
//! handful of page images on disk at once.

use std::{
    collections::BTreeMap,
    sync::{Arc, LazyLock},
    time::Duration,
};

use futures::{FutureExt as _, StreamExt as _, stream};
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{
        BoxedFuture, BoxedStream, run_command, spawn_blocking_propagating_panics,
    },
    cpu_limit::ProcessLimiter,
    discover::Document,
    prelude::*,
};

/// A default error regex for checking command output.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Poppler reports repaired cross-reference tables as errors, but the page
/// renders fine.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// A document that has been opened for rasterization.
#[derive(Clone, Debug)]
pub struct RasterDocument {
    /// The document ID.
    pub id: String,

    /// Path to the PDF.
    pub path: PathBuf,

    /// Number of pages in the PDF.
    pub page_count: usize,

    /// Number of pages we will actually rasterize, after `max_pages`.
    pub pages_to_process: usize,

    /// The `Title` from the PDF's document information, if any.
    pub metadata_title: Option<String>,
}

impl RasterDocument {
    /// Were some pages left out because of `max_pages`?
    pub fn is_truncated(&self) -> bool {
        self.pages_to_process < self.page_count
    }
}

/// A rasterized page.
///
/// The image lives in a scratch directory owned by this value, and is deleted
/// when it is dropped.
#[derive(Debug)]
pub struct PageImage {
    /// The ID of the document this page belongs to.
    pub document_id: String,

    /// Zero-based page index.
    pub page_idx: usize,

    /// PNG image of the page.
    pub path: PathBuf,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Resolution the page was rendered at.
    pub dpi: u32,

    /// Scratch storage holding `path`.
    scratch: tempfile::TempDir,
}

impl PageImage {
    /// Wrap an image file in a scratch directory.
    pub fn new(
        document_id: &str,
        page_idx: usize,
        scratch: tempfile::TempDir,
        path: PathBuf,
        (width, height): (u32, u32),
        dpi: u32,
    ) -> Self {
        Self {
            document_id: document_id.to_owned(),
            page_idx,
            path,
            width,
            height,
            dpi,
            scratch,
        }
    }

    /// The temporary directory holding the image.
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }
}

/// Interface to a rasterizer backend.
#[async_trait]
pub trait PageRasterizer: Send + Sync + 'static {
    /// Open a document and find out how many pages it has. Errors here mean
    /// the whole document is unusable.
    async fn open(&self, document: &Document) -> Result<RasterDocument>;

    /// Rasterize a single page. Errors here only affect this page.
    async fn rasterize_page(
        &self,
        document: &RasterDocument,
        page_idx: usize,
    ) -> Result<PageImage>;
}

/// The pages of an opened document, in order. Nothing is rasterized until the
/// corresponding future is polled.
pub fn page_images(
    rasterizer: Arc<dyn PageRasterizer>,
    document: Arc<RasterDocument>,
) -> BoxedStream<BoxedFuture<(usize, Result<PageImage>)>> {
    stream::iter(0..document.pages_to_process)
        .map(move |page_idx| {
            let rasterizer = rasterizer.clone();
            let document = document.clone();
            async move {
                let page = rasterizer.rasterize_page(&document, page_idx).await;
                (page_idx, page)
            }
            .boxed()
        })
        .boxed()
}

/// Rasterizer using Poppler's command-line tools.
pub struct PopplerRasterizer {
    pdfinfo: PathBuf,
    pdftocairo: PathBuf,
    dpi: u32,
    max_pages: Option<usize>,
    timeout: Option<Duration>,
    limiter: ProcessLimiter,
}

impl PopplerRasterizer {
    /// Create a new rasterizer.
    pub fn new(
        pdfinfo: PathBuf,
        pdftocairo: PathBuf,
        dpi: u32,
        max_pages: Option<usize>,
        timeout: Option<Duration>,
        limiter: ProcessLimiter,
    ) -> Self {
        Self {
            pdfinfo,
            pdftocairo,
            dpi,
            max_pages,
            timeout,
            limiter,
        }
    }

    /// Get the page count and metadata of a PDF file.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    async fn pdf_info(&self, path: &Path) -> Result<PdfInfo> {
        let mut cmd = Command::new(&self.pdfinfo);
        cmd.arg(path);
        let output =
            run_command("pdfinfo", cmd, &self.limiter, self.timeout, None).await?;
        let output = String::from_utf8(output.stdout)
            .context("pdfinfo output was not valid UTF-8")?;
        parse_pdfinfo(&output)
            .with_context(|| format!("bad pdfinfo output for {:?}", path.display()))
    }
}

#[async_trait]
impl PageRasterizer for PopplerRasterizer {
    #[instrument(level = "debug", skip_all, fields(id = %document.id))]
    async fn open(&self, document: &Document) -> Result<RasterDocument> {
        let mime_type = sniff_mime_type(&document.path).await?;
        if mime_type.as_deref() != Some("application/pdf") {
            return Err(anyhow!(
                "{:?} is not a PDF file (detected type: {})",
                document.path.display(),
                mime_type.as_deref().unwrap_or("unknown"),
            ));
        }

        let PdfInfo { page_count, title } = self.pdf_info(&document.path).await?;
        let pages_to_process = match self.max_pages {
            Some(max_pages) => page_count.min(max_pages),
            None => page_count,
        };
        Ok(RasterDocument {
            id: document.id.clone(),
            path: document.path.clone(),
            page_count,
            pages_to_process,
            metadata_title: title,
        })
    }

    #[instrument(level = "debug", skip_all, fields(id = %document.id, page = page_idx))]
    async fn rasterize_page(
        &self,
        document: &RasterDocument,
        page_idx: usize,
    ) -> Result<PageImage> {
        let scratch = tempfile::TempDir::with_prefix("page")
            .context("cannot create scratch directory for page")?;
        let out_base = scratch.path().join("page");

        // Poppler page numbers are 1-based and inclusive.
        let page_number = (page_idx + 1).to_string();
        let mut cmd = Command::new(&self.pdftocairo);
        cmd.arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-f")
            .arg(&page_number)
            .arg("-l")
            .arg(&page_number)
            .arg("-singlefile")
            .arg(&document.path)
            .arg(&out_base);
        run_command(
            "pdftocairo",
            cmd,
            &self.limiter,
            self.timeout,
            Some(&is_error_line),
        )
        .await
        .map_err(|err| err.hiding_scratch_dirs(&[scratch.path()]))
        .with_context(|| format!("failed to rasterize page {}", page_number))?;

        let path = out_base.with_extension("png");
        let dims_path = path.clone();
        let dimensions = spawn_blocking_propagating_panics(move || {
            image::image_dimensions(&dims_path)
        })
        .await
        .with_context(|| {
            format!("pdftocairo produced an unreadable image for page {}", page_number)
        })?;

        Ok(PageImage::new(
            &document.id,
            page_idx,
            scratch,
            path,
            dimensions,
            self.dpi,
        ))
    }
}

/// Get the MIME type of a file from its leading bytes.
async fn sniff_mime_type(path: &Path) -> Result<Option<String>> {
    let path = path.to_owned();
    spawn_blocking_propagating_panics(move || {
        Ok(infer::get_from_path(&path)
            .with_context(|| format!("cannot read {:?}", path.display()))?
            .map(|kind| kind.mime_type().to_owned()))
    })
    .await
}

/// What we use from `pdfinfo` output.
#[derive(Debug, PartialEq)]
struct PdfInfo {
    page_count: usize,
    title: Option<String>,
}

/// Parse `pdfinfo` output.
fn parse_pdfinfo(output: &str) -> Result<PdfInfo> {
    let properties = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect::<BTreeMap<_, _>>();
    let page_count_str = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    let page_count = page_count_str
        .parse::<usize>()
        .with_context(|| format!("failed to parse page count {:?}", page_count_str))?;
    let title = properties
        .get("Title")
        .filter(|title| !title.is_empty())
        .map(|&title| title.to_owned());
    Ok(PdfInfo { page_count, title })
}
