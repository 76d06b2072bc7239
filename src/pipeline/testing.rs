//! Fake rasterizer and OCR engine for unit tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
    time::Duration,
};

use crate::{
    async_utils::CommandError,
    config::DEFAULT_MODELS,
    discover::Document,
    ocr::engines::{OcrEngine, Recognition},
    prelude::*,
    rasterize::{PageImage, PageRasterizer, RasterDocument},
};

/// Create a [`PageImage`] backed by an empty scratch file.
pub fn fake_page_image(document_id: &str, page_idx: usize) -> Result<PageImage> {
    let scratch = tempfile::TempDir::with_prefix("fake-page")?;
    let path = scratch.path().join("page.png");
    std::fs::write(&path, b"")?;
    Ok(PageImage::new(document_id, page_idx, scratch, path, (100, 100), 300))
}

/// How a fake model responds to a page.
#[derive(Clone, Debug)]
enum FakeResponse {
    Text { text: String, confidence: f32 },
    Slow,
    Broken,
    /// Fail this many times, then answer.
    Flaky { failures: usize, text: String, confidence: f32 },
}

/// Scripted OCR responses for one page.
#[derive(Clone, Debug, Default)]
pub struct FakePage {
    delay: Duration,
    responses: BTreeMap<String, FakeResponse>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// `model` recognizes `text` with `confidence`.
    pub fn text(mut self, model: &str, text: &str, confidence: f32) -> Self {
        self.responses.insert(
            model.to_owned(),
            FakeResponse::Text {
                text: text.to_owned(),
                confidence,
            },
        );
        self
    }

    /// `model` never finishes before the timeout.
    pub fn slow(mut self, model: &str) -> Self {
        self.responses.insert(model.to_owned(), FakeResponse::Slow);
        self
    }

    /// `model` reports an engine error.
    pub fn broken(mut self, model: &str) -> Self {
        self.responses.insert(model.to_owned(), FakeResponse::Broken);
        self
    }

    /// `model` fails `failures` times before recognizing `text`.
    pub fn flaky(mut self, model: &str, failures: usize, text: &str, confidence: f32) -> Self {
        self.responses.insert(
            model.to_owned(),
            FakeResponse::Flaky {
                failures,
                text: text.to_owned(),
                confidence,
            },
        );
        self
    }

    /// Every model takes this long to answer.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Counts of `recognize` calls that have started but not finished.
#[derive(Debug, Default)]
struct InFlight {
    total: usize,
    max_total: usize,
    per_page: BTreeMap<(String, usize), usize>,
    max_per_page: usize,
}

/// An OCR engine that answers from a script, keyed by document and page.
#[derive(Debug, Default)]
pub struct FakeEngine {
    default_pages: Vec<FakePage>,
    documents: BTreeMap<String, Vec<FakePage>>,
    calls: Mutex<BTreeMap<(String, usize, String), usize>>,
    in_flight: Mutex<InFlight>,
}

/// Marks one `recognize` call as in flight until dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<InFlight>,
    page: (String, usize),
}

impl<'a> InFlightGuard<'a> {
    fn enter(in_flight: &'a Mutex<InFlight>, page: &PageImage) -> Self {
        let key = (page.document_id.clone(), page.page_idx);
        let mut counts = in_flight.lock().expect("lock poisoned");
        counts.total += 1;
        counts.max_total = counts.max_total.max(counts.total);
        let on_page = counts.per_page.entry(key.clone()).or_default();
        *on_page += 1;
        let on_page = *on_page;
        counts.max_per_page = counts.max_per_page.max(on_page);
        Self {
            in_flight,
            page: key,
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut counts = self.in_flight.lock().expect("lock poisoned");
        counts.total -= 1;
        if let Some(on_page) = counts.per_page.get_mut(&self.page) {
            *on_page -= 1;
        }
    }
}

impl FakeEngine {
    /// Use `pages` for every document without its own script.
    pub fn new(pages: Vec<FakePage>) -> Self {
        Self {
            default_pages: pages,
            ..Self::default()
        }
    }

    /// Use `pages` for the document `id`.
    pub fn document(mut self, id: &str, pages: Vec<FakePage>) -> Self {
        self.documents.insert(id.to_owned(), pages);
        self
    }

    /// How many times was `model` run on this page?
    pub fn call_count(&self, id: &str, page_idx: usize, model: &str) -> usize {
        let calls = self.calls.lock().expect("lock poisoned");
        calls
            .get(&(id.to_owned(), page_idx, model.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    /// The most `recognize` calls we have seen running at once.
    pub fn max_in_flight(&self) -> usize {
        self.in_flight.lock().expect("lock poisoned").max_total
    }

    /// The most `recognize` calls we have seen running at once on one page.
    pub fn max_in_flight_per_page(&self) -> usize {
        self.in_flight.lock().expect("lock poisoned").max_per_page
    }

    fn lookup(&self, page: &PageImage, model: &str) -> (Duration, Option<FakeResponse>) {
        let pages = self
            .documents
            .get(&page.document_id)
            .unwrap_or(&self.default_pages);
        match pages.get(page.page_idx) {
            Some(fake) => (fake.delay, fake.responses.get(model).cloned()),
            None => (Duration::ZERO, None),
        }
    }
}

#[async_trait]
impl OcrEngine for FakeEngine {
    async fn installed_models(&self) -> Result<Vec<String>> {
        let mut models = DEFAULT_MODELS
            .iter()
            .map(|&m| m.to_owned())
            .collect::<Vec<_>>();
        models.push("eng".to_owned());
        Ok(models)
    }

    async fn recognize(
        &self,
        page: &PageImage,
        model: &str,
        timeout: Duration,
    ) -> Result<Recognition> {
        let _in_flight = InFlightGuard::enter(&self.in_flight, page);
        let call_number = {
            let mut calls = self.calls.lock().expect("lock poisoned");
            let count = calls
                .entry((page.document_id.clone(), page.page_idx, model.to_owned()))
                .or_default();
            *count += 1;
            *count
        };
        let (delay, response) = self.lookup(page, model);
        let work = async {
            tokio::time::sleep(delay).await;
            match response {
                Some(FakeResponse::Text { text, confidence }) => {
                    Ok(Recognition { text, confidence })
                }
                Some(FakeResponse::Slow) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(anyhow!("slow model finished"))
                }
                Some(FakeResponse::Flaky {
                    failures,
                    text,
                    confidence,
                }) if call_number > failures => Ok(Recognition { text, confidence }),
                Some(FakeResponse::Flaky { .. }) => {
                    Err(anyhow!("{} failed on attempt {}", model, call_number))
                }
                Some(FakeResponse::Broken) | None => {
                    Err(anyhow!("{} cannot read this page", model))
                }
            }
        };
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_elapsed) => Err(CommandError::TimedOut(timeout).into()),
        }
    }
}

/// A scripted document for [`FakeRasterizer`].
#[derive(Clone, Debug)]
pub enum FakeDocument {
    /// A PDF with this many pages, some of which fail to rasterize.
    Pages {
        count: usize,
        broken: BTreeSet<usize>,
    },

    /// A file that is not a usable PDF.
    Corrupt,
}

impl FakeDocument {
    pub fn pages(count: usize) -> Self {
        FakeDocument::Pages {
            count,
            broken: BTreeSet::new(),
        }
    }
}

/// A rasterizer that produces empty images for scripted documents.
#[derive(Debug, Default)]
pub struct FakeRasterizer {
    documents: BTreeMap<String, FakeDocument>,
    titles: BTreeMap<String, String>,
    max_pages: Option<usize>,
}

impl FakeRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scripted document.
    pub fn document(mut self, id: &str, document: FakeDocument) -> Self {
        self.documents.insert(id.to_owned(), document);
        self
    }

    /// Give the document `id` a metadata title.
    pub fn title(mut self, id: &str, title: &str) -> Self {
        self.titles.insert(id.to_owned(), title.to_owned());
        self
    }

    /// Only rasterize the first `max_pages` of each document.
    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Matching [`Document`] values, as `discover_documents` would return.
    pub fn discovered(&self) -> Vec<Document> {
        self.documents
            .keys()
            .map(|id| Document {
                id: id.clone(),
                path: PathBuf::from(format!("/input/{}.pdf", id)),
            })
            .collect()
    }
}

#[async_trait]
impl PageRasterizer for FakeRasterizer {
    async fn open(&self, document: &Document) -> Result<RasterDocument> {
        match self.documents.get(&document.id) {
            Some(FakeDocument::Pages { count, .. }) => Ok(RasterDocument {
                id: document.id.clone(),
                path: document.path.clone(),
                page_count: *count,
                pages_to_process: self.max_pages.map_or(*count, |max| max.min(*count)),
                metadata_title: self.titles.get(&document.id).cloned(),
            }),
            Some(FakeDocument::Corrupt) | None => Err(anyhow!(
                "{:?} is not a PDF file",
                document.path.display()
            )),
        }
    }

    async fn rasterize_page(
        &self,
        document: &RasterDocument,
        page_idx: usize,
    ) -> Result<PageImage> {
        if let Some(FakeDocument::Pages { broken, .. }) = self.documents.get(&document.id)
            && broken.contains(&page_idx)
        {
            return Err(anyhow!("cannot render page {}", page_idx + 1));
        }
        fake_page_image(&document.id, page_idx)
    }
}
