//! Finding the documents in an input directory.

use std::collections::BTreeSet;

use crate::prelude::*;

/// An input document discovered at the start of a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    /// Unique ID within the batch, used to name output files.
    pub id: String,

    /// Path to the input file.
    pub path: PathBuf,
}

impl Document {
    /// The input file name, for reports.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Does this path look like a PDF we should process?
fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Take a snapshot of the PDFs in `dir`, sorted by file name.
///
/// Files added after this returns are not part of the batch. Hidden files and
/// subdirectories are ignored.
#[instrument(level = "debug", skip_all, fields(dir = %dir.display()))]
pub async fn discover_documents(dir: &Path) -> Result<Vec<Document>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Cannot read input directory {:?}", dir.display()))?;
    let mut paths = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("Cannot list input directory {:?}", dir.display()))?
    {
        let path = entry.path();
        let is_hidden = entry.file_name().to_string_lossy().starts_with('.');
        let file_type = entry
            .file_type()
            .await
            .with_context(|| format!("Cannot stat {:?}", path.display()))?;
        if !is_hidden && !file_type.is_dir() && has_pdf_extension(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(assign_ids(paths))
}

/// Give each path a unique document ID based on its file stem.
///
/// `paths` must already be sorted, so that collisions (`a.pdf` and `a.PDF`)
/// are always resolved the same way: the first file gets the bare stem, later
/// files get their full file name, or a numbered stem if that is taken too.
fn assign_ids(paths: Vec<PathBuf>) -> Vec<Document> {
    let mut used = BTreeSet::new();
    paths
        .into_iter()
        .map(|path| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let file_name = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut id = stem.clone();
            if used.contains(&id) {
                id = file_name;
            }
            let mut n = 2;
            while used.contains(&id) {
                id = format!("{}-{}", stem, n);
                n += 1;
            }
            used.insert(id.clone());
            Document { id, path }
        })
        .collect()
}
