//! I/O utilities.
//!
//! Reading configuration files, and writing output artifacts. Output files are
//! always written to a temporary file in the destination directory and then
//! renamed into place, so a reader never observes a half-written artifact.

use std::io::Write as _;

use tokio::{
    fs::File,
    io::{AsyncReadExt as _, AsyncWrite},
};

use super::spawn_blocking_propagating_panics;
use crate::prelude::*;

/// Read TOML or JSON from a file, based on its extension.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut file = File::open(path)
        .await
        .with_context(|| format!("Failed to open file at path: {:?}", path))?;
    let mut data = String::new();
    // Read all at once because our parsing libraries don't do async I/O.
    file.read_to_string(&mut data)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        serde_json::from_str(&data).with_context(|| {
            format!("Failed to parse JSON from file at path: {:?}", path)
        })
    } else {
        toml::from_str(&data).with_context(|| {
            format!("Failed to parse TOML from file at path: {:?}", path)
        })
    }
}

/// Create a writer for either a file or standard output.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write `data` to `path` by way of a temporary file in the same directory.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn write_file_atomically(path: &Path, data: Vec<u8>) -> Result<()> {
    let path = path.to_owned();
    spawn_blocking_propagating_panics(move || {
        let dir = path
            .parent()
            .ok_or_else(|| anyhow!("output path {:?} has no parent", path))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).with_context(|| {
            format!("Failed to create temporary file in {:?}", dir.display())
        })?;
        tmp.write_all(&data)
            .with_context(|| format!("Failed to write {:?}", path.display()))?;
        tmp.flush()
            .with_context(|| format!("Failed to flush {:?}", path.display()))?;
        tmp.persist(&path)
            .with_context(|| format!("Failed to rename into {:?}", path.display()))?;
        Ok(())
    })
    .await
}

/// Write a value as pretty-printed JSON, followed by a newline.
pub async fn write_json_atomically<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize,
{
    let mut json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize JSON for {:?}", path.display()))?;
    json.push(b'\n');
    write_file_atomically(path, json).await
}

/// Make sure we can create files in `dir`, creating it if needed.
pub async fn ensure_writable_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Cannot create output directory {:?}", dir.display()))?;
    let dir = dir.to_owned();
    spawn_blocking_propagating_panics(move || {
        tempfile::NamedTempFile::new_in(&dir)
            .map(drop)
            .with_context(|| format!("Output directory {:?} is not writable", dir.display()))
    })
    .await
}
