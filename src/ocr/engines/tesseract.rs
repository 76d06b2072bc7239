//! OCR engine wrapping the `tesseract` CLI tool.

use std::time::Duration;

use tokio::process::Command;

use crate::{
    async_utils::run_command, cpu_limit::ProcessLimiter, prelude::*, rasterize::PageImage,
};

use super::{OcrEngine, Recognition};

/// OCR engine wrapping the `tesseract` CLI tool.
pub struct TesseractEngine {
    command: PathBuf,
    psm: Option<u8>,
    limiter: ProcessLimiter,
}

impl TesseractEngine {
    /// Create a new `tesseract` engine.
    pub fn new(command: PathBuf, psm: Option<u8>, limiter: ProcessLimiter) -> Self {
        Self {
            command,
            psm,
            limiter,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    #[instrument(level = "debug", skip_all)]
    async fn installed_models(&self) -> Result<Vec<String>> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--list-langs");
        let output = run_command("tesseract", cmd, &self.limiter, None, None)
            .await
            .context("cannot list tesseract models")?;
        // Older versions print the list to standard error.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let models = parse_list_langs(&stdout);
        if models.is_empty() {
            Ok(parse_list_langs(&String::from_utf8_lossy(&output.stderr)))
        } else {
            Ok(models)
        }
    }

    #[instrument(level = "debug", skip_all, fields(id = %page.document_id, page = page.page_idx, model = model))]
    async fn recognize(
        &self,
        page: &PageImage,
        model: &str,
        timeout: Duration,
    ) -> Result<Recognition> {
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")
            .context("cannot create tesseract output directory")?;
        let out_base = tmpdir.path().join("output");

        let mut cmd = Command::new(&self.command);
        cmd.arg(&page.path)
            .arg(&out_base)
            .arg("-l")
            .arg(model)
            .arg("--dpi")
            .arg(page.dpi.to_string());
        if let Some(psm) = self.psm {
            cmd.arg("--psm").arg(psm.to_string());
        }
        cmd.arg("txt").arg("tsv");
        run_command("tesseract", cmd, &self.limiter, Some(timeout), None)
            .await
            .map_err(|err| err.hiding_scratch_dirs(&[tmpdir.path(), page.scratch_dir()]))?;

        let text = tokio::fs::read_to_string(out_base.with_extension("txt"))
            .await
            .context("cannot read tesseract text output")?;
        let tsv = tokio::fs::read_to_string(out_base.with_extension("tsv"))
            .await
            .context("cannot read tesseract TSV output")?;
        Ok(Recognition {
            text: text.trim_end().to_owned(),
            confidence: confidence_from_tsv(&tsv)?,
        })
    }
}

/// Parse the output of `tesseract --list-langs`.
///
/// The first line is a header like `List of available languages in "..." (3):`.
fn parse_list_langs(output: &str) -> Vec<String> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    match lines.next() {
        Some(header) if header.starts_with("List of available languages") => {
            lines.map(str::to_owned).collect()
        }
        _ => vec![],
    }
}

/// Compute a page confidence from Tesseract's TSV output.
///
/// This is the mean of the word confidences, weighted by word length, and
/// scaled to `0.0..=1.0`. Pages with no words get `0.0`.
fn confidence_from_tsv(tsv: &str) -> Result<f32> {
    let mut lines = tsv.lines();
    let header = lines
        .next()
        .ok_or_else(|| anyhow!("tesseract TSV output is empty"))?;
    let columns = header.split('\t').collect::<Vec<_>>();
    let column = |name: &str| {
        columns
            .iter()
            .position(|&c| c == name)
            .ok_or_else(|| anyhow!("tesseract TSV output has no {:?} column", name))
    };
    let level_col = column("level")?;
    let conf_col = column("conf")?;
    let text_col = column("text")?;

    let mut weighted_sum = 0.0f64;
    let mut total_weight = 0usize;
    for line in lines {
        let fields = line.split('\t').collect::<Vec<_>>();
        if fields.get(level_col) != Some(&"5") {
            continue;
        }
        let Some(conf) = fields.get(conf_col).and_then(|c| c.trim().parse::<f64>().ok())
        else {
            continue;
        };
        let weight = fields
            .get(text_col)
            .map(|t| t.trim().chars().count())
            .unwrap_or(0);
        if conf < 0.0 || weight == 0 {
            continue;
        }
        weighted_sum += conf * weight as f64;
        total_weight += weight;
    }

    if total_weight == 0 {
        Ok(0.0)
    } else {
        let mean = weighted_sum / total_weight as f64 / 100.0;
        Ok(mean.clamp(0.0, 1.0) as f32)
    }
}
