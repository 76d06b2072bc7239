//! Batch configuration.
//!
//! Values are layered, lowest priority first: built-in defaults, an optional
//! TOML (or JSON) config file, then command-line flags. Every flag can also be
//! set through an `OCR_BATCH_*` environment variable, which `clap` resolves
//! for us, and those variables may live in a `.env` file.

use std::time::Duration;

use clap::{Args, ValueEnum};
use schemars::JsonSchema;

use crate::{async_utils::io::read_json_or_toml, prelude::*};

/// The models we try when nothing else is configured, in priority order.
pub const DEFAULT_MODELS: &[&str] = &["jpn", "kor", "chi_sim", "chi_tra"];

/// How should we choose which models to run on a page?
#[derive(
    Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ModelPolicy {
    /// Run every configured model on every page.
    #[default]
    Fixed,

    /// Run a combined detection pass first, and only run the models matching
    /// the detected script.
    Detect,
}

/// What goes between the texts of consecutive pages?
#[derive(Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PageSeparator {
    /// A form feed on its own line, like `pdftotext`.
    #[default]
    FormFeed,

    /// An empty line.
    BlankLine,
}

impl PageSeparator {
    /// The literal text to insert between pages.
    pub fn as_str(self) -> &'static str {
        match self {
            PageSeparator::FormFeed => "\n\x0C\n",
            PageSeparator::BlankLine => "\n\n",
        }
    }
}

/// Configuration options shared by all subcommands that touch the pipeline.
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigOpts {
    /// A TOML or JSON config file. Command-line flags override its values.
    #[clap(long = "config", env = "OCR_BATCH_CONFIG")]
    pub config_path: Option<PathBuf>,

    /// Directory containing the PDFs to process [default: /app/input].
    #[clap(short = 'i', long, env = "OCR_BATCH_INPUT_DIR")]
    pub input_dir: Option<PathBuf>,

    /// Directory to write results to [default: /app/output].
    #[clap(short = 'o', long, env = "OCR_BATCH_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// OCR models to try on each page, in priority order
    /// [default: jpn,kor,chi_sim,chi_tra].
    #[clap(short = 'm', long, env = "OCR_BATCH_MODELS", value_delimiter = ',')]
    pub models: Option<Vec<String>>,

    /// How to choose models for each page [default: fixed].
    #[clap(long, value_enum, env = "OCR_BATCH_MODEL_POLICY")]
    pub model_policy: Option<ModelPolicy>,

    /// Model used for the detection pass of `--model-policy detect`
    /// [default: all configured models joined with `+`].
    #[clap(long, env = "OCR_BATCH_DETECTION_MODEL")]
    pub detection_model: Option<String>,

    /// The DPI to use for rasterization [default: 300].
    #[clap(long, env = "OCR_BATCH_DPI")]
    pub dpi: Option<u32>,

    /// Maximum seconds for a single OCR attempt on one page [default: 120].
    #[clap(long, env = "OCR_BATCH_PAGE_TIMEOUT")]
    pub page_timeout_secs: Option<u64>,

    /// Max number of documents to process at a time [default: 2].
    #[clap(short = 'j', long, env = "OCR_BATCH_JOBS")]
    pub jobs: Option<usize>,

    /// Max number of pages per document to process at a time [default: 4].
    #[clap(long, env = "OCR_BATCH_PAGE_JOBS")]
    pub page_jobs: Option<usize>,

    /// Max number of external OCR and rasterizer processes
    /// [default: number of CPUs].
    #[clap(long, env = "OCR_BATCH_MAX_PROCESSES")]
    pub max_processes: Option<usize>,

    /// Only process the first N pages of each document. Longer documents are
    /// marked incomplete.
    #[clap(long, env = "OCR_BATCH_MAX_PAGES")]
    pub max_pages: Option<usize>,

    /// How many times to retry a page when every model failed on it
    /// [default: 0].
    #[clap(long, env = "OCR_BATCH_PAGE_RETRIES")]
    pub page_retries: Option<u32>,

    /// Stop trying lower-priority models once an attempt reaches this
    /// confidence (0.0 to 1.0). By default every model is tried.
    #[clap(long, env = "OCR_BATCH_EARLY_ACCEPT")]
    pub early_accept_confidence: Option<f32>,

    /// What to put between pages in text output [default: form-feed].
    #[clap(long, value_enum, env = "OCR_BATCH_PAGE_SEPARATOR")]
    pub page_separator: Option<PageSeparator>,

    /// Tesseract page segmentation mode.
    #[clap(long, env = "OCR_BATCH_PSM")]
    pub psm: Option<u8>,

    /// Don't detect titles and headings.
    #[clap(long, env = "OCR_BATCH_NO_OUTLINE")]
    pub no_outline: bool,

    /// Path to the `tesseract` executable.
    #[clap(long, env = "OCR_BATCH_TESSERACT")]
    pub tesseract_cmd: Option<PathBuf>,

    /// Path to poppler's `pdftocairo` executable.
    #[clap(long, env = "OCR_BATCH_PDFTOCAIRO")]
    pub pdftocairo_cmd: Option<PathBuf>,

    /// Path to poppler's `pdfinfo` executable.
    #[clap(long, env = "OCR_BATCH_PDFINFO")]
    pub pdfinfo_cmd: Option<PathBuf>,
}

/// The on-disk config file. All fields are optional.
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct ConfigFile {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub models: Option<Vec<String>>,
    pub model_policy: Option<ModelPolicy>,
    pub detection_model: Option<String>,
    pub dpi: Option<u32>,
    pub page_timeout_secs: Option<u64>,
    pub jobs: Option<usize>,
    pub page_jobs: Option<usize>,
    pub max_processes: Option<usize>,
    pub max_pages: Option<usize>,
    pub page_retries: Option<u32>,
    pub early_accept_confidence: Option<f32>,
    pub page_separator: Option<PageSeparator>,
    pub psm: Option<u8>,
    pub outline: Option<bool>,
    #[serde(default)]
    pub commands: CommandPaths,
}

/// Paths to external tools in the config file.
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CommandPaths {
    pub tesseract: Option<PathBuf>,
    pub pdftocairo: Option<PathBuf>,
    pub pdfinfo: Option<PathBuf>,
}

/// External commands used by the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commands {
    pub tesseract: PathBuf,
    pub pdftocairo: PathBuf,
    pub pdfinfo: PathBuf,
}

/// Fully resolved configuration, validated once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub models: Vec<String>,
    pub model_policy: ModelPolicy,
    pub detection_model: Option<String>,
    pub dpi: u32,
    pub page_timeout: Duration,
    pub jobs: usize,
    pub page_jobs: usize,
    pub max_processes: usize,
    pub max_pages: Option<usize>,
    pub page_retries: u32,
    pub early_accept_confidence: Option<f32>,
    pub page_separator: PageSeparator,
    pub psm: Option<u8>,
    pub outline: bool,
    pub commands: Commands,
}

impl Config {
    /// Load our config file (if any) and merge our options over it.
    pub async fn load(opts: &ConfigOpts) -> Result<Self> {
        let file = match &opts.config_path {
            Some(path) => read_json_or_toml::<ConfigFile>(path)
                .await
                .with_context(|| format!("invalid config file {:?}", path.display()))?,
            None => ConfigFile::default(),
        };
        Self::resolve(opts, file)
    }

    /// Merge command-line options over a config file, and apply defaults.
    pub fn resolve(opts: &ConfigOpts, file: ConfigFile) -> Result<Self> {
        let models = opts
            .models
            .clone()
            .or(file.models)
            .unwrap_or_else(|| DEFAULT_MODELS.iter().map(|&m| m.to_owned()).collect());
        let models = models
            .into_iter()
            .map(|m| m.trim().to_owned())
            .filter(|m| !m.is_empty())
            .collect::<Vec<_>>();

        let config = Self {
            input_dir: opts
                .input_dir
                .clone()
                .or(file.input_dir)
                .unwrap_or_else(|| PathBuf::from("/app/input")),
            output_dir: opts
                .output_dir
                .clone()
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from("/app/output")),
            models,
            model_policy: opts.model_policy.or(file.model_policy).unwrap_or_default(),
            detection_model: opts.detection_model.clone().or(file.detection_model),
            dpi: opts.dpi.or(file.dpi).unwrap_or(300),
            page_timeout: Duration::from_secs(
                opts.page_timeout_secs.or(file.page_timeout_secs).unwrap_or(120),
            ),
            jobs: opts.jobs.or(file.jobs).unwrap_or(2),
            page_jobs: opts.page_jobs.or(file.page_jobs).unwrap_or(4),
            max_processes: opts
                .max_processes
                .or(file.max_processes)
                .unwrap_or_else(num_cpus::get),
            max_pages: opts.max_pages.or(file.max_pages),
            page_retries: opts.page_retries.or(file.page_retries).unwrap_or(0),
            early_accept_confidence: opts
                .early_accept_confidence
                .or(file.early_accept_confidence),
            page_separator: opts
                .page_separator
                .or(file.page_separator)
                .unwrap_or_default(),
            psm: opts.psm.or(file.psm),
            outline: !opts.no_outline && file.outline.unwrap_or(true),
            commands: Commands {
                tesseract: opts
                    .tesseract_cmd
                    .clone()
                    .or(file.commands.tesseract)
                    .unwrap_or_else(|| PathBuf::from("tesseract")),
                pdftocairo: opts
                    .pdftocairo_cmd
                    .clone()
                    .or(file.commands.pdftocairo)
                    .unwrap_or_else(|| PathBuf::from("pdftocairo")),
                pdfinfo: opts
                    .pdfinfo_cmd
                    .clone()
                    .or(file.commands.pdfinfo)
                    .unwrap_or_else(|| PathBuf::from("pdfinfo")),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that our values make sense.
    fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(anyhow!("no OCR models configured"));
        }
        if !(50..=1200).contains(&self.dpi) {
            return Err(anyhow!("DPI must be between 50 and 1200, got {}", self.dpi));
        }
        if self.page_timeout.is_zero() {
            return Err(anyhow!("page timeout must be at least 1 second"));
        }
        if self.jobs == 0 || self.page_jobs == 0 {
            return Err(anyhow!("job counts must be at least 1"));
        }
        if self.max_pages == Some(0) {
            return Err(anyhow!("max pages must be at least 1"));
        }
        if let Some(threshold) = self.early_accept_confidence
            && !(0.0..=1.0).contains(&threshold)
        {
            return Err(anyhow!(
                "early accept confidence must be between 0.0 and 1.0, got {}",
                threshold
            ));
        }
        Ok(())
    }

    /// The model used for the detection pass, if detection is enabled.
    pub fn effective_detection_model(&self) -> Option<String> {
        match self.model_policy {
            ModelPolicy::Fixed => None,
            ModelPolicy::Detect => Some(
                self.detection_model
                    .clone()
                    .unwrap_or_else(|| self.models.join("+")),
            ),
        }
    }
}
