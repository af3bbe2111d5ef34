//! Command-line and environment configuration for `pathviz-prepare`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

use crate::dataset::{ReaderOptions, TableLayout, DEFAULT_LABEL_COLUMN, DEFAULT_TEXT_COLUMN};
use crate::embedder::{HttpEmbedderConfig, DEFAULT_EMBEDDING_MODEL};
use crate::pipeline::PipelineConfig;
use crate::reducer::remote::DEFAULT_REDUCTION_JOBS;
use crate::reducer::{
    Algorithm, ReductionParams, ReductionServiceConfig, DEFAULT_COMPONENTS, DEFAULT_SEED,
};

/// Command-line interface of the preparation binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pathviz-prepare",
    about = "Embed, reduce and plot labeled path descriptions"
)]
pub struct Cli {
    /// Input table
    #[arg(long, env = "PATHVIZ_INPUT", default_value = "Data.csv")]
    pub input: PathBuf,

    /// Directory for cached artifacts, transcript and plot
    #[arg(long, env = "PATHVIZ_OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// Reduction algorithm (PCA, TSNE, PACMAP, TRIMAP, UMAP); anything else passes through
    #[arg(long, env = "PATHVIZ_ALGORITHM", default_value = "PACMAP")]
    pub algorithm: String,

    /// Output dimensionality
    #[arg(long, env = "PATHVIZ_COMPONENTS", default_value_t = DEFAULT_COMPONENTS)]
    pub components: usize,

    /// Seed forwarded to stochastic reducers
    #[arg(long, env = "PATHVIZ_SEED", default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Skip standardizing the reduced columns
    #[arg(long, env = "PATHVIZ_NO_SCALING", default_value_t = false)]
    pub no_scaling: bool,

    /// Table orientation: `columns` reads the transposed export (field names
    /// down the first column, first line ignored), `rows` a plain header line
    #[arg(long, env = "PATHVIZ_LAYOUT", value_enum, default_value_t = TableLayout::Columns)]
    pub layout: TableLayout,

    /// Field delimiter (single ASCII character)
    #[arg(long, env = "PATHVIZ_DELIMITER", default_value_t = ';')]
    pub delimiter: char,

    /// Column holding the category label
    #[arg(long, env = "PATHVIZ_LABEL_COLUMN", default_value = DEFAULT_LABEL_COLUMN)]
    pub label_column: String,

    /// Column holding the path description
    #[arg(long, env = "PATHVIZ_TEXT_COLUMN", default_value = DEFAULT_TEXT_COLUMN)]
    pub text_column: String,

    /// Labels to keep, comma separated
    #[arg(long, env = "PATHVIZ_LABELS", default_value = "Web(Patrick),VR(Patrick)")]
    pub labels: String,

    /// Base URL of the OpenAI-compatible embedding service
    #[arg(long, env = "PATHVIZ_EMBEDDING_URL", default_value = "http://127.0.0.1:8080/v1")]
    pub embedding_url: String,

    /// Embedding model identifier
    #[arg(long, env = "PATHVIZ_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    /// Compute device hint (e.g. cuda:0)
    #[arg(long, env = "PATHVIZ_EMBEDDING_DEVICE")]
    pub embedding_device: Option<String>,

    /// Bearer token for the embedding service
    #[arg(long, env = "PATHVIZ_EMBEDDING_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,

    /// Sentences per embedding request
    #[arg(long, env = "PATHVIZ_EMBEDDING_BATCH", default_value_t = 32)]
    pub embedding_batch: usize,

    /// Embedding request timeout in seconds
    #[arg(long, env = "PATHVIZ_EMBEDDING_TIMEOUT", default_value_t = 60)]
    pub embedding_timeout_secs: u64,

    /// Attempts per request before giving up
    #[arg(long, env = "PATHVIZ_MAX_RETRIES", default_value_t = 5)]
    pub max_retries: usize,

    /// Reduction service endpoint; required for TSNE, PACMAP, TRIMAP and UMAP
    #[arg(long, env = "PATHVIZ_REDUCTION_URL")]
    pub reduction_url: Option<String>,

    /// Worker-count hint for the reduction service
    #[arg(long, env = "PATHVIZ_REDUCTION_JOBS", default_value_t = DEFAULT_REDUCTION_JOBS)]
    pub reduction_jobs: usize,

    /// Reduction request timeout in seconds
    #[arg(long, env = "PATHVIZ_REDUCTION_TIMEOUT", default_value_t = 600)]
    pub reduction_timeout_secs: u64,

    /// Ignore cached artifacts and recompute both stages
    #[arg(long, env = "PATHVIZ_REFRESH", default_value_t = false)]
    pub refresh: bool,

    /// Skip rendering plot.svg
    #[arg(long, env = "PATHVIZ_NO_PLOT", default_value_t = false)]
    pub no_plot: bool,

    /// Skip writing transcript.txt
    #[arg(long, env = "PATHVIZ_NO_TRANSCRIPT", default_value_t = false)]
    pub no_transcript: bool,

    /// Debug-level logging
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// Converts the parsed CLI into a `PipelineConfig`.
    pub fn build_config(&self) -> Result<PipelineConfig> {
        if !self.delimiter.is_ascii() {
            bail!("delimiter must be a single ASCII character, got {:?}", self.delimiter);
        }
        if self.components == 0 {
            bail!("--components must be at least 1");
        }
        let labels = self.labels_vec();
        if labels.is_empty() {
            bail!("--labels must name at least one label");
        }
        Ok(PipelineConfig {
            input: self.input.clone(),
            output_dir: self.output_dir.clone(),
            reader: ReaderOptions {
                delimiter: self.delimiter as u8,
                layout: self.layout,
                label_column: self.label_column.clone(),
                text_column: self.text_column.clone(),
                allowed_labels: labels,
            },
            reduction: ReductionParams {
                algorithm: Algorithm::parse(&self.algorithm),
                n_components: self.components,
                seed: self.seed,
                scaling: !self.no_scaling,
            },
            refresh: self.refresh,
            transcript: !self.no_transcript,
            plot: !self.no_plot,
        })
    }

    /// Settings for the HTTP embedding client.
    pub fn embedder_config(&self) -> HttpEmbedderConfig {
        HttpEmbedderConfig {
            base_url: self.embedding_url.clone(),
            model: self.embedding_model.clone(),
            api_key: self.embedding_api_key.clone(),
            device: self.embedding_device.clone(),
            timeout: Duration::from_secs(self.embedding_timeout_secs),
            max_retries: self.max_retries,
            batch_size: self.embedding_batch,
        }
    }

    /// Settings for the reduction service, when an endpoint is configured.
    pub fn reduction_service_config(&self) -> Option<ReductionServiceConfig> {
        let endpoint = self.reduction_url.as_deref()?.trim();
        if endpoint.is_empty() {
            return None;
        }
        Some(ReductionServiceConfig {
            endpoint: endpoint.to_string(),
            timeout: Duration::from_secs(self.reduction_timeout_secs),
            max_retries: self.max_retries,
            n_jobs: self.reduction_jobs,
        })
    }

    fn labels_vec(&self) -> Vec<String> {
        self.labels
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
