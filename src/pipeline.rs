//! Two-stage embed-then-reduce run with a cache check in front of each stage.
//!
//! A run reads the input table, then moves through
//! `NeedEmbeddings -> HaveEmbeddings -> NeedReduction -> HaveReduced`. Each
//! `Need*` state is resolved either by loading the keyed artifact from the
//! output directory or by computing and persisting it. The reduced records
//! are finally plotted.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{ArtifactStore, CacheError, CacheKey};
use crate::dataset::{
    write_transcript, Dataset, DatasetReader, MalformedInputError, ReaderOptions,
};
use crate::embedder::{embed_dataset, EmbeddingProvider, EmbeddingProviderError};
use crate::embeddings::{EmbeddingArtifact, ReducedArtifact};
use crate::plot::{group_by_label, render_scatter, PlotError};
use crate::reducer::{reduce_embeddings, ReductionError, ReductionParams, ReductionService};

/// File name of the scatter plot inside the output directory.
pub const PLOT_FILE: &str = "plot.svg";
/// File name of the retained-row transcript inside the output directory.
pub const TRANSCRIPT_FILE: &str = "transcript.txt";

/// Any failure that aborts a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The input table could not be used.
    #[error(transparent)]
    Input(#[from] MalformedInputError),
    /// The embedding provider failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingProviderError),
    /// Dimensionality reduction failed.
    #[error(transparent)]
    Reduction(#[from] ReductionError),
    /// An artifact could not be read or written.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// The plot could not be drawn.
    #[error(transparent)]
    Plot(#[from] PlotError),
    /// The transcript could not be written.
    #[error("failed to write transcript {path:?}: {source}")]
    Transcript {
        /// Transcript path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Everything a run needs besides its providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Input table.
    pub input: PathBuf,
    /// Directory receiving artifacts, transcript and plot.
    pub output_dir: PathBuf,
    /// How the input table is parsed and filtered.
    pub reader: ReaderOptions,
    /// Reduction algorithm and parameters.
    pub reduction: ReductionParams,
    /// Ignore cached artifacts and recompute both stages.
    pub refresh: bool,
    /// Write `transcript.txt`.
    pub transcript: bool,
    /// Write `plot.svg`.
    pub plot: bool,
}

impl PipelineConfig {
    /// Config with default reader and reduction settings.
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            reader: ReaderOptions::default(),
            reduction: ReductionParams::default(),
            refresh: false,
            transcript: true,
            plot: true,
        }
    }
}

/// How a stage was satisfied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    /// Loaded from a keyed artifact.
    Cached,
    /// Computed and persisted during this run.
    Computed,
}

impl StageOutcome {
    /// Whether the stage was a cache hit.
    pub fn is_cached(self) -> bool {
        self == Self::Cached
    }
}

/// What a finished run did and where it left its outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Records embedded and reduced.
    pub records: usize,
    /// Embedding width, `None` for an empty dataset.
    pub embedding_dim: Option<usize>,
    /// Embedding stage outcome.
    pub embeddings: StageOutcome,
    /// Reduction stage outcome.
    pub reduction: StageOutcome,
    /// Stage one artifact.
    pub embeddings_path: PathBuf,
    /// Stage two artifact.
    pub reduced_path: PathBuf,
    /// Transcript, when written.
    pub transcript_path: Option<PathBuf>,
    /// Plot, when rendered.
    pub plot_path: Option<PathBuf>,
}

/// Result of [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// The reduced artifact, loaded or freshly computed.
    pub artifact: ReducedArtifact,
    /// Run bookkeeping.
    pub summary: RunSummary,
}

/// Drives one configuration through both stages.
pub struct Pipeline<P> {
    config: PipelineConfig,
    embedder: P,
    reduction_service: Option<ReductionService>,
    store: ArtifactStore,
}

impl<P: EmbeddingProvider> Pipeline<P> {
    /// Creates a pipeline writing into `config.output_dir`.
    pub fn new(config: PipelineConfig, embedder: P) -> Self {
        let store = ArtifactStore::new(&config.output_dir);
        Self {
            config,
            embedder,
            reduction_service: None,
            store,
        }
    }

    /// Attaches the service used for TSNE, PaCMAP, TRIMAP and UMAP.
    pub fn with_reduction_service(mut self, service: ReductionService) -> Self {
        self.reduction_service = Some(service);
        self
    }

    /// Artifact store backing this pipeline.
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Runs both stages, then writes the transcript and plot if enabled.
    pub fn run(&self) -> Result<PipelineRun, PipelineError> {
        info!(input = %self.config.input.display(), "reading input table");
        let outcome =
            DatasetReader::new(self.config.reader.clone()).read_path(&self.config.input)?;

        let transcript_path = if self.config.transcript {
            let path = self.config.output_dir.join(TRANSCRIPT_FILE);
            write_transcript(&path, &outcome.rows).map_err(|source| PipelineError::Transcript {
                path: path.clone(),
                source,
            })?;
            Some(path)
        } else {
            None
        };

        let (embedded, embedding_key, embeddings) = self.ensure_embeddings(&outcome.dataset)?;
        let (reduced, reduction) = self.ensure_reduction(embedded, &embedding_key)?;
        let reduction_key = CacheKey::for_reduction(&embedding_key, &self.config.reduction);

        let width = reduced.reduced_embeddings.first().map_or(0, Vec::len);
        let plot_path = if !self.config.plot {
            None
        } else if width != 2 {
            warn!(width, "reduced points are not planar; skipping plot");
            None
        } else {
            let path = self.config.output_dir.join(PLOT_FILE);
            let series = group_by_label(&reduced.source.labels, &reduced.reduced_embeddings)?;
            render_scatter(&path, &reduced.algorithm, &series)?;
            Some(path)
        };

        let summary = RunSummary {
            records: reduced.source.len(),
            embedding_dim: reduced.source.dimension(),
            embeddings,
            reduction,
            embeddings_path: self.store.embeddings_path(&embedding_key),
            reduced_path: self.store.reduced_path(&reduction_key),
            transcript_path,
            plot_path,
        };
        Ok(PipelineRun {
            artifact: reduced,
            summary,
        })
    }

    /// Resolves stage one for `dataset`, loading or computing the embeddings.
    pub fn ensure_embeddings(
        &self,
        dataset: &Dataset,
    ) -> Result<(EmbeddingArtifact, CacheKey, StageOutcome), PipelineError> {
        let key = CacheKey::for_embeddings(dataset, self.embedder.model());
        let path = self.store.embeddings_path(&key);

        if !self.config.refresh {
            if let Some(artifact) = self.store.load::<EmbeddingArtifact>(&path)? {
                if artifact.embedding_key == key.as_str() && artifact.is_aligned() {
                    info!(
                        path = %path.display(),
                        records = artifact.len(),
                        "embeddings cache hit"
                    );
                    return Ok((artifact, key, StageOutcome::Cached));
                }
                warn!(
                    path = %path.display(),
                    "embedding artifact does not match its key; recomputing"
                );
            }
        }

        debug!(key = %key, "embeddings cache miss");
        let vectors = embed_dataset(&self.embedder, dataset)?;
        let artifact =
            EmbeddingArtifact::new(key.as_str(), self.embedder.model(), dataset, vectors);
        self.store.store(&path, &artifact)?;
        info!(path = %path.display(), records = artifact.len(), "embeddings stored");
        Ok((artifact, key, StageOutcome::Computed))
    }

    /// Resolves stage two on top of a stage one artifact.
    pub fn ensure_reduction(
        &self,
        embedded: EmbeddingArtifact,
        embedding_key: &CacheKey,
    ) -> Result<(ReducedArtifact, StageOutcome), PipelineError> {
        let params = &self.config.reduction;
        let key = CacheKey::for_reduction(embedding_key, params);
        let path = self.store.reduced_path(&key);

        if !self.config.refresh {
            if let Some(artifact) = self.store.load::<ReducedArtifact>(&path)? {
                if artifact.reduction_key == key.as_str() && artifact.is_aligned() {
                    info!(
                        path = %path.display(),
                        algorithm = %artifact.algorithm,
                        "reduction cache hit"
                    );
                    return Ok((artifact, StageOutcome::Cached));
                }
                warn!(
                    path = %path.display(),
                    "reduction artifact does not match its key; recomputing"
                );
            }
        }

        debug!(key = %key, algorithm = %params.algorithm, "reduction cache miss");
        let reduced_embeddings = reduce_embeddings(
            &embedded.embeddings,
            params,
            self.reduction_service.as_ref(),
        )?;
        let artifact = ReducedArtifact {
            reduction_key: key.as_str().to_string(),
            algorithm: params.algorithm.name().to_string(),
            n_components: params.n_components,
            seed: params.seed,
            scaling: params.scaling,
            source: embedded,
            reduced_embeddings,
        };
        self.store.store(&path, &artifact)?;
        info!(path = %path.display(), algorithm = %artifact.algorithm, "reduction stored");
        Ok((artifact, StageOutcome::Computed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Record;
    use crate::reducer::Algorithm;
    use std::cell::Cell;

    struct Counting {
        calls: Cell<usize>,
    }

    impl EmbeddingProvider for Counting {
        fn model(&self) -> &str {
            "counting"
        }

        fn embed(&self, sentences: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
            self.calls.set(self.calls.get() + 1);
            Ok(sentences
                .iter()
                .enumerate()
                .map(|(i, s)| vec![i as f32, s.len() as f32, 0.5])
                .collect())
        }
    }

    fn pca_config(dir: &std::path::Path) -> PipelineConfig {
        let mut config = PipelineConfig::new(dir.join("in.csv"), dir.join("out"));
        config.reduction.algorithm = Algorithm::Pca;
        config
    }

    fn dataset() -> Dataset {
        Dataset::new(vec![
            Record::new("Web(Patrick)", "open menu"),
            Record::new("Web(Patrick)", " click login"),
            Record::new("VR(Patrick)", " grab handle"),
            Record::new("VR(Patrick)", " turn"),
        ])
    }

    #[test]
    fn embeddings_are_reused_unless_refreshed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = Counting { calls: Cell::new(0) };
        let pipeline = Pipeline::new(pca_config(dir.path()), &provider);

        let (_, _, first) = pipeline.ensure_embeddings(&dataset()).expect("first");
        let (_, _, second) = pipeline.ensure_embeddings(&dataset()).expect("second");
        assert_eq!(first, StageOutcome::Computed);
        assert_eq!(second, StageOutcome::Cached);
        assert_eq!(provider.calls.get(), 1);

        let mut config = pca_config(dir.path());
        config.refresh = true;
        let refreshed = Pipeline::new(config, &provider);
        let (_, _, third) = refreshed.ensure_embeddings(&dataset()).expect("third");
        assert_eq!(third, StageOutcome::Computed);
        assert_eq!(provider.calls.get(), 2);
    }

    #[test]
    fn mismatched_artifact_key_is_a_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = Counting { calls: Cell::new(0) };
        let pipeline = Pipeline::new(pca_config(dir.path()), &provider);
        let (mut artifact, key, _) = pipeline.ensure_embeddings(&dataset()).expect("first");

        artifact.embedding_key = "something else".to_string();
        let path = pipeline.store().embeddings_path(&key);
        pipeline.store().store(&path, &artifact).expect("overwrite");

        let (reloaded, _, outcome) = pipeline.ensure_embeddings(&dataset()).expect("second");
        assert_eq!(outcome, StageOutcome::Computed);
        assert_eq!(reloaded.embedding_key, key.as_str());
        assert_eq!(provider.calls.get(), 2);
    }

    #[test]
    fn reduction_keeps_records_aligned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = Counting { calls: Cell::new(0) };
        let pipeline = Pipeline::new(pca_config(dir.path()), &provider);
        let (embedded, key, _) = pipeline.ensure_embeddings(&dataset()).expect("embed");

        let (reduced, outcome) = pipeline.ensure_reduction(embedded, &key).expect("reduce");
        assert_eq!(outcome, StageOutcome::Computed);
        assert!(reduced.is_aligned());
        assert_eq!(reduced.algorithm, "PCA");
        assert!(reduced.reduced_embeddings.iter().all(|row| row.len() == 2));
    }
}
