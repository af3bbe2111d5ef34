#![warn(missing_docs)]
//! Core library entry points for the pathviz embedding pipeline.
//!
//! Labeled path descriptions are read from a delimited table, embedded by an
//! external sentence encoder, reduced to two dimensions and plotted. Both
//! expensive stages are cached as gzip-compressed JSON artifacts keyed by
//! their inputs.

pub mod cache;
pub mod controls;
pub mod dataset;
pub mod embedder;
pub mod embeddings;
pub mod pipeline;
pub mod plot;
pub mod reducer;
mod retry;

pub use cache::{ArtifactStore, CacheError, CacheKey};
pub use controls::Cli;
pub use dataset::{Dataset, DatasetReader, MalformedInputError, ReaderOptions, Record, TableLayout};
pub use embedder::{EmbeddingProvider, EmbeddingProviderError, HttpEmbedder, HttpEmbedderConfig};
pub use embeddings::{EmbeddingArtifact, ReducedArtifact};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineRun, RunSummary, StageOutcome};
pub use plot::PlotError;
pub use reducer::{
    Algorithm, ReductionError, ReductionParams, ReductionService, ReductionServiceConfig,
};
