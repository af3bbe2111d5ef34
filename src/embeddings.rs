//! Persisted pipeline artifacts shared by the embedding and reduction stages.

use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;

/// Stage one snapshot: the dataset and one embedding per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingArtifact {
    /// Content key the artifact was stored under.
    pub embedding_key: String,
    /// Model that produced the embeddings.
    pub model: String,
    /// Record labels, in dataset order.
    pub labels: Vec<String>,
    /// Record sentences, in dataset order.
    pub text: Vec<String>,
    /// Per-record special-token placeholders.
    pub special_tokens: Vec<String>,
    /// One vector per record.
    pub embeddings: Vec<Vec<f32>>,
}

impl EmbeddingArtifact {
    /// Captures a dataset together with its embeddings.
    pub fn new(
        embedding_key: impl Into<String>,
        model: impl Into<String>,
        dataset: &Dataset,
        embeddings: Vec<Vec<f32>>,
    ) -> Self {
        Self {
            embedding_key: embedding_key.into(),
            model: model.into(),
            labels: dataset.labels(),
            text: dataset.sentences().into_iter().map(str::to_string).collect(),
            special_tokens: vec![String::new(); dataset.len()],
            embeddings,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the artifact holds no records.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Width of the embedding vectors, if any exist.
    pub fn dimension(&self) -> Option<usize> {
        self.embeddings.first().map(Vec::len)
    }

    /// Whether labels, sentences, placeholders and embeddings line up.
    pub fn is_aligned(&self) -> bool {
        let n = self.labels.len();
        self.text.len() == n && self.special_tokens.len() == n && self.embeddings.len() == n
    }
}

/// Stage two snapshot: stage one plus the reduced coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedArtifact {
    /// Content key the artifact was stored under.
    pub reduction_key: String,
    /// Algorithm name that produced the reduction.
    pub algorithm: String,
    /// Output dimensionality requested.
    pub n_components: usize,
    /// Seed forwarded to the algorithm.
    pub seed: u64,
    /// Whether columns were standardized.
    pub scaling: bool,
    /// The stage one snapshot this reduction was computed from.
    #[serde(flatten)]
    pub source: EmbeddingArtifact,
    /// One reduced vector per record.
    pub reduced_embeddings: Vec<Vec<f64>>,
}

impl ReducedArtifact {
    /// Whether every record has exactly one reduced vector.
    pub fn is_aligned(&self) -> bool {
        self.source.is_aligned() && self.reduced_embeddings.len() == self.source.len()
    }
}
