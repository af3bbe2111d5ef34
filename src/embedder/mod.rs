//! Sentence embedding providers and the stage that drives them.

pub mod http;

use thiserror::Error;
use tracing::{debug, info};

use crate::dataset::Dataset;

pub use http::{HttpEmbedder, HttpEmbedderConfig};

/// Model used when none is configured.
pub const DEFAULT_EMBEDDING_MODEL: &str = "distiluse-base-multilingual-cased-v2";

/// Failures raised while talking to an embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingProviderError {
    /// The provider could not be reached.
    #[error("embedding provider unreachable: {0}")]
    Unreachable(String),
    /// The provider answered with a non-success status.
    #[error("embedding provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The provider payload could not be decoded.
    #[error("failed to decode embedding response: {0}")]
    Decode(String),
    /// The provider returned a different number of vectors than requested.
    #[error("provider returned {returned} embeddings for {expected} sentences")]
    CountMismatch {
        /// Sentences submitted.
        expected: usize,
        /// Vectors received.
        returned: usize,
    },
    /// Vectors of differing or zero length were returned.
    #[error("embedding {index} has length {len}, expected {expected}")]
    RaggedVectors {
        /// Offending row.
        index: usize,
        /// Its length.
        len: usize,
        /// Length of the first vector.
        expected: usize,
    },
    /// The provider was configured incorrectly.
    #[error("invalid embedding provider configuration: {0}")]
    Config(String),
}

/// Maps sentences to fixed-length vectors.
///
/// Implementations must be deterministic for a fixed model and return one
/// vector per input sentence, in input order.
pub trait EmbeddingProvider {
    /// Identifier of the model producing the vectors.
    fn model(&self) -> &str;

    /// Embeds the provided sentences.
    fn embed(&self, sentences: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for &P {
    fn model(&self) -> &str {
        (**self).model()
    }

    fn embed(&self, sentences: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
        (**self).embed(sentences)
    }
}

/// Embeds every sentence of the dataset and validates the returned matrix.
pub fn embed_dataset<P: EmbeddingProvider + ?Sized>(
    provider: &P,
    dataset: &Dataset,
) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
    if dataset.is_empty() {
        debug!("dataset empty; skipping embedding provider");
        return Ok(Vec::new());
    }
    let sentences = dataset.sentences();
    info!(
        sentences = sentences.len(),
        model = provider.model(),
        "creating embeddings"
    );
    let embeddings = provider.embed(&sentences)?;
    validate_embeddings(&embeddings, sentences.len())?;
    Ok(embeddings)
}

/// Checks row count and that every vector shares the first vector's non-zero length.
pub fn validate_embeddings(
    embeddings: &[Vec<f32>],
    expected: usize,
) -> Result<(), EmbeddingProviderError> {
    if embeddings.len() != expected {
        return Err(EmbeddingProviderError::CountMismatch {
            expected,
            returned: embeddings.len(),
        });
    }
    let Some(first) = embeddings.first() else {
        return Ok(());
    };
    let width = first.len();
    for (index, vector) in embeddings.iter().enumerate() {
        if vector.len() != width || vector.is_empty() {
            return Err(EmbeddingProviderError::RaggedVectors {
                index,
                len: vector.len(),
                expected: width,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Record;
    use std::cell::Cell;

    struct FixedProvider {
        vectors: Vec<Vec<f32>>,
        calls: Cell<usize>,
    }

    impl EmbeddingProvider for FixedProvider {
        fn model(&self) -> &str {
            "fixed"
        }

        fn embed(&self, _sentences: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.vectors.clone())
        }
    }

    fn dataset(n: usize) -> Dataset {
        Dataset::new(
            (0..n)
                .map(|i| Record::new("Web(Patrick)", format!("step {i}")))
                .collect(),
        )
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let provider = FixedProvider {
            vectors: vec![vec![1.0, 2.0]],
            calls: Cell::new(0),
        };
        let err = embed_dataset(&provider, &dataset(2)).expect_err("mismatch");
        assert!(matches!(
            err,
            EmbeddingProviderError::CountMismatch {
                expected: 2,
                returned: 1
            }
        ));
    }

    #[test]
    fn ragged_vectors_are_rejected() {
        let provider = FixedProvider {
            vectors: vec![vec![1.0, 2.0], vec![3.0]],
            calls: Cell::new(0),
        };
        let err = embed_dataset(&provider, &dataset(2)).expect_err("ragged");
        assert!(matches!(
            err,
            EmbeddingProviderError::RaggedVectors { index: 1, .. }
        ));
    }

    #[test]
    fn empty_dataset_skips_provider() {
        let provider = FixedProvider {
            vectors: Vec::new(),
            calls: Cell::new(0),
        };
        let embeddings = embed_dataset(&provider, &Dataset::default()).expect("embed");
        assert!(embeddings.is_empty());
        assert_eq!(provider.calls.get(), 0);
    }
}
