//! Dimensionality reduction of embedding matrices.
//!
//! Every algorithm implements [`Reducer`]. PCA runs in-process; the
//! neighbor-embedding family (TSNE, PaCMAP, TRIMAP, UMAP) is delegated to an
//! external reduction service. Unknown algorithm names pass the matrix
//! through untouched.

pub mod pca;
pub mod remote;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{info, warn};

pub use pca::PcaReducer;
pub use remote::{ReductionService, ReductionServiceConfig};

/// Target dimensionality of the plotted projection.
pub const DEFAULT_COMPONENTS: usize = 2;
/// Seed threaded through every stochastic variant unless overridden.
pub const DEFAULT_SEED: u64 = 42;

/// Failures raised by the reduction stage.
#[derive(Debug, Error)]
pub enum ReductionError {
    /// The embedding matrix has no rows or zero-width rows.
    #[error("embedding matrix is empty")]
    Empty,
    /// Rows of the embedding matrix differ in length.
    #[error("embedding row {row} has length {len}, expected {expected}")]
    Ragged {
        /// Offending row.
        row: usize,
        /// Its length.
        len: usize,
        /// Length of the first row.
        expected: usize,
    },
    /// The numerical backend rejected the input.
    #[error("{algorithm} failed: {message}")]
    Algorithm {
        /// Algorithm name.
        algorithm: String,
        /// Backend message.
        message: String,
    },
    /// No reduction service is configured for a remote algorithm.
    #[error("{0} requires a reduction service endpoint")]
    ProviderUnavailable(String),
    /// The reduction service could not be reached or answered with an error.
    #[error("reduction service failed: {0}")]
    Provider(String),
    /// The reduced matrix does not line up with the input.
    #[error("reduced matrix has shape {rows}x{cols}, expected {expected_rows}x{expected_cols}")]
    ShapeMismatch {
        /// Rows returned.
        rows: usize,
        /// Width of the first offending row.
        cols: usize,
        /// Rows expected.
        expected_rows: usize,
        /// Width expected.
        expected_cols: usize,
    },
}

/// Selectable reduction algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Principal component analysis.
    Pca,
    /// t-distributed stochastic neighbor embedding.
    Tsne,
    /// Pairwise controlled manifold approximation.
    Pacmap,
    /// Large-scale dimensionality reduction using triplets.
    Trimap,
    /// Uniform manifold approximation and projection.
    Umap,
    /// Any other name; reduces to an identity pass-through.
    Unrecognized(String),
}

impl Algorithm {
    /// Parses an algorithm name case-insensitively; never fails.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "PCA" => Self::Pca,
            "TSNE" | "T-SNE" => Self::Tsne,
            "PACMAP" => Self::Pacmap,
            "TRIMAP" => Self::Trimap,
            "UMAP" => Self::Umap,
            _ => Self::Unrecognized(name.trim().to_string()),
        }
    }

    /// Canonical name, also used as the wire name for the reduction service.
    pub fn name(&self) -> &str {
        match self {
            Self::Pca => "PCA",
            Self::Tsne => "TSNE",
            Self::Pacmap => "PACMAP",
            Self::Trimap => "TRIMAP",
            Self::Umap => "UMAP",
            Self::Unrecognized(name) => name,
        }
    }

    /// Whether the algorithm is executed by the external reduction service.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Tsne | Self::Pacmap | Self::Trimap | Self::Umap)
    }
}

impl FromStr for Algorithm {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Maps a matrix to `dim` columns, seeded for reproducibility.
pub trait Reducer {
    /// Reduces `matrix` (one row per observation) to `dim` columns.
    fn reduce(
        &self,
        matrix: &[Vec<f64>],
        dim: usize,
        seed: u64,
    ) -> Result<Vec<Vec<f64>>, ReductionError>;
}

/// Identity reducer used for unrecognized algorithm names.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl Reducer for PassThrough {
    fn reduce(
        &self,
        matrix: &[Vec<f64>],
        _dim: usize,
        _seed: u64,
    ) -> Result<Vec<Vec<f64>>, ReductionError> {
        Ok(matrix.to_vec())
    }
}

/// Parameters of one reduction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReductionParams {
    /// Selected algorithm.
    pub algorithm: Algorithm,
    /// Output dimensionality.
    pub n_components: usize,
    /// Seed forwarded to stochastic variants.
    pub seed: u64,
    /// Standardize each output column after reduction.
    pub scaling: bool,
}

impl Default for ReductionParams {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Pacmap,
            n_components: DEFAULT_COMPONENTS,
            seed: DEFAULT_SEED,
            scaling: true,
        }
    }
}

/// Reduces the embedding matrix with the configured algorithm and optional scaling.
///
/// `service` is required only for remote algorithms.
pub fn reduce_embeddings(
    embeddings: &[Vec<f32>],
    params: &ReductionParams,
    service: Option<&ReductionService>,
) -> Result<Vec<Vec<f64>>, ReductionError> {
    let width = validate_matrix(embeddings)?;
    let matrix: Vec<Vec<f64>> = embeddings
        .iter()
        .map(|row| row.iter().map(|&v| f64::from(v)).collect())
        .collect();

    info!(
        algorithm = %params.algorithm,
        rows = matrix.len(),
        width,
        n_components = params.n_components,
        seed = params.seed,
        "reducing dimensions"
    );
    let (reduced, expected_cols) = match &params.algorithm {
        Algorithm::Pca => (
            PcaReducer.reduce(&matrix, params.n_components, params.seed)?,
            params.n_components,
        ),
        algorithm @ (Algorithm::Tsne | Algorithm::Pacmap | Algorithm::Trimap | Algorithm::Umap) => {
            let service = service
                .ok_or_else(|| ReductionError::ProviderUnavailable(algorithm.to_string()))?;
            (
                service
                    .for_algorithm(algorithm)
                    .reduce(&matrix, params.n_components, params.seed)?,
                params.n_components,
            )
        }
        Algorithm::Unrecognized(name) => {
            warn!(
                algorithm = %name,
                "unrecognized reduction algorithm; passing embeddings through"
            );
            (
                PassThrough.reduce(&matrix, params.n_components, params.seed)?,
                width,
            )
        }
    };
    check_shape(&reduced, matrix.len(), expected_cols)?;

    if params.scaling {
        Ok(standardize(&reduced))
    } else {
        Ok(reduced)
    }
}

/// Returns the shared row width, rejecting empty or ragged matrices.
pub fn validate_matrix<T>(matrix: &[Vec<T>]) -> Result<usize, ReductionError> {
    let Some(first) = matrix.first() else {
        return Err(ReductionError::Empty);
    };
    let expected = first.len();
    if expected == 0 {
        return Err(ReductionError::Empty);
    }
    for (row, values) in matrix.iter().enumerate() {
        if values.len() != expected {
            return Err(ReductionError::Ragged {
                row,
                len: values.len(),
                expected,
            });
        }
    }
    Ok(expected)
}

fn check_shape(
    reduced: &[Vec<f64>],
    expected_rows: usize,
    expected_cols: usize,
) -> Result<(), ReductionError> {
    let bad_row = reduced.iter().find(|row| row.len() != expected_cols);
    if reduced.len() != expected_rows || bad_row.is_some() {
        return Err(ReductionError::ShapeMismatch {
            rows: reduced.len(),
            cols: bad_row.map_or(expected_cols, Vec::len),
            expected_rows,
            expected_cols,
        });
    }
    Ok(())
}

/// Scales every column to zero mean and unit population variance.
///
/// Constant columns are centered and stay at zero.
pub fn standardize(matrix: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let rows = matrix.len();
    let Some(cols) = matrix.first().map(Vec::len) else {
        return Vec::new();
    };
    let n = rows as f64;
    let mut means = vec![0.0; cols];
    for row in matrix {
        for (mean, value) in means.iter_mut().zip(row) {
            *mean += value / n;
        }
    }
    let mut scales = vec![0.0; cols];
    for row in matrix {
        for ((scale, value), mean) in scales.iter_mut().zip(row).zip(&means) {
            *scale += (value - mean).powi(2) / n;
        }
    }
    for scale in scales.iter_mut() {
        *scale = scale.sqrt();
        if *scale == 0.0 {
            *scale = 1.0;
        }
    }
    matrix
        .iter()
        .map(|row| {
            row.iter()
                .zip(&means)
                .zip(&scales)
                .map(|((value, mean), scale)| (value - mean) / scale)
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(matrix: &[Vec<f64>], col: usize) -> Vec<f64> {
        matrix.iter().map(|row| row[col]).collect()
    }

    fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    fn variance(values: &[f64]) -> f64 {
        let m = mean(values);
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
    }

    #[test]
    fn standardize_yields_zero_mean_unit_variance() {
        let scaled = standardize(&[vec![0.0, 0.0], vec![2.0, 2.0], vec![4.0, 4.0]]);
        for col in 0..2 {
            let values = column(&scaled, col);
            assert!(mean(&values).abs() < 1e-12);
            assert!((variance(&values) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn standardize_keeps_constant_columns_at_zero() {
        let scaled = standardize(&[vec![3.0, 1.0], vec![3.0, 2.0]]);
        assert_eq!(column(&scaled, 0), vec![0.0, 0.0]);
    }

    #[test]
    fn unrecognized_algorithm_passes_through() {
        let embeddings = vec![vec![0.5_f32, 1.5, 2.5], vec![3.0, 4.0, 5.0]];
        let params = ReductionParams {
            algorithm: Algorithm::parse("LLE"),
            scaling: false,
            ..ReductionParams::default()
        };
        let reduced = reduce_embeddings(&embeddings, &params, None).expect("pass through");
        assert_eq!(reduced, vec![vec![0.5, 1.5, 2.5], vec![3.0, 4.0, 5.0]]);
    }

    #[test]
    fn empty_and_ragged_matrices_are_rejected() {
        let params = ReductionParams::default();
        assert!(matches!(
            reduce_embeddings(&[], &params, None),
            Err(ReductionError::Empty)
        ));
        assert!(matches!(
            reduce_embeddings(&[vec![1.0, 2.0], vec![1.0]], &params, None),
            Err(ReductionError::Ragged { row: 1, .. })
        ));
    }

    #[test]
    fn remote_algorithms_need_a_service() {
        let params = ReductionParams {
            algorithm: Algorithm::Umap,
            ..ReductionParams::default()
        };
        let err = reduce_embeddings(&[vec![1.0, 2.0, 3.0]], &params, None).expect_err("no service");
        assert!(matches!(err, ReductionError::ProviderUnavailable(name) if name == "UMAP"));
    }

    #[test]
    fn algorithm_names_parse_case_insensitively() {
        assert_eq!(Algorithm::parse("pca"), Algorithm::Pca);
        assert_eq!(Algorithm::parse(" PaCMAP "), Algorithm::Pacmap);
        assert_eq!(Algorithm::parse("t-sne"), Algorithm::Tsne);
        assert_eq!(
            Algorithm::parse("Isomap"),
            Algorithm::Unrecognized("Isomap".to_string())
        );
        assert!(Algorithm::Trimap.is_remote());
        assert!(!Algorithm::Pca.is_remote());
    }

    #[test]
    fn pca_reduction_is_deterministic() {
        let embeddings: Vec<Vec<f32>> = (0..6)
            .map(|i| {
                let x = i as f32;
                vec![x, 2.0 * x + 1.0, (x * 0.7).sin(), 1.0 - x * 0.3]
            })
            .collect();
        let params = ReductionParams {
            algorithm: Algorithm::Pca,
            ..ReductionParams::default()
        };
        let first = reduce_embeddings(&embeddings, &params, None).expect("pca");
        let second = reduce_embeddings(&embeddings, &params, None).expect("pca");
        assert_eq!(first.len(), embeddings.len());
        assert!(first.iter().all(|row| row.len() == 2));
        assert_eq!(first, second);
    }
}
