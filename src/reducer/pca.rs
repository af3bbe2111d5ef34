//! Linear projection onto the leading principal components.

use smartcore::decomposition::pca::{PCAParameters, PCA};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;

use super::{ReductionError, Reducer};

/// In-process PCA backed by `smartcore`. Deterministic; the seed is unused.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcaReducer;

impl Reducer for PcaReducer {
    fn reduce(
        &self,
        matrix: &[Vec<f64>],
        dim: usize,
        _seed: u64,
    ) -> Result<Vec<Vec<f64>>, ReductionError> {
        let records = DenseMatrix::from_2d_vec(&matrix.to_vec()).map_err(failed)?;
        let pca = PCA::<f64, DenseMatrix<f64>>::fit(
            &records,
            PCAParameters::default().with_n_components(dim),
        )
        .map_err(failed)?;
        let projected = pca.transform(&records).map_err(failed)?;

        let (rows, cols) = projected.shape();
        Ok((0..rows)
            .map(|r| (0..cols).map(|c| *projected.get((r, c))).collect())
            .collect())
    }
}

fn failed(err: smartcore::error::Failed) -> ReductionError {
    ReductionError::Algorithm {
        algorithm: "PCA".to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projects_onto_requested_components() {
        let matrix = vec![
            vec![1.0, 0.0, 0.0],
            vec![2.0, 0.1, 0.0],
            vec![3.0, 0.0, 0.1],
            vec![4.0, 0.1, 0.1],
        ];
        let reduced = PcaReducer.reduce(&matrix, 2, 0).expect("pca");
        assert_eq!(reduced.len(), 4);
        assert!(reduced.iter().all(|row| row.len() == 2));
        // The first component follows the dominant first feature.
        let spread = reduced[3][0] - reduced[0][0];
        assert!(spread.abs() > 2.5);
    }

    #[test]
    fn too_many_components_is_an_algorithm_error() {
        let matrix = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 7.0]];
        let err = PcaReducer.reduce(&matrix, 3, 0).expect_err("too many components");
        assert!(matches!(err, ReductionError::Algorithm { .. }));
    }
}
