//! Sparse matrix utilities.
//!
//! Helper functions for assembling QP data as nalgebra-sparse matrices.

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};

/// Create a CSC matrix from triplets (row, col, value).
///
/// Duplicates are summed together.
pub fn csc_from_triplets(
    nrows: usize,
    ncols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
) -> CscMatrix<f64> {
    if rows.is_empty() {
        return CscMatrix::zeros(nrows, ncols);
    }

    let mut coo = CooMatrix::new(nrows, ncols);
    for ((row, col), val) in rows.into_iter().zip(cols).zip(vals) {
        if row < nrows && col < ncols {
            coo.push(row, col, val);
        }
    }

    CscMatrix::from(&coo)
}

/// Upper triangle of a dense (symmetric) matrix in CSC format, dropping zeros.
///
/// Clarabel reads only the upper triangle of the quadratic cost.
pub fn dense_upper_to_csc(dense: &DMatrix<f64>) -> CscMatrix<f64> {
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut vals = Vec::new();

    for j in 0..dense.ncols() {
        for i in 0..(j + 1).min(dense.nrows()) {
            let v = dense[(i, j)];
            if v != 0.0 {
                rows.push(i);
                cols.push(j);
                vals.push(v);
            }
        }
    }

    csc_from_triplets(dense.nrows(), dense.ncols(), rows, cols, vals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csc_to_dense(sparse: &CscMatrix<f64>) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(sparse.nrows(), sparse.ncols());
        for (row, col, val) in sparse.triplet_iter() {
            dense[(row, col)] = *val;
        }
        dense
    }

    #[test]
    fn test_csc_from_triplets() {
        let m = csc_from_triplets(3, 3, vec![0, 1, 2, 2], vec![0, 1, 2, 2], vec![1.0, 2.0, 3.0, 1.0]);
        assert_eq!(m.nrows(), 3);
        assert_eq!(csc_to_dense(&m)[(2, 2)], 4.0);
    }

    #[test]
    fn test_dense_upper_to_csc() {
        let dense = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 4.0]);
        let upper = csc_to_dense(&dense_upper_to_csc(&dense));
        assert_eq!(upper[(0, 1)], 1.0);
        assert_eq!(upper[(1, 0)], 0.0);
        assert_eq!(upper[(1, 1)], 4.0);
    }
}
