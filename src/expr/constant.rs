//! Constant expression creation.

use nalgebra::DMatrix;

use super::expression::Expr;
use super::shape::Shape;

/// Create a constant expression from a scalar.
pub fn constant(value: f64) -> Expr {
    Expr::Constant(DMatrix::from_element(1, 1, value))
}

/// Create a constant column vector.
pub fn constant_vec(values: Vec<f64>) -> Expr {
    let n = values.len();
    Expr::Constant(DMatrix::from_vec(n, 1, values))
}

/// Create a constant matrix from column-major values.
pub fn constant_matrix(values: Vec<f64>, rows: usize, cols: usize) -> Expr {
    Expr::Constant(DMatrix::from_vec(rows, cols, values))
}

/// Create a constant expression from a nalgebra DMatrix.
pub fn constant_dmatrix(matrix: DMatrix<f64>) -> Expr {
    Expr::Constant(matrix)
}

/// Create a zero constant with the given shape.
pub fn zeros(shape: impl Into<Shape>) -> Expr {
    let shape = shape.into();
    Expr::Constant(DMatrix::zeros(shape.rows(), shape.cols()))
}

/// Create a ones constant with the given shape.
pub fn ones(shape: impl Into<Shape>) -> Expr {
    let shape = shape.into();
    Expr::Constant(DMatrix::from_element(shape.rows(), shape.cols(), 1.0))
}

/// Create an identity matrix constant.
pub fn eye(n: usize) -> Expr {
    Expr::Constant(DMatrix::identity(n, n))
}

/// Constant filled with `value`.
pub fn full(shape: impl Into<Shape>, value: f64) -> Expr {
    let shape = shape.into();
    Expr::Constant(DMatrix::from_element(shape.rows(), shape.cols(), value))
}

/// Extension trait for creating constants from various types.
pub trait IntoConstant {
    fn into_constant(self) -> Expr;
}

impl IntoConstant for f64 {
    fn into_constant(self) -> Expr {
        constant(self)
    }
}

impl IntoConstant for i32 {
    fn into_constant(self) -> Expr {
        constant(self as f64)
    }
}

impl IntoConstant for Vec<f64> {
    fn into_constant(self) -> Expr {
        constant_vec(self)
    }
}

impl IntoConstant for &[f64] {
    fn into_constant(self) -> Expr {
        constant_vec(self.to_vec())
    }
}

impl IntoConstant for DMatrix<f64> {
    fn into_constant(self) -> Expr {
        constant_dmatrix(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_constant() {
        let c = constant(5.0);
        assert!(c.is_constant());
        assert!(c.shape().is_scalar());
    }

    #[test]
    fn test_shapes() {
        assert_eq!(constant_vec(vec![1.0, 2.0]).shape(), Shape::vector(2));
        assert_eq!(constant_matrix(vec![0.0; 6], 2, 3).shape(), Shape::matrix(2, 3));
        assert_eq!(zeros((3, 2)).shape(), Shape::matrix(3, 2));
        assert_eq!(eye(3).shape(), Shape::matrix(3, 3));
    }

    #[test]
    fn test_column_major_layout() {
        let m = constant_matrix(vec![1.0, 2.0, 3.0, 4.0], 2, 2);
        assert_eq!(m.constant_value().unwrap()[(0, 1)], 3.0);
    }

    #[test]
    fn test_into_constant() {
        assert_eq!(2.0.into_constant(), constant(2.0));
        assert_eq!(full(2, 1.5), constant_vec(vec![1.5, 1.5]));
    }
}
