//! Shape representation for expressions.
//!
//! Every expression is a dense `rows x cols` matrix:
//! - `()` is a 1x1 scalar
//! - `n` is an n x 1 column vector
//! - `(m, n)` is an m x n matrix
//!
//! Elements are addressed in column-major order, the same order `nalgebra`
//! stores a `DMatrix`.

use std::fmt;

/// Shape of an expression.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    rows: usize,
    cols: usize,
}

impl Shape {
    /// Create a scalar shape.
    pub fn scalar() -> Self {
        Shape { rows: 1, cols: 1 }
    }

    /// Create a column vector shape.
    pub fn vector(n: usize) -> Self {
        Shape { rows: n, cols: 1 }
    }

    /// Create a matrix shape.
    pub fn matrix(rows: usize, cols: usize) -> Self {
        Shape { rows, cols }
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.rows * self.cols
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Check if this is a scalar.
    pub fn is_scalar(&self) -> bool {
        self.rows == 1 && self.cols == 1
    }

    /// Check if this is a column vector (scalars included).
    pub fn is_column(&self) -> bool {
        self.cols == 1
    }

    /// Check if this is square.
    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    /// Get the transposed shape.
    pub fn transpose(&self) -> Self {
        Shape {
            rows: self.cols,
            cols: self.rows,
        }
    }

    /// Column-major flat index of `(row, col)`.
    pub fn flat_index(&self, row: usize, col: usize) -> usize {
        col * self.rows + row
    }

    /// `(row, col)` of a column-major flat index.
    pub fn position(&self, index: usize) -> (usize, usize) {
        (index % self.rows.max(1), index / self.rows.max(1))
    }

    /// Elementwise result shape: equal shapes, or a scalar against anything.
    pub fn broadcast(&self, other: &Shape) -> Option<Shape> {
        if self == other {
            Some(*self)
        } else if self.is_scalar() {
            Some(*other)
        } else if other.is_scalar() {
            Some(*self)
        } else {
            None
        }
    }

    /// Result shape of a matrix product, if the inner dimensions agree.
    ///
    /// A scalar operand behaves like elementwise scaling.
    pub fn matmul(&self, other: &Shape) -> Option<Shape> {
        if self.cols == other.rows {
            Some(Shape::matrix(self.rows, other.cols))
        } else if self.is_scalar() || other.is_scalar() {
            self.broadcast(other)
        } else {
            None
        }
    }
}

impl Default for Shape {
    fn default() -> Self {
        Shape::scalar()
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({}x{})", self.rows, self.cols)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

// Conversion traits
impl From<()> for Shape {
    fn from(_: ()) -> Self {
        Shape::scalar()
    }
}

impl From<usize> for Shape {
    fn from(n: usize) -> Self {
        Shape::vector(n)
    }
}

impl From<(usize, usize)> for Shape {
    fn from((m, n): (usize, usize)) -> Self {
        Shape::matrix(m, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar() {
        let s = Shape::scalar();
        assert!(s.is_scalar());
        assert!(s.is_column());
        assert_eq!(s.size(), 1);
    }

    #[test]
    fn test_vector_and_matrix() {
        let v = Shape::vector(5);
        assert_eq!((v.rows(), v.cols()), (5, 1));
        let m = Shape::matrix(3, 4);
        assert_eq!(m.size(), 12);
        assert_eq!(m.transpose(), Shape::matrix(4, 3));
    }

    #[test]
    fn test_flat_index_is_column_major() {
        let m = Shape::matrix(2, 3);
        assert_eq!(m.flat_index(1, 0), 1);
        assert_eq!(m.flat_index(0, 1), 2);
        assert_eq!(m.position(5), (1, 2));
    }

    #[test]
    fn test_broadcast() {
        assert_eq!(
            Shape::scalar().broadcast(&Shape::matrix(3, 4)),
            Some(Shape::matrix(3, 4))
        );
        assert_eq!(Shape::vector(3).broadcast(&Shape::vector(4)), None);
        assert_eq!(Shape::vector(3).broadcast(&Shape::matrix(1, 3)), None);
    }

    #[test]
    fn test_matmul() {
        assert_eq!(
            Shape::matrix(3, 4).matmul(&Shape::vector(4)),
            Some(Shape::vector(3))
        );
        assert_eq!(
            Shape::vector(3).transpose().matmul(&Shape::vector(3)),
            Some(Shape::scalar())
        );
        assert_eq!(Shape::matrix(3, 4).matmul(&Shape::vector(3)), None);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Shape::from(()), Shape::scalar());
        assert_eq!(Shape::from(4), Shape::vector(4));
        assert_eq!(Shape::from((2, 3)), Shape::matrix(2, 3));
        assert_eq!(Shape::matrix(2, 3).to_string(), "2x3");
    }
}
