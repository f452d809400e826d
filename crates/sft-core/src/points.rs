//! Ordered, fixed-dimension point sets.

use crate::SftError;
use nalgebra::{DMatrix, DVector, Point2, Point3, RowDVector};

/// An immutable `n × d` set of points, one point per row.
///
/// The dimension is fixed at construction; every operation that consumes a
/// point set validates it against what it expects.
#[derive(Clone, Debug, PartialEq)]
pub struct PointSet {
    coords: DMatrix<f64>,
}

impl PointSet {
    /// Wrap a matrix whose rows are points.
    pub fn from_matrix(coords: DMatrix<f64>) -> Result<Self, SftError> {
        if coords.ncols() == 0 {
            return Err(SftError::EmptyInput {
                context: "point dimension",
            });
        }
        Ok(Self { coords })
    }

    /// Build from fixed-size rows.
    pub fn from_rows<const D: usize>(rows: &[[f64; D]]) -> Result<Self, SftError> {
        let flat: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Self::from_matrix(DMatrix::from_row_slice(rows.len(), D, &flat))
    }

    /// Build from variable-length rows; every row must have `dim` entries.
    pub fn from_vec_rows(dim: usize, rows: &[Vec<f64>]) -> Result<Self, SftError> {
        let mut flat = Vec::with_capacity(rows.len() * dim);
        for r in rows {
            if r.len() != dim {
                return Err(SftError::DimensionMismatch {
                    context: "point set row",
                    expected: dim,
                    got: r.len(),
                });
            }
            flat.extend_from_slice(r);
        }
        Self::from_matrix(DMatrix::from_row_slice(rows.len(), dim, &flat))
    }

    pub fn from_points2(points: &[Point2<f64>]) -> Self {
        let mut coords = DMatrix::zeros(points.len(), 2);
        for (i, p) in points.iter().enumerate() {
            coords[(i, 0)] = p.x;
            coords[(i, 1)] = p.y;
        }
        Self { coords }
    }

    pub fn from_points3(points: &[Point3<f64>]) -> Self {
        let mut coords = DMatrix::zeros(points.len(), 3);
        for (i, p) in points.iter().enumerate() {
            coords[(i, 0)] = p.x;
            coords[(i, 1)] = p.y;
            coords[(i, 2)] = p.z;
        }
        Self { coords }
    }

    /// A single point as a one-row set.
    pub fn single(point: &[f64]) -> Result<Self, SftError> {
        Self::from_matrix(DMatrix::from_row_slice(1, point.len(), point))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.coords.nrows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coords.nrows() == 0
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.coords.ncols()
    }

    #[inline]
    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.coords
    }

    pub fn into_matrix(self) -> DMatrix<f64> {
        self.coords
    }

    #[inline]
    pub fn get(&self, i: usize, axis: usize) -> f64 {
        self.coords[(i, axis)]
    }

    pub fn row(&self, i: usize) -> RowDVector<f64> {
        self.coords.row(i).into_owned()
    }

    /// Point `i` as a column vector.
    pub fn point(&self, i: usize) -> DVector<f64> {
        self.coords.row(i).transpose()
    }

    pub fn iter(&self) -> impl Iterator<Item = DVector<f64>> + '_ {
        (0..self.len()).map(move |i| self.point(i))
    }

    /// Fail with `DimensionMismatch` unless the set has `expected` columns.
    pub fn ensure_dim(&self, context: &'static str, expected: usize) -> Result<(), SftError> {
        if self.dim() != expected {
            return Err(SftError::dims(context, expected, self.dim()));
        }
        Ok(())
    }

    /// All points of a 2D set.
    pub fn to_points2(&self) -> Result<Vec<Point2<f64>>, SftError> {
        self.ensure_dim("to_points2", 2)?;
        Ok((0..self.len())
            .map(|i| Point2::new(self.get(i, 0), self.get(i, 1)))
            .collect())
    }

    pub fn to_points3(&self) -> Result<Vec<Point3<f64>>, SftError> {
        self.ensure_dim("to_points3", 3)?;
        Ok((0..self.len())
            .map(|i| Point3::new(self.get(i, 0), self.get(i, 1), self.get(i, 2)))
            .collect())
    }

    /// Subset by row indices, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            coords: self.coords.select_rows(indices.iter()),
        }
    }

    /// Stack rows of several sets with the same dimension.
    pub fn concat(sets: &[PointSet]) -> Result<Self, SftError> {
        let first = sets.first().ok_or(SftError::EmptyInput {
            context: "concat of point sets",
        })?;
        let dim = first.dim();
        let total: usize = sets.iter().map(PointSet::len).sum();
        let mut coords = DMatrix::zeros(total, dim);
        let mut row = 0;
        for s in sets {
            s.ensure_dim("concat", dim)?;
            coords.rows_mut(row, s.len()).copy_from(&s.coords);
            row += s.len();
        }
        Ok(Self { coords })
    }

    /// Largest per-point Euclidean distance to `other`.
    pub fn max_distance(&self, other: &PointSet) -> Result<f64, SftError> {
        other.ensure_dim("max_distance", self.dim())?;
        if other.len() != self.len() {
            return Err(SftError::dims("max_distance point count", self.len(), other.len()));
        }
        Ok((0..self.len())
            .map(|i| (self.coords.row(i) - other.coords.row(i)).norm())
            .fold(0.0, f64::max))
    }
}

impl From<&[Point2<f64>]> for PointSet {
    fn from(points: &[Point2<f64>]) -> Self {
        PointSet::from_points2(points)
    }
}
