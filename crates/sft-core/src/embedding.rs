//! Embeddings: callables mapping a point set of dimension `d_in` onto a point
//! set of dimension `d_out`.
//!
//! The warp to the image, the template embedding and the reconstructed surface
//! all implement [`Embedding`], so the isometric solver can treat them alike.

use crate::{PointSet, SftError};
use nalgebra::{DMatrix, DVector, Point2, Point3};
use std::sync::Arc;

/// A mapping between point sets of fixed input and output dimension.
pub trait Embedding {
    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    /// Map every row of `points`. Implementations must reject a point set
    /// whose dimension differs from [`Embedding::input_dim`].
    fn apply(&self, points: &PointSet) -> Result<PointSet, SftError>;

    /// Map a single point.
    fn apply_point(&self, point: &[f64]) -> Result<DVector<f64>, SftError> {
        let out = self.apply(&PointSet::single(point)?)?;
        Ok(out.point(0))
    }
}

impl<E: Embedding + ?Sized> Embedding for &E {
    fn input_dim(&self) -> usize {
        (**self).input_dim()
    }
    fn output_dim(&self) -> usize {
        (**self).output_dim()
    }
    fn apply(&self, points: &PointSet) -> Result<PointSet, SftError> {
        (**self).apply(points)
    }
}

impl<E: Embedding + ?Sized> Embedding for Box<E> {
    fn input_dim(&self) -> usize {
        (**self).input_dim()
    }
    fn output_dim(&self) -> usize {
        (**self).output_dim()
    }
    fn apply(&self, points: &PointSet) -> Result<PointSet, SftError> {
        (**self).apply(points)
    }
}

impl<E: Embedding + ?Sized> Embedding for Arc<E> {
    fn input_dim(&self) -> usize {
        (**self).input_dim()
    }
    fn output_dim(&self) -> usize {
        (**self).output_dim()
    }
    fn apply(&self, points: &PointSet) -> Result<PointSet, SftError> {
        (**self).apply(points)
    }
}

/// Lifts 2D parameter points onto the plane `z = constant` of a flat template.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IdentityEmbedding {
    pub constant: f64,
}

impl Default for IdentityEmbedding {
    fn default() -> Self {
        Self { constant: 1.0 }
    }
}

impl IdentityEmbedding {
    pub fn new(constant: f64) -> Self {
        Self { constant }
    }

    /// Lift a single parameter point.
    #[inline]
    pub fn lift(&self, p: Point2<f64>) -> Point3<f64> {
        Point3::new(p.x, p.y, self.constant)
    }
}

impl Embedding for IdentityEmbedding {
    fn input_dim(&self) -> usize {
        2
    }

    fn output_dim(&self) -> usize {
        3
    }

    fn apply(&self, points: &PointSet) -> Result<PointSet, SftError> {
        points.ensure_dim("identity embedding input", 2)?;
        let m = points.as_matrix();
        let mut out = DMatrix::from_element(m.nrows(), 3, self.constant);
        out.columns_mut(0, 2).copy_from(m);
        PointSet::from_matrix(out)
    }
}

/// `second ∘ first`: evaluate `first`, then feed its output through `second`.
#[derive(Clone, Debug)]
pub struct Composed<A, B> {
    first: A,
    second: B,
}

impl<A: Embedding, B: Embedding> Composed<A, B> {
    pub fn new(first: A, second: B) -> Result<Self, SftError> {
        if first.output_dim() != second.input_dim() {
            return Err(SftError::dims(
                "composition",
                second.input_dim(),
                first.output_dim(),
            ));
        }
        Ok(Self { first, second })
    }

    pub fn first(&self) -> &A {
        &self.first
    }

    pub fn second(&self) -> &B {
        &self.second
    }
}

impl<A: Embedding, B: Embedding> Embedding for Composed<A, B> {
    fn input_dim(&self) -> usize {
        self.first.input_dim()
    }

    fn output_dim(&self) -> usize {
        self.second.output_dim()
    }

    fn apply(&self, points: &PointSet) -> Result<PointSet, SftError> {
        self.second.apply(&self.first.apply(points)?)
    }
}

/// Forward-difference Jacobian of `embedding` at `point`.
///
/// Each input coordinate is perturbed by `step` in turn; column `i` of the
/// result is `(f(p + step·eᵢ) − f(p)) / step`. Returns `f(p)` alongside the
/// `d_out × d_in` Jacobian.
pub fn forward_difference<E: Embedding + ?Sized>(
    embedding: &E,
    point: &[f64],
    step: f64,
) -> Result<(DVector<f64>, DMatrix<f64>), SftError> {
    let d_in = embedding.input_dim();
    if point.len() != d_in {
        return Err(SftError::dims("forward difference point", d_in, point.len()));
    }

    // Row 0 is the base point, row i+1 the base point shifted along axis i.
    let mut stencil = DMatrix::zeros(d_in + 1, d_in);
    for r in 0..=d_in {
        for c in 0..d_in {
            stencil[(r, c)] = point[c];
        }
        if r > 0 {
            stencil[(r, r - 1)] += step;
        }
    }

    let values = embedding.apply(&PointSet::from_matrix(stencil)?)?;
    let base = values.point(0);
    let mut jac = DMatrix::zeros(values.dim(), d_in);
    for i in 0..d_in {
        let diff = (values.point(i + 1) - &base) / step;
        jac.set_column(i, &diff);
    }
    Ok((base, jac))
}

/// Maps each point to the row-major flattened forward-difference Jacobian of
/// the wrapped embedding, so derivatives compose like any other embedding.
#[derive(Clone, Debug)]
pub struct ForwardDifference<E> {
    inner: E,
    step: f64,
}

impl<E: Embedding> ForwardDifference<E> {
    pub fn new(inner: E, step: f64) -> Self {
        Self { inner, step }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Value and Jacobian at a single point.
    pub fn at(&self, point: &[f64]) -> Result<(DVector<f64>, DMatrix<f64>), SftError> {
        forward_difference(&self.inner, point, self.step)
    }
}

impl<E: Embedding> Embedding for ForwardDifference<E> {
    fn input_dim(&self) -> usize {
        self.inner.input_dim()
    }

    fn output_dim(&self) -> usize {
        self.inner.output_dim() * self.inner.input_dim()
    }

    fn apply(&self, points: &PointSet) -> Result<PointSet, SftError> {
        points.ensure_dim("forward difference input", self.input_dim())?;
        let mut out = DMatrix::zeros(points.len(), self.output_dim());
        for (i, p) in points.iter().enumerate() {
            let (_, jac) = self.at(p.as_slice())?;
            let flat = jac.transpose();
            for (k, v) in flat.iter().enumerate() {
                out[(i, k)] = *v;
            }
        }
        PointSet::from_matrix(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// (x, y) -> (2x + y, x·y)
    struct Bilinear;

    impl Embedding for Bilinear {
        fn input_dim(&self) -> usize {
            2
        }
        fn output_dim(&self) -> usize {
            2
        }
        fn apply(&self, points: &PointSet) -> Result<PointSet, SftError> {
            points.ensure_dim("bilinear", 2)?;
            let rows: Vec<Vec<f64>> = points
                .iter()
                .map(|p| vec![2.0 * p[0] + p[1], p[0] * p[1]])
                .collect();
            PointSet::from_vec_rows(2, &rows)
        }
    }

    #[test]
    fn identity_appends_constant_coordinate() {
        let pts = PointSet::from_rows(&[[0.5, -1.0], [3.0, 4.0]]).unwrap();
        let out = IdentityEmbedding::default().apply(&pts).unwrap();
        assert_eq!(out.dim(), 3);
        assert_eq!(out.row(1).as_slice(), &[3.0, 4.0, 1.0]);

        let lifted = IdentityEmbedding::new(2.5).lift(Point2::new(1.0, 2.0));
        assert_eq!(lifted, Point3::new(1.0, 2.0, 2.5));
    }

    #[test]
    fn identity_does_not_accumulate_coordinates() {
        let id = IdentityEmbedding::default();
        let pts = PointSet::from_rows(&[[1.0, 2.0]]).unwrap();
        let once = id.apply(&pts).unwrap();
        let again = id.apply(&pts).unwrap();
        assert_eq!(once, again);
        assert_eq!(again.dim(), 3);

        // The lifted set is 3D and cannot be lifted a second time.
        assert!(matches!(
            id.apply(&once),
            Err(SftError::DimensionMismatch {
                expected: 2,
                got: 3,
                ..
            })
        ));
        assert!(Composed::new(id, id).is_err());
    }

    #[test]
    fn composition_evaluates_first_then_second() {
        let c = Composed::new(Bilinear, IdentityEmbedding::new(0.0)).unwrap();
        assert_eq!(c.input_dim(), 2);
        assert_eq!(c.output_dim(), 3);
        let out = c.apply_point(&[1.0, 3.0]).unwrap();
        assert_eq!(out.as_slice(), &[5.0, 3.0, 0.0]);
    }

    #[test]
    fn forward_difference_matches_analytic_jacobian() {
        let (value, jac) = forward_difference(&Bilinear, &[2.0, 3.0], 1.0).unwrap();
        assert_eq!(value.as_slice(), &[7.0, 6.0]);
        // d(2x+y) = (2, 1); d(xy) with unit steps = (y, x) exactly for a bilinear term.
        assert_abs_diff_eq!(jac[(0, 0)], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(jac[(0, 1)], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(jac[(1, 0)], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(jac[(1, 1)], 2.0, epsilon = 1e-12);

        let flat = ForwardDifference::new(Bilinear, 1.0)
            .apply_point(&[2.0, 3.0])
            .unwrap();
        assert_eq!(flat.as_slice(), &[2.0, 1.0, 3.0, 2.0]);
    }

    #[test]
    fn forward_difference_rejects_wrong_point_dimension() {
        assert!(forward_difference(&Bilinear, &[1.0, 2.0, 3.0], 1.0).is_err());
    }
}
