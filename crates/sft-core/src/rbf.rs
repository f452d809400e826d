//! Thin-plate-spline (polyharmonic, order 2) warp between point sets.
//!
//! Given `p` control points `sᵢ` and targets `tᵢ` in `d` dimensions, the warp is
//!
//! ```text
//! f(x) = Σᵢ wᵢ φ(‖x − sᵢ‖) + a₀ + A·x
//! ```
//!
//! with `φ(r) = r² ln r`. The weights and the affine block are found from one
//! `(p + d + 1)²` linear system; see Bookstein, "Principal warps", and
//! Donato & Belongie, "Approximate thin plate spline mappings", for the
//! regularized variant.

use crate::{Embedding, PointSet, SftError, SolveStage};
use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Singular values below this fraction of the largest one count as zero when
/// measuring the affine rank of the control points.
const AFFINE_RANK_TOL: f64 = 1e-9;

/// The radial basis `φ(r)`.
///
/// `r²·ln r` for `r ≥ 1`, `r·ln(rʳ)` below 1. Both branches agree at `r = 1`
/// and `φ(0) = 0`.
#[inline]
pub fn radial_basis(r: f64) -> f64 {
    if r >= 1.0 {
        r * r * r.ln()
    } else {
        r * r.powf(r).ln()
    }
}

/// `K[i, j] = φ(‖aᵢ − bⱼ‖)` for row-point matrices `a` (n × d) and `b` (m × d).
pub fn pairwise_radial_basis(a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), b.nrows(), |i, j| {
        radial_basis((a.row(i) - b.row(j)).norm())
    })
}

/// Fit options.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RbfParams {
    /// Added to the kernel diagonal; `0` interpolates every control point exactly.
    pub regularization: f64,
    /// When the control points span a lower-dimensional affine subspace (e.g.
    /// a flat template lifted into 3D), fit inside that subspace instead of
    /// failing. Queries are projected onto it before evaluation.
    pub reduce_flat_sources: bool,
    /// Smallest affine hull dimension a reduced fit accepts. Control points
    /// spanning fewer dimensions are singular. `0` accepts any rank above zero.
    pub min_rank: usize,
}

/// Orthonormal frame of the affine hull of the control points.
#[derive(Clone, Debug, PartialEq)]
struct AffineFrame {
    origin: DVector<f64>,
    /// `d × k`, orthonormal columns.
    axes: DMatrix<f64>,
}

impl AffineFrame {
    fn project(&self, points: &DMatrix<f64>) -> DMatrix<f64> {
        let mut centered = points.clone();
        for mut row in centered.row_iter_mut() {
            row -= self.origin.transpose();
        }
        centered * &self.axes
    }
}

/// A solved thin-plate-spline warp.
///
/// Holds the control points and the `(p + k + 1) × d_out` coefficient matrix:
/// the first `p` rows weight the radial basis, the remaining `k + 1` rows are
/// the affine block (constant first). `k` is the input dimension, or the
/// dimension of the control points' affine hull when the fit was reduced.
#[derive(Clone, Debug, PartialEq)]
pub struct RadialBasisWarp {
    source: PointSet,
    control: DMatrix<f64>,
    frame: Option<AffineFrame>,
    coefficients: DMatrix<f64>,
}

impl RadialBasisWarp {
    /// Fit the warp mapping `source` onto `target`.
    ///
    /// At least `d + 1` control points must not lie in a common affine
    /// subspace (for `d = 2`, not all on a line); otherwise the system is
    /// singular and `SingularSystem` is returned.
    pub fn fit(
        source: &PointSet,
        target: &PointSet,
        regularization: f64,
    ) -> Result<Self, SftError> {
        Self::fit_with(
            source,
            target,
            &RbfParams {
                regularization,
                reduce_flat_sources: false,
                min_rank: 0,
            },
        )
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(points = source.len(), dim = source.dim()))
    )]
    pub fn fit_with(
        source: &PointSet,
        target: &PointSet,
        params: &RbfParams,
    ) -> Result<Self, SftError> {
        if source.dim() != target.dim() {
            return Err(SftError::DimensionMismatch {
                context: "warp fit target dimension",
                expected: source.dim(),
                got: target.dim(),
            });
        }
        if source.len() != target.len() {
            return Err(SftError::DimensionMismatch {
                context: "warp fit target count",
                expected: source.len(),
                got: target.len(),
            });
        }
        if source.is_empty() {
            return Err(SftError::EmptyInput {
                context: "warp control points",
            });
        }
        let alpha = params.regularization;
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(SftError::InvalidParameter {
                name: "regularization",
                value: alpha,
            });
        }

        let singular = SftError::SingularSystem {
            stage: SolveStage::WarpFit,
        };

        let s = source.as_matrix();
        let (p, d) = (s.nrows(), s.ncols());

        let (origin, axes, rank) = affine_hull(s);
        let (control, frame) = if rank == d {
            (s.clone(), None)
        } else if params.reduce_flat_sources && rank >= params.min_rank.max(1) {
            let frame = AffineFrame { origin, axes };
            (frame.project(s), Some(frame))
        } else {
            debug!("control points span {rank} of {d} dimensions");
            return Err(singular);
        };
        let k = control.ncols();

        if alpha == 0.0 && has_duplicates(&control) {
            debug!("duplicate control points make the kernel singular");
            return Err(singular);
        }

        // Kernel block, relaxed by the regularization.
        let mut kernel = pairwise_radial_basis(&control, &control);
        for i in 0..p {
            kernel[(i, i)] += alpha;
        }

        let n = p + k + 1;
        let mut m = DMatrix::<f64>::zeros(n, n);
        m.view_mut((0, 0), (p, p)).copy_from(&kernel);
        for i in 0..p {
            m[(i, p)] = 1.0;
            m[(p, i)] = 1.0;
            for c in 0..k {
                m[(i, p + 1 + c)] = control[(i, c)];
                m[(p + 1 + c, i)] = control[(i, c)];
            }
        }

        // Targets, zero-padded below the affine block.
        let t = target.as_matrix();
        let mut y = DMatrix::<f64>::zeros(n, t.ncols());
        y.view_mut((0, 0), (p, t.ncols())).copy_from(t);

        let coefficients = m.lu().solve(&y).ok_or(singular.clone())?;
        if coefficients.iter().any(|v| !v.is_finite()) {
            return Err(singular);
        }

        debug!(
            "thin plate spline fit: {p} control points, dim {d} (fit dim {k}), alpha {alpha}"
        );

        Ok(Self {
            source: source.clone(),
            control,
            frame,
            coefficients,
        })
    }

    /// Evaluate the warp at `points` (`n × d`).
    pub fn evaluate(&self, points: &PointSet) -> Result<PointSet, SftError> {
        points.ensure_dim("warp query", self.source.dim())?;
        let q = match &self.frame {
            Some(frame) => frame.project(points.as_matrix()),
            None => points.as_matrix().clone(),
        };

        let n = q.nrows();
        let p = self.control.nrows();
        let k = self.control.ncols();

        let mut basis = DMatrix::<f64>::zeros(n, p + k + 1);
        basis
            .view_mut((0, 0), (n, p))
            .copy_from(&pairwise_radial_basis(&q, &self.control));
        basis.column_mut(p).fill(1.0);
        basis.view_mut((0, p + 1), (n, k)).copy_from(&q);

        PointSet::from_matrix(basis * &self.coefficients)
    }

    /// Control points as given to the fit.
    pub fn source_points(&self) -> &PointSet {
        &self.source
    }

    /// Stacked `(p + k + 1) × d_out` coefficients.
    pub fn coefficients(&self) -> &DMatrix<f64> {
        &self.coefficients
    }

    /// Radial-basis weights, one row per control point.
    pub fn kernel_weights(&self) -> DMatrix<f64> {
        self.coefficients.rows(0, self.control.nrows()).into_owned()
    }

    /// Affine block: constant row first, then one row per fit axis.
    pub fn affine_part(&self) -> DMatrix<f64> {
        let p = self.control.nrows();
        self.coefficients
            .rows(p, self.coefficients.nrows() - p)
            .into_owned()
    }

    /// Dimension the fit was carried out in (smaller than the input
    /// dimension when flat sources were reduced).
    pub fn fit_dim(&self) -> usize {
        self.control.ncols()
    }
}

impl Embedding for RadialBasisWarp {
    fn input_dim(&self) -> usize {
        self.source.dim()
    }

    fn output_dim(&self) -> usize {
        self.coefficients.ncols()
    }

    fn apply(&self, points: &PointSet) -> Result<PointSet, SftError> {
        self.evaluate(points)
    }
}

/// Centroid, principal axes and affine rank of row points `s`.
fn affine_hull(s: &DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>, usize) {
    let d = s.ncols();
    let origin: DVector<f64> = s.row_mean().transpose();
    if s.nrows() < 2 {
        return (origin, DMatrix::zeros(d, 0), 0);
    }

    let mut centered = s.clone();
    for mut row in centered.row_iter_mut() {
        row -= origin.transpose();
    }

    let svd = centered.svd(false, true);
    let Some(v_t) = svd.v_t else {
        return (origin, DMatrix::zeros(d, 0), 0);
    };

    let sigma = &svd.singular_values;
    let largest = sigma.iter().copied().fold(0.0, f64::max);
    if largest <= f64::MIN_POSITIVE {
        return (origin, DMatrix::zeros(d, 0), 0);
    }

    let kept: Vec<usize> = (0..sigma.len())
        .filter(|&i| sigma[i] > AFFINE_RANK_TOL * largest)
        .collect();
    let mut axes = DMatrix::zeros(d, kept.len());
    for (c, &i) in kept.iter().enumerate() {
        axes.set_column(c, &v_t.row(i).transpose());
    }
    (origin, axes, kept.len())
}

fn has_duplicates(points: &DMatrix<f64>) -> bool {
    let scale = points.amax().max(1.0);
    let eps = 1e-12 * scale;
    for i in 0..points.nrows() {
        for j in (i + 1)..points.nrows() {
            if (points.row(i) - points.row(j)).norm() <= eps {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn grid(nx: usize, ny: usize, step: f64) -> PointSet {
        let mut rows = Vec::new();
        for j in 0..ny {
            for i in 0..nx {
                rows.push([i as f64 * step, j as f64 * step]);
            }
        }
        PointSet::from_rows(&rows).unwrap()
    }

    fn bend(points: &PointSet) -> PointSet {
        let rows: Vec<Vec<f64>> = points
            .iter()
            .map(|p| {
                vec![
                    p[0] + 0.1 * p[1] * p[1] + 3.0,
                    p[1] - 0.05 * p[0] * p[1] - 1.0,
                ]
            })
            .collect();
        PointSet::from_vec_rows(2, &rows).unwrap()
    }

    #[test]
    fn kernel_is_continuous_at_one_and_zero_at_origin() {
        assert_eq!(radial_basis(0.0), 0.0);
        let below = radial_basis(1.0 - 1e-9);
        let above = radial_basis(1.0 + 1e-9);
        assert_abs_diff_eq!(below, 0.0, epsilon = 1e-8);
        assert_abs_diff_eq!(above, 0.0, epsilon = 1e-8);
        assert_abs_diff_eq!(radial_basis(1.0), 0.0);
        assert_abs_diff_eq!(radial_basis(0.5), 0.25 * 0.5_f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(radial_basis(3.0), 9.0 * 3.0_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn interpolates_control_points_exactly() {
        let source = grid(4, 3, 10.0);
        let target = bend(&source);
        let warp = RadialBasisWarp::fit(&source, &target, 0.0).unwrap();

        let mapped = warp.evaluate(&source).unwrap();
        assert!(mapped.max_distance(&target).unwrap() < 1e-6);
        assert_eq!(warp.coefficients().nrows(), source.len() + 3);
        assert_eq!(warp.coefficients().ncols(), 2);
    }

    #[test]
    fn identical_source_and_target_give_identity() {
        let source = PointSet::from_rows(&[[0.0, 0.0], [4.0, 0.0], [1.0, 3.0]]).unwrap();
        let warp = RadialBasisWarp::fit(&source, &source, 0.0).unwrap();

        let queries =
            PointSet::from_rows(&[[-5.0, 2.0], [0.3, 0.7], [12.0, -8.0], [2.0, 2.0]]).unwrap();
        let mapped = warp.evaluate(&queries).unwrap();
        assert!(mapped.max_distance(&queries).unwrap() < 1e-9);
    }

    #[test]
    fn collinear_sources_are_singular() {
        let source = PointSet::from_rows(&[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [5.0, 5.0]]).unwrap();
        let target = PointSet::from_rows(&[[0.0, 1.0], [1.0, 0.0], [2.0, 3.0], [4.0, 4.0]]).unwrap();
        let err = RadialBasisWarp::fit(&source, &target, 0.0).unwrap_err();
        assert_eq!(
            err,
            SftError::SingularSystem {
                stage: SolveStage::WarpFit
            }
        );
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let source = grid(2, 2, 1.0);
        let target3 = PointSet::from_rows(&[[0.0, 0.0, 0.0]; 4]).unwrap();
        assert!(matches!(
            RadialBasisWarp::fit(&source, &target3, 0.0),
            Err(SftError::DimensionMismatch { .. })
        ));

        let fewer = PointSet::from_rows(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]).unwrap();
        assert!(matches!(
            RadialBasisWarp::fit(&source, &fewer, 0.0),
            Err(SftError::DimensionMismatch { .. })
        ));

        let warp = RadialBasisWarp::fit(&source, &source, 0.0).unwrap();
        assert!(warp.evaluate(&target3).is_err());
    }

    #[test]
    fn regularization_relaxes_interpolation() {
        let source = grid(4, 4, 5.0);
        let target = bend(&source);
        let exact = RadialBasisWarp::fit(&source, &target, 0.0).unwrap();
        let smooth = RadialBasisWarp::fit(&source, &target, 1e4).unwrap();

        let err_exact = exact.evaluate(&source).unwrap().max_distance(&target).unwrap();
        let err_smooth = smooth.evaluate(&source).unwrap().max_distance(&target).unwrap();
        assert!(err_exact < 1e-6);
        assert!(err_smooth > err_exact);

        assert!(matches!(
            RadialBasisWarp::fit(&source, &target, -1.0),
            Err(SftError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn evaluation_is_repeatable() {
        let source = grid(3, 3, 2.0);
        let target = bend(&source);
        let warp = RadialBasisWarp::fit(&source, &target, 0.0).unwrap();
        let q = PointSet::from_rows(&[[0.5, 0.25], [3.3, 1.1]]).unwrap();
        assert_eq!(warp.evaluate(&q).unwrap(), warp.evaluate(&q).unwrap());
    }

    #[test]
    fn flat_sources_fit_in_their_plane_when_allowed() {
        // Parameter grid lifted onto z = 1, mapped onto a tilted copy.
        let flat = grid(3, 3, 1.0);
        let lifted: Vec<Vec<f64>> = flat.iter().map(|p| vec![p[0], p[1], 1.0]).collect();
        let source = PointSet::from_vec_rows(3, &lifted).unwrap();
        let tilted: Vec<Vec<f64>> = flat
            .iter()
            .map(|p| vec![p[0], p[1], 2.0 + 0.5 * p[0]])
            .collect();
        let target = PointSet::from_vec_rows(3, &tilted).unwrap();

        assert!(RadialBasisWarp::fit(&source, &target, 0.0).is_err());

        let params = RbfParams {
            reduce_flat_sources: true,
            ..RbfParams::default()
        };
        let warp = RadialBasisWarp::fit_with(&source, &target, &params).unwrap();
        assert_eq!(warp.fit_dim(), 2);
        assert_eq!(warp.input_dim(), 3);

        let q = PointSet::from_rows(&[[0.5, 1.5, 1.0], [1.25, 0.75, 1.0]]).unwrap();
        let expected = PointSet::from_rows(&[[0.5, 1.5, 2.25], [1.25, 0.75, 2.625]]).unwrap();
        assert!(warp.evaluate(&q).unwrap().max_distance(&expected).unwrap() < 1e-9);
    }

    #[test]
    fn reduced_fit_rejects_sources_below_min_rank() {
        let line: Vec<Vec<f64>> = (0..4).map(|i| vec![i as f64, i as f64, 1.0]).collect();
        let source = PointSet::from_vec_rows(3, &line).unwrap();
        let params = RbfParams {
            reduce_flat_sources: true,
            min_rank: 2,
            ..RbfParams::default()
        };
        assert!(matches!(
            RadialBasisWarp::fit_with(&source, &source, &params),
            Err(SftError::SingularSystem {
                stage: SolveStage::WarpFit
            })
        ));

        let any_rank = RbfParams {
            min_rank: 0,
            ..params
        };
        let warp = RadialBasisWarp::fit_with(&source, &source, &any_rank).unwrap();
        assert_eq!(warp.fit_dim(), 1);
    }
}
