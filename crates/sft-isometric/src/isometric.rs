//! Isometric perspective shape-from-template (IsoPSfT).
//!
//! For a parameter point `u` with image position `q = η(u)` and template point
//! `P = Δ(u)`, the template metric `K = JΔᵀJΔ` and the perspective-adjusted
//! image metric
//!
//! ```text
//! G = JηᵀJη − (Jηᵀq)(qᵀJη) / ‖q̃‖²,   q̃ = (q, 1)
//! ```
//!
//! are related by `K = λ²·G` for an isometric deformation, where `λ` is the
//! depth of the surface point along the ray `q̃`. The smallest eigenvalue of
//! `K·G⁻¹` is used as `λ²`; the surface point is then `λ·q̃`. A thin-plate
//! spline from template points to those surface points, chained after the
//! template embedding, is the reconstructed embedding.

use log::{debug, info};
use nalgebra::{DMatrix, DVector, Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};
use sft_core::{
    forward_difference, Composed, Embedding, PointSet, RadialBasisWarp, RbfParams, SftError,
    SolveStage,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Solver tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsometricParams {
    /// Points with `|det G|` below this are skipped as unstable.
    pub stability_threshold: f64,
    /// Forward-difference step in parameter units.
    pub step: f64,
    /// Regularization of the final template-to-surface warp.
    pub tps_regularization: f64,
}

impl Default for IsometricParams {
    fn default() -> Self {
        Self {
            stability_threshold: 1e-6,
            step: 1.0,
            tps_regularization: 0.0,
        }
    }
}

/// Why a control point was left out of the final fit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum DegeneracyReason {
    /// `|det G|` fell below the stability threshold.
    UnstableMetric { det: f64 },
    NonInvertibleMetric,
    /// `K·G⁻¹` has a complex eigenpair.
    ComplexEigenvalues,
    /// Smallest eigenvalue is zero, negative or not finite.
    NonPositiveScale { value: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointDegeneracy {
    /// Row of the control point.
    pub index: usize,
    pub reason: DegeneracyReason,
}

/// A control point that survived the local isometry analysis.
#[derive(Clone, Debug, PartialEq)]
pub struct IsometricSample {
    pub index: usize,
    pub parameter: Point2<f64>,
    pub template_point: DVector<f64>,
    pub image_point: Point2<f64>,
    /// Local isometric scale `λ`, i.e. the recovered depth along `q̃`.
    pub scale: f64,
}

impl IsometricSample {
    /// `λ·q̃`: the reconstructed 3D position.
    pub fn surface_point(&self) -> [f64; 3] {
        [
            self.scale * self.image_point.x,
            self.scale * self.image_point.y,
            self.scale,
        ]
    }
}

/// Local isometric scale `λ` from the template Jacobian `jp` (`d × 2`), the
/// warp Jacobian `jq` (`2 × 2`) and the image point `q`.
pub fn local_scale(
    jp: &DMatrix<f64>,
    jq: &DMatrix<f64>,
    q: Point2<f64>,
    stability_threshold: f64,
) -> Result<f64, DegeneracyReason> {
    let k: Matrix2<f64> = (jp.transpose() * jp).fixed_view::<2, 2>(0, 0).into_owned();
    let jq: Matrix2<f64> = jq.fixed_view::<2, 2>(0, 0).into_owned();

    let q = Vector2::new(q.x, q.y);
    let qt_norm2 = q.norm_squared() + 1.0;
    let jtq = jq.transpose() * q;
    let g = jq.transpose() * jq - jtq * jtq.transpose() / qt_norm2;

    let det = g.determinant();
    if !(det.abs() >= stability_threshold) {
        return Err(DegeneracyReason::UnstableMetric { det });
    }
    let g_inv = g
        .try_inverse()
        .ok_or(DegeneracyReason::NonInvertibleMetric)?;

    let eig = (k * g_inv)
        .eigenvalues()
        .ok_or(DegeneracyReason::ComplexEigenvalues)?;
    let lambda2 = eig[0].min(eig[1]);
    if !(lambda2 > 0.0 && lambda2.is_finite()) {
        return Err(DegeneracyReason::NonPositiveScale { value: lambda2 });
    }
    Ok(lambda2.sqrt())
}

/// The reconstructed embedding: template embedding followed by the fitted
/// template-to-surface warp, with per-point diagnostics of the solve.
#[derive(Clone, Debug)]
pub struct IsometricEmbedding<T> {
    embedding: Composed<T, RadialBasisWarp>,
    samples: Vec<IsometricSample>,
    skipped: Vec<PointDegeneracy>,
}

impl<T: Embedding> IsometricEmbedding<T> {
    pub fn samples(&self) -> &[IsometricSample] {
        &self.samples
    }

    pub fn skipped(&self) -> &[PointDegeneracy] {
        &self.skipped
    }

    pub fn template(&self) -> &T {
        self.embedding.first()
    }

    pub fn surface_warp(&self) -> &RadialBasisWarp {
        self.embedding.second()
    }
}

impl<T: Embedding> Embedding for IsometricEmbedding<T> {
    fn input_dim(&self) -> usize {
        self.embedding.input_dim()
    }

    fn output_dim(&self) -> usize {
        self.embedding.output_dim()
    }

    fn apply(&self, points: &PointSet) -> Result<PointSet, SftError> {
        self.embedding.apply(points)
    }
}

#[derive(Clone, Debug, Default)]
pub struct IsometricSolver {
    params: IsometricParams,
}

impl IsometricSolver {
    pub fn new(params: IsometricParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &IsometricParams {
        &self.params
    }

    /// Analyse one control point.
    pub fn analyse_point<W, T>(
        &self,
        warp: &W,
        template: &T,
        index: usize,
        u: &[f64],
    ) -> Result<Result<IsometricSample, PointDegeneracy>, SftError>
    where
        W: Embedding + ?Sized,
        T: Embedding + ?Sized,
    {
        let (q, jq) = forward_difference(warp, u, self.params.step)?;
        let (p, jp) = forward_difference(template, u, self.params.step)?;
        let image_point = Point2::new(q[0], q[1]);

        Ok(
            match local_scale(&jp, &jq, image_point, self.params.stability_threshold) {
                Ok(scale) => Ok(IsometricSample {
                    index,
                    parameter: Point2::new(u[0], u[1]),
                    template_point: p,
                    image_point,
                    scale,
                }),
                Err(reason) => Err(PointDegeneracy { index, reason }),
            },
        )
    }

    /// Recover the isometric embedding from `warp` (parameter → image, in
    /// normalized camera coordinates) and `template` (parameter → template
    /// space), using `control_points` (`n × 2`) as the parameter samples.
    ///
    /// Degenerate control points are skipped and reported; fewer than three
    /// usable points fail with `SingularSystem` in the isometric fit stage.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(points = control_points.len()))
    )]
    pub fn solve<W, T>(
        &self,
        warp: &W,
        template: T,
        control_points: &PointSet,
    ) -> Result<IsometricEmbedding<T>, SftError>
    where
        W: Embedding + ?Sized,
        T: Embedding,
    {
        control_points.ensure_dim("isometric control points", 2)?;
        check_dims("warp input", warp.input_dim(), 2)?;
        check_dims("warp output", warp.output_dim(), 2)?;
        check_dims("template input", template.input_dim(), 2)?;
        check_dims("template output", template.output_dim(), 3)?;
        let step = self.params.step;
        if !(step.is_finite() && step > 0.0) {
            return Err(SftError::InvalidParameter {
                name: "step",
                value: step,
            });
        }

        let mut samples = Vec::new();
        let mut skipped = Vec::new();
        for (index, u) in control_points.iter().enumerate() {
            match self.analyse_point(warp, &template, index, u.as_slice())? {
                Ok(sample) => samples.push(sample),
                Err(degenerate) => {
                    debug!("control point {index} skipped: {:?}", degenerate.reason);
                    skipped.push(degenerate);
                }
            }
        }

        let needed = control_points.dim() + 1;
        if samples.len() < needed {
            debug!(
                "only {} of {} control points usable, need {needed}",
                samples.len(),
                control_points.len()
            );
            return Err(SftError::SingularSystem {
                stage: SolveStage::IsometricFit,
            });
        }

        let source_rows: Vec<Vec<f64>> = samples
            .iter()
            .map(|s| s.template_point.iter().copied().collect())
            .collect();
        let target_rows: Vec<Vec<f64>> = samples
            .iter()
            .map(|s| s.surface_point().to_vec())
            .collect();
        let source = PointSet::from_vec_rows(3, &source_rows)?;
        let target = PointSet::from_vec_rows(3, &target_rows)?;

        let surface = fit_surface_warp(&source, &target, self.params.tps_regularization)
            .map_err(|e| e.in_stage(SolveStage::IsometricFit))?;

        info!(
            "isometric solve: {} control points used, {} skipped",
            samples.len(),
            skipped.len()
        );

        Ok(IsometricEmbedding {
            embedding: Composed::new(template, surface)?,
            samples,
            skipped,
        })
    }
}

/// Convenience wrapper around [`IsometricSolver::solve`] with default tuning.
pub fn solve_isometric<W, T>(
    warp: &W,
    template: T,
    control_points: &PointSet,
) -> Result<IsometricEmbedding<T>, SftError>
where
    W: Embedding + ?Sized,
    T: Embedding,
{
    IsometricSolver::default().solve(warp, template, control_points)
}

/// Template points onto 3D surface points. The template may be flat, so the
/// fit runs in the affine hull of its points, which must still span the 2D
/// parameter domain.
fn fit_surface_warp(
    source: &PointSet,
    target: &PointSet,
    regularization: f64,
) -> Result<RadialBasisWarp, SftError> {
    let params = RbfParams {
        regularization,
        reduce_flat_sources: true,
        min_rank: 2,
    };
    RadialBasisWarp::fit_with(source, target, &params)
}

fn check_dims(context: &'static str, got: usize, expected: usize) -> Result<(), SftError> {
    if got != expected {
        return Err(SftError::DimensionMismatch {
            context,
            expected,
            got,
        });
    }
    Ok(())
}
