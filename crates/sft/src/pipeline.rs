//! End-to-end shape-from-template over injected feature providers.
//!
//! ```text
//! template image ─┬─ features ─ (stability selection) ─┐
//!                 │                                    ├─ ratio test ─ outlier rejection ─┐
//! target image ───┴─ features ─────────────────────────┘                                  │
//!                                                       correspondence warp ─ IsoPSfT ◄───┘
//! ```

use log::{debug, info};
use nalgebra::Point2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sft_core::{GrayImageView, IdentityEmbedding, PointSet, RadialBasisWarp, SftError};
use sft_isometric::{IsometricEmbedding, IsometricParams, IsometricSolver};
use sft_keypoints::{
    match_ratio_test, reject_outliers, FeatureExtractor, Features, HomographyEstimator,
    KeypointError, KeypointSelection, KnnMatcher, Match, OutlierRejection,
    OutlierRejectionParams, RatioTestParams, StabilityParams, StabilityScorer, TpsWarp,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Fewest correspondences an isometric reconstruction can be fitted from.
pub const MIN_CORRESPONDENCES: usize = 3;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("{stage}: {got} matches, need at least {needed}")]
    NotEnoughMatches {
        stage: &'static str,
        got: usize,
        needed: usize,
    },

    #[error(transparent)]
    Core(#[from] SftError),

    #[error(transparent)]
    Keypoints(#[from] KeypointError),
}

/// Pinhole intrinsics used to turn image pixels into normalized camera
/// coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self {
            fx: 1.0,
            fy: 1.0,
            cx: 0.0,
            cy: 0.0,
        }
    }
}

impl CameraIntrinsics {
    pub fn normalize(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// Keep only template keypoints that survive random viewpoint changes.
    pub stability: Option<StabilityParams>,
    pub matching: RatioTestParams,
    /// `None` skips geometric outlier rejection.
    pub outlier_rejection: Option<OutlierRejectionParams>,
    /// Template pixels to parameter units.
    pub template_scale: f64,
    pub camera: CameraIntrinsics,
    /// Regularization of the parameter-to-image warp.
    pub warp_regularization: f64,
    pub isometric: IsometricParams,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            stability: None,
            matching: RatioTestParams::default(),
            outlier_rejection: Some(OutlierRejectionParams::default()),
            template_scale: 1.0,
            camera: CameraIntrinsics::default(),
            warp_regularization: 0.0,
            isometric: IsometricParams::default(),
        }
    }
}

/// Everything one reconstruction produced.
#[derive(Debug)]
pub struct Reconstruction {
    pub template_features: Features,
    pub image_features: Features,
    /// Stability scores of the original template features, when selection ran.
    pub selection: Option<KeypointSelection>,
    /// Ratio-test matches, template → image.
    pub matches: Vec<Match>,
    pub outliers: Option<OutlierRejection>,
    /// Template pixels → image pixels.
    pub image_warp: TpsWarp,
    /// Parameter → normalized image coordinates.
    pub parameter_warp: RadialBasisWarp,
    pub surface: IsometricEmbedding<IdentityEmbedding>,
}

/// The pipeline with its feature providers.
pub struct ShapeFromTemplate<'a, F: ?Sized, M: ?Sized, H: ?Sized> {
    extractor: &'a F,
    matcher: &'a M,
    estimator: &'a H,
    params: PipelineParams,
}

impl<'a, F, M, H> ShapeFromTemplate<'a, F, M, H>
where
    F: FeatureExtractor + ?Sized,
    M: KnnMatcher + ?Sized,
    H: HomographyEstimator + ?Sized,
{
    pub fn new(extractor: &'a F, matcher: &'a M, estimator: &'a H, params: PipelineParams) -> Self {
        Self {
            extractor,
            matcher,
            estimator,
            params,
        }
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    /// Detect features on both images and reconstruct.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip_all,
            fields(template = ?(template.width, template.height), image = ?(image.width, image.height))
        )
    )]
    pub fn reconstruct<R: Rng + ?Sized>(
        &self,
        template: &GrayImageView<'_>,
        image: &GrayImageView<'_>,
        rng: &mut R,
    ) -> Result<Reconstruction, PipelineError> {
        let (template_features, selection) = match &self.params.stability {
            Some(stability) => {
                let scorer = StabilityScorer::new(
                    self.extractor,
                    self.matcher,
                    self.estimator,
                    stability.clone(),
                );
                let (stable, selection) = scorer.detect_stable(template, rng)?;
                (stable, Some(selection))
            }
            None => (self.extractor.detect_and_compute(template)?, None),
        };
        let image_features = self.extractor.detect_and_compute(image)?;
        let mut out = self.reconstruct_from_features(template_features, image_features, None)?;
        out.selection = selection;
        Ok(out)
    }

    /// Reconstruct from already extracted features. `cluster_labels` groups
    /// template keypoints; each group contributes one correspondence.
    pub fn reconstruct_from_features(
        &self,
        template_features: Features,
        image_features: Features,
        cluster_labels: Option<&[usize]>,
    ) -> Result<Reconstruction, PipelineError> {
        let matches = match_ratio_test(
            self.matcher,
            &template_features.descriptors,
            &image_features.descriptors,
            &self.params.matching,
        )?;
        ensure_enough("ratio test", matches.len())?;

        let (kept, outliers) = match &self.params.outlier_rejection {
            Some(gor) => {
                let r = reject_outliers(
                    &template_features.keypoints,
                    &image_features.keypoints,
                    &matches,
                    gor,
                )?;
                (r.inliers.clone(), Some(r))
            }
            None => (matches.clone(), None),
        };
        ensure_enough("outlier rejection", kept.len())?;

        let image_warp = match cluster_labels {
            Some(labels) => TpsWarp::fit(
                &template_features.keypoints,
                &image_features.keypoints,
                &kept,
                labels,
                self.params.warp_regularization,
            )?,
            None => TpsWarp::from_matches(
                &template_features.keypoints,
                &image_features.keypoints,
                &kept,
                self.params.warp_regularization,
            )?,
        };
        ensure_enough("correspondence clustering", image_warp.matches().len())?;

        let (parameters, normalized): (Vec<_>, Vec<_>) = image_warp
            .matches()
            .iter()
            .map(|m| {
                let t = template_features.keypoints[m.query].position;
                let d = image_features.keypoints[m.train].position;
                (
                    Point2::new(t.x as f64, t.y as f64) * self.params.template_scale,
                    self.params
                        .camera
                        .normalize(Point2::new(d.x as f64, d.y as f64)),
                )
            })
            .unzip();
        let (parameter_warp, surface) = reconstruct_surface(
            &PointSet::from_points2(&parameters),
            &PointSet::from_points2(&normalized),
            self.params.warp_regularization,
            &self.params.isometric,
        )?;

        info!(
            "reconstructed from {} correspondences ({} matches, {} skipped control points)",
            image_warp.matches().len(),
            matches.len(),
            surface.skipped().len()
        );
        Ok(Reconstruction {
            template_features,
            image_features,
            selection: None,
            matches,
            outliers,
            image_warp,
            parameter_warp,
            surface,
        })
    }
}

/// Fit the parameter-to-image warp through `parameters` → `image_points`
/// (normalized camera coordinates) and solve IsoPSfT with a flat template
/// at the same control points.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(points = parameters.len()))
)]
pub fn reconstruct_surface(
    parameters: &PointSet,
    image_points: &PointSet,
    regularization: f64,
    params: &IsometricParams,
) -> Result<(RadialBasisWarp, IsometricEmbedding<IdentityEmbedding>), PipelineError> {
    ensure_enough("correspondences", parameters.len())?;
    let warp = RadialBasisWarp::fit(parameters, image_points, regularization)?;
    debug!("parameter warp fitted through {} points", parameters.len());
    let surface =
        IsometricSolver::new(params.clone()).solve(&warp, IdentityEmbedding::default(), parameters)?;
    Ok((warp, surface))
}

fn ensure_enough(stage: &'static str, got: usize) -> Result<(), PipelineError> {
    if got < MIN_CORRESPONDENCES {
        return Err(PipelineError::NotEnoughMatches {
            stage,
            got,
            needed: MIN_CORRESPONDENCES,
        });
    }
    Ok(())
}
