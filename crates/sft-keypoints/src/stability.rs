//! Keypoint stability under random viewpoint changes.
//!
//! Each attempt renders the image under a random 3D rotation, re-detects
//! features, matches them back with the ratio test and fits a RANSAC
//! homography. Keypoints whose match is a homography inlier score a hit.

use crate::matching::{match_ratio_test, RatioTestParams};
use crate::{
    Descriptors, FeatureExtractor, HomographyEstimator, KeypointError, Keypoint, KnnMatcher,
};
use log::{debug, info};
use nalgebra::{Matrix3, Matrix3x4, Matrix4, Matrix4x3, Point2};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use sft_core::{warp_perspective_gray, GrayImage, GrayImageView, Homography};
use std::f64::consts::PI;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Views whose canvas exceeds this multiple of the source area are skipped;
/// they come from planes seen nearly edge-on.
const MAX_CANVAS_GROWTH: usize = 16;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityParams {
    pub num_attempts: usize,
    /// A keypoint is selected when its hit count exceeds this.
    pub score_threshold: u32,
    /// Attempts with fewer ratio-test matches score nothing.
    pub min_match_count: usize,
    /// RANSAC inlier threshold in pixels.
    pub ransac_threshold: f64,
    /// Standard deviation of the rotation angles, in units of π.
    pub angle_sigma: f64,
    pub ratio: f32,
}

impl Default for StabilityParams {
    fn default() -> Self {
        Self {
            num_attempts: 10,
            score_threshold: 1,
            min_match_count: 10,
            ransac_threshold: 5.0,
            angle_sigma: 1.0 / 3.0,
            ratio: 0.75,
        }
    }
}

/// A random viewpoint change of a `width × height` image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RandomPerspective {
    /// Maps source pixels into the output canvas.
    pub homography: Homography,
    pub width: usize,
    pub height: usize,
    /// Rotation about x, y and z, radians.
    pub angles: [f64; 3],
}

/// Homography of a plane rotated by `angles` (about x, y, z) in front of a
/// pinhole camera, translated so the rotated image starts at the origin.
///
/// The camera sits at distance `f = d / |2 sin γ|` (`d` the image diagonal,
/// `γ` the z angle), or `d` when `sin γ = 0`.
pub fn perspective_from_angles(width: usize, height: usize, angles: [f64; 3]) -> RandomPerspective {
    let (w, h) = (width as f64, height as f64);
    let [theta, phi, gamma] = angles;

    let d = w.hypot(h);
    let sg = gamma.sin();
    let f = if sg != 0.0 { d / (2.0 * sg).abs() } else { d };

    // 2D -> 3D, centered on the image.
    #[rustfmt::skip]
    let a1 = Matrix4x3::new(
        1.0, 0.0, -w / 2.0,
        0.0, 1.0, -h / 2.0,
        0.0, 0.0, 1.0,
        0.0, 0.0, 1.0,
    );
    let (st, ct) = theta.sin_cos();
    #[rustfmt::skip]
    let rx = Matrix4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0, ct, -st, 0.0,
        0.0, st, ct, 0.0,
        0.0, 0.0, 0.0, 1.0,
    );
    let (sp, cp) = phi.sin_cos();
    #[rustfmt::skip]
    let ry = Matrix4::new(
        cp, 0.0, -sp, 0.0,
        0.0, 1.0, 0.0, 0.0,
        sp, 0.0, cp, 0.0,
        0.0, 0.0, 0.0, 1.0,
    );
    let cg = gamma.cos();
    #[rustfmt::skip]
    let rz = Matrix4::new(
        cg, -sg, 0.0, 0.0,
        sg, cg, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    );
    #[rustfmt::skip]
    let t = Matrix4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, f,
        0.0, 0.0, 0.0, 1.0,
    );
    // 3D -> 2D
    #[rustfmt::skip]
    let a2 = Matrix3x4::new(
        f, 0.0, 0.0, 0.0,
        0.0, f, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
    );

    let m: Matrix3<f64> = a2 * t * rx * ry * rz * a1;
    let projected = Homography::new(m);
    let (lo, hi) = projected.map_bounds(w, h);

    let size = |span: f64| {
        if span.is_finite() {
            span.round().max(1.0) as usize
        } else {
            1
        }
    };
    RandomPerspective {
        homography: Homography::translation(-lo.x, -lo.y) * projected,
        width: size(hi.x - lo.x),
        height: size(hi.y - lo.y),
        angles,
    }
}

/// Draw rotation angles from `N(0, (sigma·π)²)` and build the view change.
pub fn random_perspective<R: Rng + ?Sized>(
    width: usize,
    height: usize,
    rng: &mut R,
    angle_sigma: f64,
) -> RandomPerspective {
    let mut draw = || rng.sample::<f64, _>(StandardNormal) * angle_sigma * PI;
    let angles = [draw(), draw(), draw()];
    perspective_from_angles(width, height, angles)
}

/// Render `image` under `view`.
pub fn render_perspective(image: &GrayImageView<'_>, view: &RandomPerspective) -> Option<GrayImage> {
    let inv = view.homography.inverse()?;
    Some(warp_perspective_gray(image, inv, view.width, view.height))
}

/// Hit counts and the resulting selection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeypointSelection {
    pub scores: Vec<u32>,
    pub mask: Vec<bool>,
}

impl KeypointSelection {
    pub fn selected(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
    }
}

/// Stability scoring over injected feature providers.
pub struct StabilityScorer<'a, F: ?Sized, M: ?Sized, H: ?Sized> {
    pub extractor: &'a F,
    pub matcher: &'a M,
    pub estimator: &'a H,
    pub params: StabilityParams,
}

impl<'a, F, M, H> StabilityScorer<'a, F, M, H>
where
    F: FeatureExtractor + ?Sized,
    M: KnnMatcher + ?Sized,
    H: HomographyEstimator + ?Sized,
{
    pub fn new(extractor: &'a F, matcher: &'a M, estimator: &'a H, params: StabilityParams) -> Self {
        Self {
            extractor,
            matcher,
            estimator,
            params,
        }
    }

    /// One attempt: `1` for every keypoint that survived, `0` elsewhere.
    pub fn score_keypoints<R: Rng + ?Sized>(
        &self,
        image: &GrayImageView<'_>,
        keypoints: &[Keypoint],
        descriptors: &Descriptors,
        rng: &mut R,
    ) -> Result<Vec<u32>, KeypointError> {
        if keypoints.len() != descriptors.len() {
            return Err(KeypointError::DescriptorCount {
                keypoints: keypoints.len(),
                descriptors: descriptors.len(),
            });
        }
        let mut score = vec![0u32; keypoints.len()];

        let view = random_perspective(image.width, image.height, rng, self.params.angle_sigma);
        let area = (image.width * image.height).max(1);
        if view.width.saturating_mul(view.height) > MAX_CANVAS_GROWTH * area {
            debug!("random view canvas {}x{} too large, attempt skipped", view.width, view.height);
            return Ok(score);
        }
        let Some(rendered) = render_perspective(image, &view) else {
            debug!("random view not invertible, attempt skipped");
            return Ok(score);
        };
        let sample = self.extractor.detect_and_compute(&rendered.view())?;

        let ratio = RatioTestParams {
            k: 2,
            ratio: self.params.ratio,
        };
        let matches = match_ratio_test(self.matcher, descriptors, &sample.descriptors, &ratio)?;
        if matches.len() < self.params.min_match_count {
            debug!(
                "only {} matches (< {}), attempt scores nothing",
                matches.len(),
                self.params.min_match_count
            );
            return Ok(score);
        }

        let mut src = Vec::with_capacity(matches.len());
        let mut dst = Vec::with_capacity(matches.len());
        for m in &matches {
            let (a, b) = crate::keypoint::matched_pair(keypoints, &sample.keypoints, m)?;
            src.push(a.position);
            dst.push(b.position);
        }

        let Some((_, inliers)) =
            self.estimator
                .find_homography(&src, &dst, self.params.ransac_threshold)
        else {
            debug!("no homography consensus, attempt scores nothing");
            return Ok(score);
        };
        for (m, inlier) in matches.iter().zip(inliers) {
            if inlier {
                score[m.query] = 1;
            }
        }
        Ok(score)
    }

    /// Accumulate hits over `num_attempts` attempts and keep keypoints whose
    /// count exceeds the threshold.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(keypoints = keypoints.len()))
    )]
    pub fn select_best_keypoints<R: Rng + ?Sized>(
        &self,
        image: &GrayImageView<'_>,
        keypoints: &[Keypoint],
        descriptors: &Descriptors,
        rng: &mut R,
    ) -> Result<KeypointSelection, KeypointError> {
        let mut scores = vec![0u32; keypoints.len()];
        for _ in 0..self.params.num_attempts {
            let attempt = self.score_keypoints(image, keypoints, descriptors, rng)?;
            for (s, a) in scores.iter_mut().zip(attempt) {
                *s += a;
            }
        }
        let mask: Vec<bool> = scores
            .iter()
            .map(|&s| s > self.params.score_threshold)
            .collect();
        info!(
            "stability selection kept {} of {} keypoints",
            mask.iter().filter(|&&m| m).count(),
            keypoints.len()
        );
        Ok(KeypointSelection { scores, mask })
    }

    /// Detect features on `image` and keep the stable ones.
    pub fn detect_stable<R: Rng + ?Sized>(
        &self,
        image: &GrayImageView<'_>,
        rng: &mut R,
    ) -> Result<(crate::Features, KeypointSelection), KeypointError> {
        let features = self.extractor.detect_and_compute(image)?;
        let selection =
            self.select_best_keypoints(image, &features.keypoints, &features.descriptors, rng)?;
        Ok((features.filter(&selection.mask), selection))
    }
}

/// Where `p` lands in the rendered view.
pub fn project(view: &RandomPerspective, p: Point2<f32>) -> Point2<f32> {
    view.homography.apply(p)
}
