//! Geometric outlier rejection.
//!
//! Every match is described by how its two keypoints differ: position
//! offset, size difference and the angle difference as `(sin, cos)`. Correct
//! matches under a smooth deformation agree on these and gather in tight
//! clusters; a Dirichlet-process mixture with one component per match finds
//! those clusters, and matches whose component is too spread out are dropped.

use crate::keypoint::matched_pair;
use crate::mixture::{GaussianMixture, MixtureParams};
use crate::{KeypointError, Keypoint, Match};
use log::debug;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Columns of the per-match feature vector.
pub const FEATURE_DIM: usize = 5;

/// How a match picks the mixture component it is judged by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentAssociation {
    /// The component with the highest posterior responsibility for the match.
    #[default]
    MostResponsible,
    /// Component `i` for match `i`.
    ByIndex,
}

/// Tuning of [`reject_outliers`].
///
/// The default judges each match by its most responsible component.
/// [`ComponentAssociation::ByIndex`] gives the classic GOR behaviour, which
/// zips the fitted covariances with the matches in order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierRejectionParams {
    /// Matches whose component covariance determinant is below this are kept.
    pub determinant_threshold: f64,
    pub association: ComponentAssociation,
    pub mixture: MixtureParams,
}

impl Default for OutlierRejectionParams {
    fn default() -> Self {
        Self {
            determinant_threshold: 1e5,
            association: ComponentAssociation::MostResponsible,
            mixture: MixtureParams::default(),
        }
    }
}

/// Outcome of [`reject_outliers`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutlierRejection {
    /// Kept matches, in input order.
    pub inliers: Vec<Match>,
    /// Per input match.
    pub mask: Vec<bool>,
    /// Determinant of each match's component covariance.
    pub determinants: Vec<f64>,
    /// Component each match was judged by.
    pub components: Vec<usize>,
}

/// `n × 5` matrix of `template − image` differences
/// `[dx, dy, dsize, sin(dθ), cos(dθ)]`, angles in degrees on input.
pub fn match_features(
    template: &[Keypoint],
    image: &[Keypoint],
    matches: &[Match],
) -> Result<DMatrix<f64>, KeypointError> {
    let mut f = DMatrix::zeros(matches.len(), FEATURE_DIM);
    for (i, m) in matches.iter().enumerate() {
        let (t, d) = matched_pair(template, image, m)?;
        let dang = ((t.angle - d.angle) as f64).to_radians();
        f[(i, 0)] = (t.position.x - d.position.x) as f64;
        f[(i, 1)] = (t.position.y - d.position.y) as f64;
        f[(i, 2)] = (t.size - d.size) as f64;
        f[(i, 3)] = dang.sin();
        f[(i, 4)] = dang.cos();
    }
    Ok(f)
}

/// Drop matches that do not belong to a tight cluster of consistent
/// keypoint differences.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(matches = matches.len()))
)]
pub fn reject_outliers(
    template: &[Keypoint],
    image: &[Keypoint],
    matches: &[Match],
    params: &OutlierRejectionParams,
) -> Result<OutlierRejection, KeypointError> {
    let features = match_features(template, image, matches)?;
    if matches.is_empty() {
        return Ok(OutlierRejection::default());
    }

    let gmm = GaussianMixture::fit(&features, matches.len(), &params.mixture)?;
    let components = match params.association {
        ComponentAssociation::MostResponsible => gmm.labels(),
        ComponentAssociation::ByIndex => (0..matches.len()).collect(),
    };
    let determinants: Vec<f64> = components
        .iter()
        .map(|&c| gmm.covariances()[c].determinant())
        .collect();
    let mask: Vec<bool> = determinants
        .iter()
        .map(|&det| det < params.determinant_threshold)
        .collect();
    let inliers = matches
        .iter()
        .zip(&mask)
        .filter_map(|(m, &keep)| keep.then_some(*m))
        .collect::<Vec<_>>();

    debug!(
        "outlier rejection kept {} of {} matches ({} mixture iterations, converged: {})",
        inliers.len(),
        matches.len(),
        gmm.iterations(),
        gmm.converged()
    );
    Ok(OutlierRejection {
        inliers,
        mask,
        determinants,
        components,
    })
}
