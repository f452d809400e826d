//! Reliable template-to-image correspondences.
//!
//! Ratio-test descriptor matching, keypoint selection by stability under
//! random viewpoint changes, geometric outlier rejection with a
//! Dirichlet-process Gaussian mixture, and the thin-plate-spline warp fitted
//! through the surviving matches. Feature detection, k-NN search and robust
//! homography fitting come in through [`FeatureExtractor`], [`KnnMatcher`]
//! and [`HomographyEstimator`].

mod capability;
mod correspondence;
mod error;
mod gor;
mod keypoint;
mod matching;
pub mod mixture;
mod stability;

pub use capability::{
    FeatureExtractor, HomographyEstimator, KnnMatcher, Neighbor, RansacHomography,
};
pub use correspondence::{resolve_clusters, TpsWarp};
pub use error::KeypointError;
pub use gor::{
    match_features, reject_outliers, ComponentAssociation, OutlierRejection,
    OutlierRejectionParams, FEATURE_DIM,
};
pub use keypoint::{Descriptors, Features, Keypoint, Match};
pub use matching::{
    match_best, match_ratio_test, passes_ratio_test, BruteForceMatcher, KdTreeMatcher,
    RatioTestParams,
};
pub use mixture::{CovariancePrior, GaussianMixture, MixtureParams};
pub use stability::{
    perspective_from_angles, project, random_perspective, render_perspective, KeypointSelection,
    RandomPerspective, StabilityParams, StabilityScorer,
};
