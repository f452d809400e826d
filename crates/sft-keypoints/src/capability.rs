//! Seams to the feature providers the pipeline consumes but does not own.
//!
//! Implementations are constructed by the caller and passed in explicitly;
//! nothing here keeps global detector or matcher state.

use crate::{Descriptors, Features, KeypointError};
use nalgebra::Point2;
use sft_core::{find_homography_ransac, GrayImageView, Homography, RansacOptions};

/// Detects keypoints and computes their descriptors.
pub trait FeatureExtractor {
    fn detect_and_compute(&self, image: &GrayImageView<'_>) -> Result<Features, KeypointError>;
}

/// One neighbor returned by a k-NN query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    /// Index into the train descriptors.
    pub index: usize,
    pub distance: f32,
}

/// k-nearest-neighbor search between descriptor sets.
pub trait KnnMatcher {
    /// Up to `k` neighbors in `train` for every descriptor of `query`,
    /// ascending by distance. Lists may be shorter than `k`.
    fn knn_match(
        &self,
        query: &Descriptors,
        train: &Descriptors,
        k: usize,
    ) -> Result<Vec<Vec<Neighbor>>, KeypointError>;
}

/// Robust homography fitting between point correspondences.
pub trait HomographyEstimator {
    /// `H` with `dst ~ H·src` and the per-correspondence inlier mask, or
    /// `None` when no model was found. `threshold` is the inlier transfer
    /// error in pixels.
    fn find_homography(
        &self,
        src: &[Point2<f32>],
        dst: &[Point2<f32>],
        threshold: f64,
    ) -> Option<(Homography, Vec<bool>)>;
}

/// DLT homography inside the seeded RANSAC loop of `sft-core`.
#[derive(Clone, Debug, Default)]
pub struct RansacHomography {
    pub options: RansacOptions,
}

impl RansacHomography {
    pub fn new(options: RansacOptions) -> Self {
        Self { options }
    }
}

impl HomographyEstimator for RansacHomography {
    fn find_homography(
        &self,
        src: &[Point2<f32>],
        dst: &[Point2<f32>],
        threshold: f64,
    ) -> Option<(Homography, Vec<bool>)> {
        let opts = RansacOptions {
            thresh: threshold,
            ..self.options.clone()
        };
        find_homography_ransac(src, dst, &opts)
    }
}

impl<T: FeatureExtractor + ?Sized> FeatureExtractor for &T {
    fn detect_and_compute(&self, image: &GrayImageView<'_>) -> Result<Features, KeypointError> {
        (**self).detect_and_compute(image)
    }
}

impl<T: KnnMatcher + ?Sized> KnnMatcher for &T {
    fn knn_match(
        &self,
        query: &Descriptors,
        train: &Descriptors,
        k: usize,
    ) -> Result<Vec<Vec<Neighbor>>, KeypointError> {
        (**self).knn_match(query, train, k)
    }
}

impl<T: HomographyEstimator + ?Sized> HomographyEstimator for &T {
    fn find_homography(
        &self,
        src: &[Point2<f32>],
        dst: &[Point2<f32>],
        threshold: f64,
    ) -> Option<(Homography, Vec<bool>)> {
        (**self).find_homography(src, dst, threshold)
    }
}
