//! Geometric building blocks for shape-from-template reconstruction.
//!
//! Point sets and the [`Embedding`] abstraction, the thin-plate-spline warp
//! solver, planar homographies with a generic RANSAC loop, and a small
//! grayscale image type for resampling. Nothing here depends on a feature
//! detector or an image codec.

mod embedding;
mod error;
mod homography;
mod image;
mod logger;
mod points;
pub mod ransac;
mod rbf;

pub use embedding::{forward_difference, Composed, Embedding, ForwardDifference, IdentityEmbedding};
pub use error::{SftError, SolveStage};
pub use homography::{
    estimate_homography, find_homography_ransac, transfer_error, warp_perspective_gray,
    Homography, HomographyModel,
};
pub use image::{sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView};
pub use points::PointSet;
pub use ransac::{ransac, Estimator, RansacOptions, RansacResult};
pub use rbf::{pairwise_radial_basis, radial_basis, RadialBasisWarp, RbfParams};

pub use logger::{init_logging, level_for_verbosity};
