//! Shape-from-template: recover the 3D shape of a deformed surface from one
//! image and a flat template of it.
//!
//! This crate ties the workspace together:
//! - re-exports of the building blocks ([`core`], [`isometric`], [`keypoints`]),
//! - [`ShapeFromTemplate`], the end-to-end pipeline over caller-provided
//!   feature extraction, k-NN matching and homography estimation,
//! - [`synthetic`] scenes with known ground truth,
//! - (feature `image`) adapters for `image::GrayImage` and depth-map export.
//!
//! ## Quickstart
//!
//! ```no_run
//! use rand::{rngs::StdRng, SeedableRng};
//! use sft::synthetic::{SceneParams, SyntheticScene};
//! use sft::{reconstruct_surface, Embedding, IsometricParams};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scene = SyntheticScene::generate(SceneParams::default(), &mut StdRng::seed_from_u64(1))?;
//! let (_, surface) = reconstruct_surface(
//!     &scene.control_parameters(),
//!     &scene.control_image_points(),
//!     0.0,
//!     &IsometricParams::default(),
//! )?;
//! let points = surface.apply(&scene.all_parameters())?;
//! println!("{} surface points", points.len());
//! # Ok(())
//! # }
//! ```

pub use sft_core as core;
pub use sft_isometric as isometric;
pub use sft_keypoints as keypoints;

pub use sft_core::{
    Composed, Embedding, GrayImage, GrayImageView, IdentityEmbedding, PointSet, RadialBasisWarp,
    SftError, SolveStage,
};
pub use sft_isometric::{
    solve_isometric, IsometricEmbedding, IsometricParams, IsometricSolver, ParamDomain,
    SampledSurface,
};
pub use sft_keypoints::{
    FeatureExtractor, Features, HomographyEstimator, Keypoint, KeypointError, KnnMatcher, Match,
};

mod pipeline;
pub mod synthetic;

#[cfg(feature = "image")]
pub mod io;

pub use pipeline::{
    reconstruct_surface, CameraIntrinsics, PipelineError, PipelineParams, Reconstruction,
    ShapeFromTemplate, MIN_CORRESPONDENCES,
};
