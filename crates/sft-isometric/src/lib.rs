//! Isometric shape-from-template.
//!
//! [`IsometricSolver`] upgrades a parameter-to-image warp into a 3D embedding
//! consistent with an isometric template; [`SampledSurface`] evaluates any 3D
//! embedding on a grid with per-vertex normals.

mod isometric;
mod surface;

pub use isometric::{
    local_scale, solve_isometric, DegeneracyReason, IsometricEmbedding, IsometricParams,
    IsometricSample, IsometricSolver, PointDegeneracy,
};
pub use surface::{ParamDomain, SampledSurface};
