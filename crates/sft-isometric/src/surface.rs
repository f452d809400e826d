//! Grid-sampled 3D surfaces for display and comparison.

use nalgebra::{Point2, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use sft_core::{Embedding, PointSet, SftError};

/// Axis-aligned rectangle in the parameter domain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamDomain {
    pub min: Point2<f64>,
    pub max: Point2<f64>,
}

impl ParamDomain {
    pub fn new(min: Point2<f64>, max: Point2<f64>) -> Self {
        Self { min, max }
    }

    /// Tight bounds of a 2D point set.
    pub fn bounding(points: &PointSet) -> Result<Self, SftError> {
        let pts = points.to_points2()?;
        let first = pts.first().ok_or(SftError::EmptyInput {
            context: "parameter domain",
        })?;
        let mut d = Self::new(*first, *first);
        for p in &pts {
            d.min.x = d.min.x.min(p.x);
            d.min.y = d.min.y.min(p.y);
            d.max.x = d.max.x.max(p.x);
            d.max.y = d.max.y.max(p.y);
        }
        Ok(d)
    }

    /// `nx × ny` evenly spaced parameter points, row-major (x fastest).
    pub fn grid(&self, nx: usize, ny: usize) -> Vec<Point2<f64>> {
        let lerp = |lo: f64, hi: f64, i: usize, n: usize| {
            if n < 2 {
                lo
            } else {
                lo + (hi - lo) * i as f64 / (n - 1) as f64
            }
        };
        let mut out = Vec::with_capacity(nx * ny);
        for j in 0..ny {
            for i in 0..nx {
                out.push(Point2::new(
                    lerp(self.min.x, self.max.x, i, nx),
                    lerp(self.min.y, self.max.y, j, ny),
                ));
            }
        }
        out
    }
}

/// Positions and unit normals of an embedding evaluated on a parameter grid.
///
/// Normals are `∂v × ∂u` with unit forward differences in the parameter
/// domain; a vanishing cross product leaves a zero normal.
#[derive(Clone, Debug, PartialEq)]
pub struct SampledSurface {
    domain: ParamDomain,
    nx: usize,
    ny: usize,
    positions: Vec<Point3<f64>>,
    normals: Vec<Vector3<f64>>,
}

impl SampledSurface {
    pub fn sample<E: Embedding + ?Sized>(
        embedding: &E,
        domain: ParamDomain,
        nx: usize,
        ny: usize,
    ) -> Result<Self, SftError> {
        if nx == 0 || ny == 0 {
            return Err(SftError::EmptyInput {
                context: "surface grid",
            });
        }
        if embedding.output_dim() != 3 {
            return Err(SftError::DimensionMismatch {
                context: "sampled surface embedding",
                expected: 3,
                got: embedding.output_dim(),
            });
        }

        let grid = domain.grid(nx, ny);
        let shifted_u: Vec<Point2<f64>> = grid.iter().map(|p| p + Vector2::x()).collect();
        let shifted_v: Vec<Point2<f64>> = grid.iter().map(|p| p + Vector2::y()).collect();

        // One batched evaluation for the grid and both shifted copies.
        let all = PointSet::concat(&[
            PointSet::from_points2(&grid),
            PointSet::from_points2(&shifted_u),
            PointSet::from_points2(&shifted_v),
        ])?;
        let mapped = embedding.apply(&all)?.to_points3()?;
        let n = grid.len();

        let positions = mapped[..n].to_vec();
        let normals = (0..n)
            .map(|i| {
                let du = mapped[n + i] - positions[i];
                let dv = mapped[2 * n + i] - positions[i];
                dv.cross(&du).try_normalize(1e-12).unwrap_or_else(Vector3::zeros)
            })
            .collect();

        Ok(Self {
            domain,
            nx,
            ny,
            positions,
            normals,
        })
    }

    /// Evaluate `embedding` again over the same domain at a new resolution.
    pub fn resample<E: Embedding + ?Sized>(
        &self,
        embedding: &E,
        nx: usize,
        ny: usize,
    ) -> Result<Self, SftError> {
        Self::sample(embedding, self.domain, nx, ny)
    }

    pub fn domain(&self) -> ParamDomain {
        self.domain
    }

    /// `(nx, ny)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vector3<f64>] {
        &self.normals
    }

    /// Vertex at column `i`, row `j`.
    pub fn vertex(&self, i: usize, j: usize) -> Option<(Point3<f64>, Vector3<f64>)> {
        if i >= self.nx || j >= self.ny {
            return None;
        }
        let k = j * self.nx + i;
        Some((self.positions[k], self.normals[k]))
    }

    /// Axis-aligned `(min, max)` of the positions.
    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        let mut lo = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut hi = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in &self.positions {
            lo = lo.inf(p);
            hi = hi.sup(p);
        }
        (lo, hi)
    }

    /// Center of the bounding box.
    pub fn center(&self) -> Point3<f64> {
        let (lo, hi) = self.bounds();
        nalgebra::center(&lo, &hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sft_core::IdentityEmbedding;

    #[test]
    fn flat_template_has_constant_normals() {
        let domain = ParamDomain::new(Point2::new(0.0, 0.0), Point2::new(4.0, 2.0));
        let s = SampledSurface::sample(&IdentityEmbedding::new(3.0), domain, 5, 3).unwrap();

        assert_eq!(s.shape(), (5, 3));
        assert_eq!(s.positions().len(), 15);
        let (p, n) = s.vertex(4, 2).unwrap();
        assert_eq!(p, Point3::new(4.0, 2.0, 3.0));
        // ∂v × ∂u = ey × ex = -ez
        assert_relative_eq!(n, Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-12);
        assert!(s.vertex(5, 0).is_none());

        let (lo, hi) = s.bounds();
        assert_eq!(lo, Point3::new(0.0, 0.0, 3.0));
        assert_eq!(hi, Point3::new(4.0, 2.0, 3.0));
        assert_eq!(s.center(), Point3::new(2.0, 1.0, 3.0));
    }

    #[test]
    fn resample_keeps_domain() {
        let domain = ParamDomain::new(Point2::new(-1.0, -1.0), Point2::new(1.0, 1.0));
        let id = IdentityEmbedding::default();
        let coarse = SampledSurface::sample(&id, domain, 2, 2).unwrap();
        let fine = coarse.resample(&id, 9, 7).unwrap();
        assert_eq!(fine.domain(), domain);
        assert_eq!(fine.positions().len(), 63);
        assert_eq!(fine.bounds(), coarse.bounds());
    }

    #[test]
    fn planar_embedding_is_rejected() {
        struct Planar;
        impl Embedding for Planar {
            fn input_dim(&self) -> usize {
                2
            }
            fn output_dim(&self) -> usize {
                2
            }
            fn apply(&self, points: &PointSet) -> Result<PointSet, SftError> {
                Ok(points.clone())
            }
        }
        let domain = ParamDomain::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0));
        assert!(SampledSurface::sample(&Planar, domain, 3, 3).is_err());
    }
}
