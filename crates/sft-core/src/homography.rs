use crate::ransac::{ransac, Estimator, RansacOptions};
use crate::{sample_bilinear_u8, GrayImage, GrayImageView};
use nalgebra::{DMatrix, Matrix3, Point2, Vector3};
use std::ops::Mul;

/// Planar projective transform acting on homogeneous pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::new(Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0))
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        let mut out = [[0.0; 3]; 3];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.h[(r, c)];
            }
        }
        out
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let q = self.apply_f64(Point2::new(p.x as f64, p.y as f64));
        Point2::new(q.x as f32, q.y as f32)
    }

    #[inline]
    pub fn apply_f64(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// Scale so that `h[2,2] = 1`; `None` when that entry vanishes.
    pub fn normalized(&self) -> Option<Self> {
        let s = self.h[(2, 2)];
        if s.abs() < 1e-12 {
            return None;
        }
        Some(Self::new(self.h / s))
    }

    /// Axis-aligned bounds `(min, max)` of the image of a `width × height`
    /// rectangle anchored at the origin.
    pub fn map_bounds(&self, width: f64, height: f64) -> (Point2<f64>, Point2<f64>) {
        let corners = [
            Point2::new(0.0, 0.0),
            Point2::new(width, 0.0),
            Point2::new(0.0, height),
            Point2::new(width, height),
        ];
        let mut lo = Point2::new(f64::INFINITY, f64::INFINITY);
        let mut hi = Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for c in corners {
            let p = self.apply_f64(c);
            lo.x = lo.x.min(p.x);
            lo.y = lo.y.min(p.y);
            hi.x = hi.x.max(p.x);
            hi.y = hi.y.max(p.y);
        }
        (lo, hi)
    }
}

impl Mul for Homography {
    type Output = Homography;

    /// `(a * b).apply(p) == a.apply(b.apply(p))`.
    fn mul(self, rhs: Homography) -> Homography {
        Homography::new(self.h * rhs.h)
    }
}

/// Translate to the centroid and scale so the mean distance is `√2`.
fn normalize_points(pts: &[Point2<f32>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    let n = pts.len() as f64;
    let (mut cx, mut cy) = (0.0, 0.0);
    for p in pts {
        cx += p.x as f64;
        cy += p.y as f64;
    }
    cx /= n;
    cy /= n;

    let mean_dist = pts
        .iter()
        .map(|p| (p.x as f64 - cx).hypot(p.y as f64 - cy))
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);

    let out = pts
        .iter()
        .map(|p| Point2::new(s * (p.x as f64 - cx), s * (p.y as f64 - cy)))
        .collect();
    (out, t)
}

/// Estimate `H` such that `dst ~ H * src` by normalized DLT.
///
/// Needs at least four correspondences; `None` for mismatched lengths or a
/// degenerate configuration.
pub fn estimate_homography(src: &[Point2<f32>], dst: &[Point2<f32>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }

    let (s, ts) = normalize_points(src);
    let (d, td) = normalize_points(dst);

    // Pad to at least 9 rows so the thin SVD exposes the full right null space.
    let n = src.len();
    let mut a = DMatrix::<f64>::zeros((2 * n).max(9), 9);
    for k in 0..n {
        let (x, y) = (s[k].x, s[k].y);
        let (u, v) = (d[k].x, d[k].y);

        // [ -x -y -1   0  0  0   u*x u*y u ]
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        // [ 0  0  0  -x -y -1   v*x v*y v ]
        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let smallest = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)?;
    let h = v_t.row(smallest);
    let hn = Matrix3::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

    // H = Td^-1 * Hn * Ts
    let h_den = td.try_inverse()? * hn * ts;
    Homography::new(h_den).normalized()
}

/// Transfer error `‖H·src − dst‖` in destination pixels.
#[inline]
pub fn transfer_error(h: &Homography, src: Point2<f32>, dst: Point2<f32>) -> f64 {
    let p = h.apply_f64(Point2::new(src.x as f64, src.y as f64));
    let e = (p.x - dst.x as f64).hypot(p.y - dst.y as f64);
    if e.is_finite() {
        e
    } else {
        f64::INFINITY
    }
}

/// DLT homography plugged into the generic RANSAC loop.
pub struct HomographyModel;

impl Estimator for HomographyModel {
    type Datum = (Point2<f32>, Point2<f32>);
    type Model = Homography;

    const MIN_SAMPLES: usize = 4;

    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
        let (src, dst): (Vec<_>, Vec<_>) = sample_indices.iter().map(|&i| data[i]).unzip();
        estimate_homography(&src, &dst)
    }

    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
        transfer_error(model, datum.0, datum.1)
    }

    fn is_degenerate(data: &[Self::Datum], sample_indices: &[usize]) -> bool {
        // Three collinear source points make the minimal sample degenerate.
        let pts: Vec<Point2<f32>> = sample_indices.iter().map(|&i| data[i].0).collect();
        for i in 0..pts.len() {
            for j in (i + 1)..pts.len() {
                for k in (j + 1)..pts.len() {
                    let (a, b, c) = (pts[i], pts[j], pts[k]);
                    let cross = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
                    if cross.abs() < 1e-6 {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
        Self::fit(data, inliers)
    }
}

/// Robust homography from putative correspondences.
///
/// Returns the model with a per-correspondence inlier mask, or `None` when
/// no consensus was reached.
pub fn find_homography_ransac(
    src: &[Point2<f32>],
    dst: &[Point2<f32>],
    opts: &RansacOptions,
) -> Option<(Homography, Vec<bool>)> {
    if src.len() != dst.len() {
        return None;
    }
    let data: Vec<_> = src.iter().copied().zip(dst.iter().copied()).collect();
    let res = ransac::<HomographyModel>(&data, opts);
    let model = res.model?;
    let mut mask = vec![false; data.len()];
    for i in res.inliers {
        mask[i] = true;
    }
    Some((model, mask))
}

/// Resample `src` onto an `out_w × out_h` canvas.
///
/// `h_src_from_dst` maps output pixel centers back into the source image;
/// pixels landing outside the source are black.
pub fn warp_perspective_gray(
    src: &GrayImageView<'_>,
    h_src_from_dst: Homography,
    out_w: usize,
    out_h: usize,
) -> GrayImage {
    GrayImage::from_fn(out_w, out_h, |x, y| {
        let ps = h_src_from_dst.apply(Point2::new(x as f32, y as f32));
        if ps.x.is_finite() && ps.y.is_finite() {
            sample_bilinear_u8(src, ps.x, ps.y)
        } else {
            0
        }
    })
}
