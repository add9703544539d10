use crate::sampling::sample_bilinear_rgb;
use image::RgbImage;
use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::SQRT_2;

/// Planar projective transform, `p_dst ~ H * p_src`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
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

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    /// Scale so `h33 == 1`. `None` when that entry vanishes or anything is
    /// non-finite.
    fn normalized(h: Matrix3<f64>) -> Option<Self> {
        let s = h[(2, 2)];
        if s.abs() < 1e-12 || !h.iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Self::new(h / s))
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let v = self.h * Vector3::new(p.x as f64, p.y as f64, 1.0);
        Point2::new((v[0] / v[2]) as f32, (v[1] / v[2]) as f32)
    }

    /// Distance in pixels between `H * src` and `dst`; points sent to
    /// infinity report `f32::INFINITY`.
    #[inline]
    pub fn transfer_error(&self, src: Point2<f32>, dst: Point2<f32>) -> f32 {
        let v = self.h * Vector3::new(src.x as f64, src.y as f64, 1.0);
        if v[2].abs() < 1e-12 {
            return f32::INFINITY;
        }
        (v[0] / v[2] - dst.x as f64).hypot(v[1] / v[2] - dst.y as f64) as f32
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }
}

/// Map sending the unit square corners `(0,0) (1,0) (1,1) (0,1)` onto `q`
/// in order.
fn square_to_quad(q: &[Point2<f64>; 4]) -> Option<Matrix3<f64>> {
    let sx = q[0].x - q[1].x + q[2].x - q[3].x;
    let sy = q[0].y - q[1].y + q[2].y - q[3].y;
    let (dx1, dy1) = (q[1].x - q[2].x, q[1].y - q[2].y);
    let (dx2, dy2) = (q[3].x - q[2].x, q[3].y - q[2].y);
    let det = dx1 * dy2 - dx2 * dy1;
    if det.abs() < f64::EPSILON {
        return None;
    }
    let g = (sx * dy2 - dx2 * sy) / det;
    let h = (dx1 * sy - sx * dy1) / det;
    Some(Matrix3::new(
        q[1].x - q[0].x + g * q[1].x,
        q[3].x - q[0].x + h * q[3].x,
        q[0].x,
        q[1].y - q[0].y + g * q[1].y,
        q[3].y - q[0].y + h * q[3].y,
        q[0].y,
        g,
        h,
        1.0,
    ))
}

/// True when some three of the four points are (nearly) collinear.
fn has_collinear_triple(q: &[Point2<f64>; 4]) -> bool {
    let extent = q
        .iter()
        .flat_map(|a| q.iter().map(move |b| (a.x - b.x).abs().max((a.y - b.y).abs())))
        .fold(0.0_f64, f64::max);
    let tol = 1e-6 * extent * extent;
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES.iter().any(|&[a, b, c]| {
        let cross = (q[b].x - q[a].x) * (q[c].y - q[a].y) - (q[b].y - q[a].y) * (q[c].x - q[a].x);
        cross.abs() <= tol
    })
}

/// Exact `H` with `dst[i] ~ H * src[i]` from four correspondences, e.g. the
/// corners of a located board and the reference canvas.
///
/// Returns `None` when three points of either quad are collinear.
pub fn homography_from_4pt(src: &[Point2<f32>; 4], dst: &[Point2<f32>; 4]) -> Option<Homography> {
    let widen = |q: &[Point2<f32>; 4]| q.map(|p| Point2::new(p.x as f64, p.y as f64));
    let (src, dst) = (widen(src), widen(dst));
    if has_collinear_triple(&src) || has_collinear_triple(&dst) {
        return None;
    }
    let square_to_src = square_to_quad(&src)?.try_inverse()?;
    let square_to_dst = square_to_quad(&dst)?;
    Homography::normalized(square_to_dst * square_to_src)
}

/// Similarity moving the weighted centroid of `pts` to the origin with a
/// weighted mean distance of `sqrt(2)`.
fn conditioner(pts: impl Iterator<Item = (Point2<f32>, f64)> + Clone) -> Matrix3<f64> {
    let (mut total, mut cx, mut cy) = (0.0, 0.0, 0.0);
    for (p, w) in pts.clone() {
        total += w;
        cx += w * p.x as f64;
        cy += w * p.y as f64;
    }
    cx /= total;
    cy /= total;
    let spread = pts
        .map(|(p, w)| w * (p.x as f64 - cx).hypot(p.y as f64 - cy))
        .sum::<f64>()
        / total;
    let s = if spread > 1e-12 { SQRT_2 / spread } else { 1.0 };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

/// Weighted least-squares `H` with `dst[i] ~ H * src[i]` over `members`,
/// given as `(index, weight)` pairs into the two point slices.
///
/// Each member's two DLT equations are scaled by its weight, so a RANSAC
/// refit can pass only its consensus set and soften inliers near the
/// threshold. Needs four members with positive weight; out-of-range
/// indices or negative weights give `None`.
pub fn fit_homography(
    src: &[Point2<f32>],
    dst: &[Point2<f32>],
    members: &[(usize, f64)],
) -> Option<Homography> {
    if src.len() != dst.len()
        || members
            .iter()
            .any(|&(i, w)| i >= src.len() || !w.is_finite() || w < 0.0)
        || members.iter().filter(|(_, w)| *w > 0.0).count() < 4
    {
        return None;
    }

    let t_src = conditioner(members.iter().map(|&(i, w)| (src[i], w)));
    let t_dst = conditioner(members.iter().map(|&(i, w)| (dst[i], w)));

    // Accumulate A^T W A; its least eigenvector is the conditioned H.
    let mut normal = SMatrix::<f64, 9, 9>::zeros();
    for &(i, w) in members {
        let s = t_src * Vector3::new(src[i].x as f64, src[i].y as f64, 1.0);
        let d = t_dst * Vector3::new(dst[i].x as f64, dst[i].y as f64, 1.0);
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);
        let rx = SVector::<f64, 9>::from_column_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]);
        let ry = SVector::<f64, 9>::from_column_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]);
        normal += (rx * rx.transpose() + ry * ry.transpose()) * w;
    }

    let eigen = normal.symmetric_eigen();
    let (k, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eigen.eigenvectors.column(k);
    let conditioned = Matrix3::from_fn(|r, c| h[3 * r + c]);
    Homography::normalized(t_dst.try_inverse()? * conditioned * t_src)
}

/// Resample `src` into an `out_w × out_h` canvas.
///
/// `h_src_from_dst` maps output pixel coordinates back into `src`; pixels that
/// fall outside `src` are black.
pub fn warp_perspective_rgb(
    src: &RgbImage,
    h_src_from_dst: Homography,
    out_w: u32,
    out_h: u32,
) -> RgbImage {
    RgbImage::from_fn(out_w, out_h, |x, y| {
        let p = h_src_from_dst.apply(Point2::new(x as f32, y as f32));
        sample_bilinear_rgb(src, p.x, p.y)
    })
}
