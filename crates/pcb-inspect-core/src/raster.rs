//! Raster primitives shared by the detectors.
//!
//! Thin wrappers over `imageproc` with the parameter conventions used across
//! this workspace: binary images are `0`/`255`, contours are lists of integer
//! pixel positions in `nalgebra::Point2<i32>`.

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::geometry::approximate_polygon_dp;
use imageproc::point::Point;
use nalgebra::Point2;

/// Gaussian blur; `sigma <= 0` returns an unmodified copy.
pub fn gaussian_blur(gray: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 || !sigma.is_finite() {
        return gray.clone();
    }
    imageproc::filter::gaussian_blur_f32(gray, sigma)
}

/// Locally normalized, inverted binarization.
///
/// A pixel becomes foreground (`255`) when it is darker than the mean of its
/// `(2r+1)²` neighbourhood by more than `offset`.
pub fn adaptive_threshold_inv(gray: &GrayImage, block_radius: u32, offset: i16) -> GrayImage {
    let mean = imageproc::filter::box_filter(gray, block_radius, block_radius);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let p = gray.get_pixel(x, y)[0] as i16;
        let m = mean.get_pixel(x, y)[0] as i16;
        if p < m - offset {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Morphological closing with a `(2k+1)²` square element.
pub fn close(binary: &GrayImage, k: u8) -> GrayImage {
    imageproc::morphology::close(binary, Norm::LInf, k)
}

/// Morphological opening with a `(2k+1)²` square element.
pub fn open(binary: &GrayImage, k: u8) -> GrayImage {
    imageproc::morphology::open(binary, Norm::LInf, k)
}

pub fn dilate(binary: &GrayImage, k: u8) -> GrayImage {
    imageproc::morphology::dilate(binary, Norm::LInf, k)
}

pub fn canny(gray: &GrayImage, low: f32, high: f32) -> GrayImage {
    imageproc::edges::canny(gray, low, high)
}

pub fn equalize_histogram(gray: &GrayImage) -> GrayImage {
    imageproc::contrast::equalize_histogram(gray)
}

/// Outer borders of the top-level connected components of a binary image.
///
/// Holes and anything nested inside another component are skipped.
pub fn external_contours(binary: &GrayImage) -> Vec<Vec<Point2<i32>>> {
    find_contours::<i32>(binary)
        .into_iter()
        .filter(|c| c.parent.is_none() && c.border_type == BorderType::Outer)
        .map(|c| c.points.iter().map(|p| Point2::new(p.x, p.y)).collect())
        .collect()
}

/// Douglas-Peucker simplification of a closed contour.
///
/// The curve is split at the vertex farthest from its first point and both
/// halves are simplified as open chains, so the seam never shows up as an
/// extra vertex. The returned polygon does not repeat its first vertex.
pub fn approximate_polygon(contour: &[Point2<i32>], epsilon: f64) -> Vec<Point2<i32>> {
    if contour.len() < 3 || epsilon <= 0.0 {
        return contour.to_vec();
    }
    let curve: Vec<Point<i32>> = contour.iter().map(|p| Point::new(p.x, p.y)).collect();

    let start = curve[0];
    let mut split = 0;
    let mut best = 0i64;
    for (i, p) in curve.iter().enumerate() {
        let dx = (p.x - start.x) as i64;
        let dy = (p.y - start.y) as i64;
        let d = dx * dx + dy * dy;
        if d > best {
            best = d;
            split = i;
        }
    }
    if split == 0 {
        return vec![contour[0]];
    }

    let first = approximate_polygon_dp(&curve[..=split], epsilon, false);
    let mut second_chain = curve[split..].to_vec();
    second_chain.push(start);
    let second = approximate_polygon_dp(&second_chain, epsilon, false);

    let mut out: Vec<Point2<i32>> = first.iter().map(|p| Point2::new(p.x, p.y)).collect();
    // `second` starts at the split vertex and ends back at `start`
    let inner = second.len().saturating_sub(1);
    out.extend(second[1..inner].iter().map(|p| Point2::new(p.x, p.y)));
    out.dedup();
    out
}

/// Crop `gray` to a sub-rectangle that is already known to be in bounds.
pub fn crop_gray(gray: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> GrayImage {
    image::imageops::crop_imm(gray, x, y, w, h).to_image()
}
