//! Oriented FAST keypoints with rotated binary descriptors.
//!
//! Keypoints come from FAST-9 on every level of a downscaled pyramid, with
//! 3x3 non-maximum suppression. Each keypoint gets an orientation from the
//! intensity centroid of its disc patch, and a 256-bit descriptor built from
//! pairwise intensity tests sampled on a pattern rotated by that orientation.
//! The pyramid gives scale tolerance, the orientation gives rotation
//! tolerance.

use crate::params::FeatureParams;
use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::corners::corners_fast9;
use nalgebra::Point2;
use pcb_inspect_core::raster;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const PATCH_RADIUS: i32 = 15;
const PATTERN_RADIUS: i32 = 13;
const BORDER: u32 = PATCH_RADIUS as u32 + 1;
const DESCRIPTOR_BITS: usize = 256;
const PATTERN_SEED: u64 = 0x0b5e_55ed;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    /// Position in full-resolution pixel coordinates.
    pub position: Point2<f32>,
    pub score: f32,
    /// Patch orientation in radians.
    pub angle: f32,
    pub level: u8,
}

/// 256-bit binary descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    #[inline]
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub keypoint: Keypoint,
    pub descriptor: Descriptor,
}

#[derive(Clone, Debug, Default)]
pub struct FeatureDetector {
    params: FeatureParams,
}

impl FeatureDetector {
    pub fn new(params: FeatureParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &FeatureParams {
        &self.params
    }

    /// Detect keypoints and compute descriptors, strongest first.
    pub fn detect(&self, gray: &GrayImage) -> Vec<Feature> {
        let p = &self.params;
        let (w0, h0) = gray.dimensions();
        let mut features = Vec::new();

        let mut scale = 1.0_f32;
        for level in 0..p.pyramid_levels.max(1) {
            let lw = (w0 as f32 / scale).round() as u32;
            let lh = (h0 as f32 / scale).round() as u32;
            if lw <= 2 * BORDER || lh <= 2 * BORDER {
                break;
            }
            let img = if level == 0 {
                gray.clone()
            } else {
                imageops::resize(gray, lw, lh, FilterType::Triangle)
            };
            let smooth = raster::gaussian_blur(&img, p.smoothing_sigma);
            let sx = w0 as f32 / lw as f32;
            let sy = h0 as f32 / lh as f32;

            for (x, y, score) in fast_keypoints(&img, p.fast_threshold) {
                let angle = intensity_centroid_angle(&smooth, x, y);
                let descriptor = describe(&smooth, x, y, angle);
                features.push(Feature {
                    keypoint: Keypoint {
                        position: Point2::new(x as f32 * sx, y as f32 * sy),
                        score,
                        angle,
                        level: level as u8,
                    },
                    descriptor,
                });
            }
            scale *= p.scale_factor.max(1.01);
        }

        features.sort_by(|a, b| b.keypoint.score.total_cmp(&a.keypoint.score));
        features.truncate(p.max_features);
        log::debug!("detected {} features", features.len());
        features
    }
}

/// FAST-9 corners after 3x3 non-maximum suppression, away from the border.
fn fast_keypoints(img: &GrayImage, threshold: u8) -> Vec<(u32, u32, f32)> {
    let (w, h) = img.dimensions();
    let corners = corners_fast9(img, threshold);
    let mut scores = vec![0.0_f32; (w * h) as usize];
    for c in &corners {
        scores[(c.y * w + c.x) as usize] = c.score.max(f32::MIN_POSITIVE);
    }

    let beaten = |x: u32, y: u32, s: f32| -> bool {
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = x as i32 + dx;
                let ny = y as i32 + dy;
                if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                    continue;
                }
                let n = scores[(ny as u32 * w + nx as u32) as usize];
                // ties go to the first pixel in raster order
                if n > s || (n == s && (dy < 0 || (dy == 0 && dx < 0))) {
                    return true;
                }
            }
        }
        false
    };

    corners
        .iter()
        .filter(|c| c.x >= BORDER && c.y >= BORDER && c.x < w - BORDER && c.y < h - BORDER)
        .filter_map(|c| {
            let s = scores[(c.y * w + c.x) as usize];
            (!beaten(c.x, c.y, s)).then_some((c.x, c.y, s))
        })
        .collect()
}

fn intensity_centroid_angle(img: &GrayImage, x: u32, y: u32) -> f32 {
    let mut m10 = 0.0_f64;
    let mut m01 = 0.0_f64;
    let r2 = PATCH_RADIUS * PATCH_RADIUS;
    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let v = img.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as f64;
            m10 += dx as f64 * v;
            m01 += dy as f64 * v;
        }
    }
    m01.atan2(m10) as f32
}

type TestPair = [(i32, i32); 2];

fn sampling_pattern() -> &'static [TestPair] {
    static PATTERN: OnceLock<Vec<TestPair>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let point = |rng: &mut StdRng| loop {
            let dx = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
            let dy = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
            if dx * dx + dy * dy <= PATTERN_RADIUS * PATTERN_RADIUS {
                return (dx, dy);
            }
        };
        let mut pairs = Vec::with_capacity(DESCRIPTOR_BITS);
        while pairs.len() < DESCRIPTOR_BITS {
            let a = point(&mut rng);
            let b = point(&mut rng);
            if a != b {
                pairs.push([a, b]);
            }
        }
        pairs
    })
}

fn describe(img: &GrayImage, x: u32, y: u32, angle: f32) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let sample = |(dx, dy): (i32, i32)| -> u8 {
        let rx = (dx as f32 * cos - dy as f32 * sin).round() as i32;
        let ry = (dx as f32 * sin + dy as f32 * cos).round() as i32;
        img.get_pixel((x as i32 + rx) as u32, (y as i32 + ry) as u32)[0]
    };

    let mut bits = [0u64; 4];
    for (i, [a, b]) in sampling_pattern().iter().enumerate() {
        if sample(*a) < sample(*b) {
            bits[i / 64] |= 1 << (i % 64);
        }
    }
    Descriptor(bits)
}
