//! RANSAC homography estimation.

use crate::params::RansacParams;
use nalgebra::Point2;
use pcb_inspect_core::{fit_homography, homography_from_4pt, Homography};
use rand::rngs::StdRng;
use rand::{seq::index, SeedableRng};

#[derive(Clone, Debug, PartialEq)]
pub struct RansacEstimate {
    /// Maps `src` points onto `dst` points.
    pub homography: Homography,
    /// Indices of the correspondences within the reprojection threshold.
    pub inliers: Vec<usize>,
    pub iterations: usize,
}

/// Fit `dst ~ H * src` robustly.
///
/// Minimal 4-point hypotheses are scored by inlier count. The best consensus
/// set is refit by weighted least squares, each inlier weighted by how close
/// it sits to the winning hypothesis. Returns `None` when fewer than four
/// correspondences are given or no hypothesis gathers four inliers.
pub fn ransac_homography(
    src: &[Point2<f32>],
    dst: &[Point2<f32>],
    params: &RansacParams,
) -> Option<RansacEstimate> {
    let n = src.len();
    if n < 4 || n != dst.len() {
        return None;
    }

    let mut rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let threshold = params.reprojection_threshold;
    let mut best: Option<(Homography, Vec<usize>)> = None;
    let mut max_iterations = params.max_iterations.max(1);
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;

        let sample = index::sample(&mut rng, n, 4);
        let s: [Point2<f32>; 4] = [
            src[sample.index(0)],
            src[sample.index(1)],
            src[sample.index(2)],
            src[sample.index(3)],
        ];
        let d: [Point2<f32>; 4] = [
            dst[sample.index(0)],
            dst[sample.index(1)],
            dst[sample.index(2)],
            dst[sample.index(3)],
        ];
        let Some(h) = homography_from_4pt(&s, &d) else {
            continue;
        };

        let inliers = inliers_of(&h, src, dst, threshold);
        if best.as_ref().is_some_and(|(_, b)| b.len() >= inliers.len()) {
            continue;
        }

        max_iterations = max_iterations.min(adaptive_bound(
            inliers.len(),
            n,
            params.confidence,
            params.max_iterations,
        ));
        best = Some((h, inliers));
        if best.as_ref().is_some_and(|(_, b)| b.len() == n) {
            break;
        }
    }

    let (mut homography, mut inliers) = best?;
    if inliers.len() < 4 {
        return None;
    }

    let members: Vec<(usize, f64)> = inliers
        .iter()
        .map(|&i| (i, refit_weight(homography.transfer_error(src[i], dst[i]), threshold)))
        .collect();
    if let Some(refined) = fit_homography(src, dst, &members) {
        let refined_inliers = inliers_of(&refined, src, dst, threshold);
        if refined_inliers.len() >= inliers.len() {
            homography = refined;
            inliers = refined_inliers;
        }
    }

    log::debug!(
        "ransac: {} / {} inliers after {} iterations",
        inliers.len(),
        n,
        iterations
    );
    Some(RansacEstimate {
        homography,
        inliers,
        iterations,
    })
}

fn inliers_of(h: &Homography, src: &[Point2<f32>], dst: &[Point2<f32>], threshold: f32) -> Vec<usize> {
    src.iter()
        .zip(dst)
        .enumerate()
        .filter(|(_, (s, d))| h.transfer_error(**s, **d) <= threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Cauchy weight in `(0.5, 1]` for an inlier with transfer error `err`.
fn refit_weight(err: f32, threshold: f32) -> f64 {
    let r = f64::from(err) / f64::from(threshold.max(f32::EPSILON));
    1.0 / (1.0 + r * r)
}

/// Iterations needed to draw one all-inlier sample with `confidence`.
fn adaptive_bound(inliers: usize, total: usize, confidence: f64, cap: usize) -> usize {
    let w = inliers as f64 / total as f64;
    let p_good = w.powi(4);
    if p_good >= 1.0 - f64::EPSILON {
        return 1;
    }
    if p_good <= f64::EPSILON {
        return cap;
    }
    let k = (1.0 - confidence.clamp(0.0, 1.0 - 1e-12)).ln() / (1.0 - p_good).ln();
    if k.is_finite() {
        (k.ceil() as usize).clamp(1, cap)
    } else {
        cap
    }
}
