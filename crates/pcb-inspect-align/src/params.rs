use serde::{Deserialize, Serialize};

/// Keypoint detector and descriptor settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureParams {
    /// Strongest keypoints kept over all pyramid levels.
    pub max_features: usize,
    /// FAST-9 intensity threshold.
    pub fast_threshold: u8,
    pub pyramid_levels: usize,
    /// Downscale factor between consecutive pyramid levels.
    pub scale_factor: f32,
    /// Gaussian sigma applied before orientation and descriptor sampling.
    pub smoothing_sigma: f32,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            max_features: 2000,
            fast_threshold: 20,
            pyramid_levels: 4,
            scale_factor: 1.25,
            smoothing_sigma: 2.0,
        }
    }
}

/// Robust homography estimation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Maximum reprojection error, in pixels, for a match to count as inlier.
    pub reprojection_threshold: f32,
    pub max_iterations: usize,
    /// Early-exit confidence for the adaptive iteration bound.
    pub confidence: f64,
    /// Fixed seed keeps alignment reproducible; `None` draws from the OS.
    pub seed: Option<u64>,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            reprojection_threshold: 5.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: Some(0x5eed_1234),
        }
    }
}

/// Parameters for [`crate::ImageAligner`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignerParams {
    pub features: FeatureParams,
    /// Lowe ratio: keep a match only if `best < ratio * second_best`.
    pub ratio: f32,
    /// Fewer good matches than this cannot determine a homography.
    pub min_matches: usize,
    pub ransac: RansacParams,
}

impl Default for AlignerParams {
    fn default() -> Self {
        Self {
            features: FeatureParams::default(),
            ratio: 0.75,
            min_matches: 4,
            ransac: RansacParams::default(),
        }
    }
}
