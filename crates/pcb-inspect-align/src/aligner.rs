use crate::features::{Feature, FeatureDetector};
use crate::matcher::match_features;
use crate::params::AlignerParams;
use crate::ransac::ransac_homography;
use log::{debug, warn};
use nalgebra::Point2;
use pcb_inspect_core::{warp_perspective_rgb, Frame, FrameSize, Homography};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Why an alignment attempt fell back to the unmodified test image.
#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignFailure {
    #[error("no features detected in one or both images")]
    NoFeatures,
    #[error("insufficient good matches for alignment")]
    InsufficientMatches,
    #[error("homography estimation failed")]
    HomographyFailed,
}

/// Outcome of one alignment attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    /// Maps test-image pixels onto reference-image pixels.
    pub homography: Option<Homography>,
    /// Good matches that are also RANSAC inliers.
    pub match_count: usize,
    /// Matches that passed the ratio test.
    pub good_matches: usize,
    pub succeeded: bool,
    pub failure: Option<AlignFailure>,
}

impl AlignmentResult {
    fn failed(reason: AlignFailure, good_matches: usize) -> Self {
        Self {
            homography: None,
            match_count: 0,
            good_matches,
            succeeded: false,
            failure: Some(reason),
        }
    }

    fn aligned(homography: Homography, match_count: usize, good_matches: usize) -> Self {
        Self {
            homography: Some(homography),
            match_count,
            good_matches,
            succeeded: true,
            failure: None,
        }
    }
}

/// Warps a test capture into the pixel frame of a reference capture.
#[derive(Clone, Debug, Default)]
pub struct ImageAligner {
    params: AlignerParams,
}

impl ImageAligner {
    pub fn new(params: AlignerParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &AlignerParams {
        &self.params
    }

    /// Align `test` onto `reference`.
    ///
    /// On failure the returned frame is a copy of `test`, untouched.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(
            reference = ?reference.size(),
            test = ?test.size(),
        ))
    )]
    pub fn align(&self, reference: &Frame, test: &Frame) -> (Frame, AlignmentResult) {
        let detector = FeatureDetector::new(self.params.features.clone());
        let reference_features = detector.detect(&reference.to_gray());
        let test_features = detector.detect(&test.to_gray());
        self.align_features(reference.size(), &reference_features, test, &test_features)
    }

    /// Alignment from precomputed features; `reference_size` fixes the output
    /// canvas.
    pub fn align_features(
        &self,
        reference_size: FrameSize,
        reference_features: &[Feature],
        test: &Frame,
        test_features: &[Feature],
    ) -> (Frame, AlignmentResult) {
        if reference_features.is_empty() || test_features.is_empty() {
            warn!("no features detected in one or both images");
            return (test.clone(), AlignmentResult::failed(AlignFailure::NoFeatures, 0));
        }

        let matches = match_features(reference_features, test_features, self.params.ratio);
        let good = matches.len();
        if good < self.params.min_matches.max(4) {
            warn!("insufficient good matches for alignment ({good})");
            return (
                test.clone(),
                AlignmentResult::failed(AlignFailure::InsufficientMatches, good),
            );
        }

        let (test_pts, ref_pts): (Vec<Point2<f32>>, Vec<Point2<f32>>) = matches
            .iter()
            .map(|m| {
                (
                    test_features[m.test_idx].keypoint.position,
                    reference_features[m.reference_idx].keypoint.position,
                )
            })
            .unzip();

        let estimate = ransac_homography(&test_pts, &ref_pts, &self.params.ransac);
        let Some((estimate, test_from_ref)) =
            estimate.and_then(|e| e.homography.inverse().map(|inv| (e, inv)))
        else {
            warn!("could not compute homography from {good} matches");
            return (
                test.clone(),
                AlignmentResult::failed(AlignFailure::HomographyFailed, good),
            );
        };

        let aligned = warp_perspective_rgb(
            test.image(),
            test_from_ref,
            reference_size.width,
            reference_size.height,
        );
        debug!(
            "aligned with {} inliers of {} good matches",
            estimate.inliers.len(),
            good
        );
        (
            test.derive(aligned),
            AlignmentResult::aligned(estimate.homography, estimate.inliers.len(), good),
        )
    }
}
