//! Geometric alignment of a test capture onto a reference capture.
//!
//! Pipeline: oriented FAST keypoints with rotated binary descriptors on an
//! image pyramid ([`FeatureDetector`]), two-nearest-neighbour Hamming
//! matching with a ratio test ([`match_features`]), a RANSAC homography
//! ([`ransac_homography`]) and a perspective warp into the reference frame
//! ([`ImageAligner`]).
//!
//! Alignment never errors: every failure is reported through
//! [`AlignmentResult::failure`] alongside an untouched copy of the test frame.

mod aligner;
mod features;
mod matcher;
mod params;
mod ransac;

pub use aligner::{AlignFailure, AlignmentResult, ImageAligner};
pub use features::{Descriptor, Feature, FeatureDetector, Keypoint};
pub use matcher::{match_features, Match};
pub use params::{AlignerParams, FeatureParams, RansacParams};
pub use ransac::{ransac_homography, RansacEstimate};
