//! Structural comparison of an aligned capture against its reference and
//! classification of the differing regions.
//!
//! [`SimilarityComparator`] produces a [`ComparisonResult`] with one
//! [`RegionOfInterest`] per connected low-similarity area. The
//! [`DefectClassifier`] names each region by its local similarity and rolls
//! the defects up into a single [`Severity`].

mod classifier;
mod comparator;
mod ssim;

pub use classifier::{
    recommendations, severity_of, ClassifierParams, Defect, DefectAnalysis, DefectClassifier,
    DefectType, Severity,
};
pub use comparator::{
    CompareError, ComparatorParams, ComparisonResult, RegionOfInterest, SimilarityComparator,
};
pub use ssim::{ssim, Ssim, SsimMap, SsimParams};
