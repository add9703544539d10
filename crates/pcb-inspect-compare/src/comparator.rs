use crate::ssim::{ssim, SsimParams};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use log::debug;
use nalgebra::Point2;
use pcb_inspect_core::{polygon_area, raster, BoundingBox, Frame};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompareError {
    #[error("image {width}x{height} is smaller than the {window}x{window} similarity window")]
    ImageTooSmall { width: u32, height: u32, window: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparatorParams {
    /// Pass threshold for the global score and cut-off for the local map.
    pub threshold: f64,
    /// Difference contours must enclose strictly more than this many pixels.
    pub min_region_area: f64,
    pub ssim: SsimParams,
}

impl Default for ComparatorParams {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            min_region_area: 100.0,
            ssim: SsimParams::default(),
        }
    }
}

/// A connected area where the local similarity falls below threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    /// Sequential within one comparison, starting at zero.
    pub id: usize,
    pub bounding_box: BoundingBox,
    pub area: f64,
    pub center: Point2<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub similarity_score: f64,
    /// Share of pixels flagged different, in percent.
    pub difference_percentage: f64,
    pub regions: Vec<RegionOfInterest>,
    pub threshold: f64,
    pub passed: bool,
}

impl ComparisonResult {
    pub fn region(&self, id: usize) -> Option<&RegionOfInterest> {
        self.regions.iter().find(|r| r.id == id)
    }

    #[inline]
    pub fn total_regions(&self) -> usize {
        self.regions.len()
    }
}

/// Structural comparison of an aligned capture against its reference.
#[derive(Clone, Debug, Default)]
pub struct SimilarityComparator {
    params: ComparatorParams,
}

impl SimilarityComparator {
    pub fn new(params: ComparatorParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &ComparatorParams {
        &self.params
    }

    /// Compare with the configured threshold.
    pub fn compare(&self, reference: &Frame, aligned: &Frame) -> Result<ComparisonResult, CompareError> {
        self.compare_with_threshold(reference, aligned, self.params.threshold)
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, reference, aligned), fields(
            width = reference.width(),
            height = reference.height(),
        ))
    )]
    pub fn compare_with_threshold(
        &self,
        reference: &Frame,
        aligned: &Frame,
        threshold: f64,
    ) -> Result<ComparisonResult, CompareError> {
        let ref_gray = reference.to_gray();
        let test_gray = gray_matching(aligned, reference.width(), reference.height());

        let result = ssim(&ref_gray, &test_gray, &self.params.ssim).ok_or(
            CompareError::ImageTooSmall {
                width: reference.width(),
                height: reference.height(),
                window: self.params.ssim.window,
            },
        )?;

        let map = &result.map;
        let mut flagged = 0usize;
        let mask = GrayImage::from_fn(map.width(), map.height(), |x, y| {
            if (map.get(x, y) as f64) < threshold {
                flagged += 1;
                Luma([255])
            } else {
                Luma([0])
            }
        });

        let regions: Vec<RegionOfInterest> = raster::external_contours(&mask)
            .iter()
            .filter_map(|contour| {
                let area = polygon_area(contour);
                if area <= self.params.min_region_area {
                    return None;
                }
                BoundingBox::enclosing(contour).map(|bounding_box| (bounding_box, area))
            })
            .enumerate()
            .map(|(id, (bounding_box, area))| RegionOfInterest {
                id,
                bounding_box,
                area,
                center: bounding_box.center(),
            })
            .collect();

        let total = (map.width() as u64 * map.height() as u64).max(1) as f64;
        let comparison = ComparisonResult {
            similarity_score: result.score,
            difference_percentage: 100.0 * flagged as f64 / total,
            regions,
            threshold,
            passed: result.score >= threshold,
        };
        debug!(
            "similarity {:.4}, {:.2}% different, {} regions",
            comparison.similarity_score,
            comparison.difference_percentage,
            comparison.regions.len()
        );
        Ok(comparison)
    }
}

/// Grayscale of `frame`, resized to `width × height` when it differs.
pub(crate) fn gray_matching(frame: &Frame, width: u32, height: u32) -> GrayImage {
    let gray = frame.to_gray();
    if gray.dimensions() == (width, height) {
        gray
    } else {
        debug!(
            "resizing aligned image {}x{} to reference {}x{}",
            gray.width(),
            gray.height(),
            width,
            height
        );
        imageops::resize(&gray, width, height, FilterType::Triangle)
    }
}
