//! Board localisation in a camera frame.

use crate::params::LocatorParams;
use log::debug;
use nalgebra::Point2;
use pcb_inspect_core::{closed_perimeter, polygon_area, raster, BoundingBox, Frame};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A board-shaped region found in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardCandidate {
    /// Simplified outline polygon (4..=6 vertices with default params).
    pub boundary: Vec<Point2<i32>>,
    pub bounding_box: BoundingBox,
    /// Area enclosed by the raw contour, in square pixels.
    pub area: f64,
    /// `w / h` of the bounding box.
    pub aspect_ratio: f32,
    /// Composite score in `[0, 1]`.
    pub confidence: f32,
    pub center: Point2<f32>,
}

/// Finds the most board-like quadrilateral in a frame.
///
/// Stateless: the same frame and parameters always produce the same answer.
#[derive(Clone, Debug, Default)]
pub struct BoardLocator {
    params: LocatorParams,
}

impl BoardLocator {
    pub fn new(params: LocatorParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &LocatorParams {
        &self.params
    }

    /// Return the highest-confidence board candidate, or `None` when nothing
    /// reaches `confidence_threshold`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, frame), fields(width = frame.width(), height = frame.height()))
    )]
    pub fn locate(&self, frame: &Frame) -> Option<BoardCandidate> {
        let best = self
            .candidates(frame)
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

        if best.confidence >= self.params.confidence_threshold {
            debug!(
                "board at {:?} (confidence {:.3})",
                best.bounding_box, best.confidence
            );
            Some(best)
        } else {
            debug!(
                "best board candidate below threshold ({:.3} < {:.3})",
                best.confidence, self.params.confidence_threshold
            );
            None
        }
    }

    /// Every contour that passes the shape filters, in contour order,
    /// regardless of confidence.
    pub fn candidates(&self, frame: &Frame) -> Vec<BoardCandidate> {
        let p = &self.params;
        let edges = edge_map(frame, p);

        raster::external_contours(&edges)
            .iter()
            .filter_map(|contour| self.score_contour(contour))
            .collect()
    }

    fn score_contour(&self, contour: &[Point2<i32>]) -> Option<BoardCandidate> {
        let p = &self.params;

        let area = polygon_area(contour);
        if area < p.min_board_area {
            return None;
        }

        let perimeter = closed_perimeter(contour);
        let boundary = raster::approximate_polygon(contour, p.approx_epsilon_frac * perimeter);
        if boundary.len() < p.min_vertices || boundary.len() > p.max_vertices {
            return None;
        }

        let bounding_box = BoundingBox::enclosing(contour)?;
        let aspect_ratio = bounding_box.aspect_ratio();
        if !(p.min_aspect_ratio..=p.max_aspect_ratio).contains(&aspect_ratio) {
            return None;
        }

        let confidence = composite_confidence(p, area, perimeter, bounding_box);
        Some(BoardCandidate {
            boundary,
            bounding_box,
            area,
            aspect_ratio,
            confidence,
            center: bounding_box.center(),
        })
    }
}

/// gray -> blur -> adaptive threshold -> close -> open -> canny -> dilate
fn edge_map(frame: &Frame, p: &LocatorParams) -> image::GrayImage {
    let gray = frame.to_gray();
    let blurred = raster::gaussian_blur(&gray, p.blur_sigma);
    let binary = raster::adaptive_threshold_inv(&blurred, p.threshold_block_radius, p.threshold_offset);
    let cleaned = if p.morph_radius > 0 {
        raster::open(&raster::close(&binary, p.morph_radius), p.morph_radius)
    } else {
        binary
    };
    let edges = raster::canny(&cleaned, p.canny_low, p.canny_high);
    if p.edge_dilation > 0 {
        raster::dilate(&edges, p.edge_dilation)
    } else {
        edges
    }
}

fn composite_confidence(
    p: &LocatorParams,
    area: f64,
    perimeter: f64,
    bbox: BoundingBox,
) -> f32 {
    let size = (area / p.area_norm).min(1.0);
    let fill = area / bbox.area().max(1) as f64;
    let compactness = if perimeter > 0.0 {
        ((area / perimeter) / p.compactness_norm).min(1.0)
    } else {
        0.0
    };
    let c = p.area_weight as f64 * size
        + p.fill_weight as f64 * fill
        + p.compactness_weight as f64 * compactness;
    c.clamp(0.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn confidence_terms_saturate() {
        let p = LocatorParams::default();
        let bbox = BoundingBox::new(0, 0, 300, 200);
        // area 60000 fills the box; area/perimeter = 60 >> 10
        let c = composite_confidence(&p, 60_000.0, 1000.0, bbox);
        assert_relative_eq!(c, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn confidence_for_small_sparse_contour() {
        let p = LocatorParams::default();
        let bbox = BoundingBox::new(0, 0, 200, 100);
        // size 0.2, fill 0.5, compactness 0.5
        let c = composite_confidence(&p, 10_000.0, 2000.0, bbox);
        assert_relative_eq!(c, 0.4 * 0.2 + 0.3 * 0.5 + 0.3 * 0.5, epsilon = 1e-6);
    }
}
