//! Coarse component blobs on a board image.
//!
//! This is a shape heuristic over edge contours, not a part recognizer: it
//! buckets blobs by bounding-box aspect ratio only.

use crate::params::ComponentParams;
use log::debug;
use pcb_inspect_core::{polygon_area, raster, BoundingBox, Frame};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Roughly square footprint, `0.8 < w/h < 1.2`.
    IcOrResistor,
    /// Elongated footprint, `w/h > 2` or `w/h < 0.5`.
    CapacitorOrConnector,
    Unknown,
}

impl ComponentKind {
    pub fn from_aspect_ratio(aspect_ratio: f32) -> Self {
        if aspect_ratio > 0.8 && aspect_ratio < 1.2 {
            Self::IcOrResistor
        } else if aspect_ratio > 2.0 || aspect_ratio < 0.5 {
            Self::CapacitorOrConnector
        } else {
            Self::Unknown
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Index of the source contour in detection order.
    pub id: usize,
    pub bbox: BoundingBox,
    pub area: f64,
    pub aspect_ratio: f32,
    pub kind: ComponentKind,
}

#[derive(Clone, Debug, Default)]
pub struct ComponentDetector {
    params: ComponentParams,
}

impl ComponentDetector {
    pub fn new(params: ComponentParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &ComponentParams {
        &self.params
    }

    pub fn detect(&self, frame: &Frame) -> Vec<Component> {
        let p = &self.params;
        let edges = raster::canny(&frame.to_gray(), p.canny_low, p.canny_high);

        let components: Vec<Component> = raster::external_contours(&edges)
            .iter()
            .enumerate()
            .filter_map(|(id, contour)| {
                let area = polygon_area(contour);
                if area <= p.min_area || area >= p.max_area {
                    return None;
                }
                let bbox = BoundingBox::enclosing(contour)?;
                let aspect_ratio = bbox.aspect_ratio();
                Some(Component {
                    id,
                    bbox,
                    area,
                    aspect_ratio,
                    kind: ComponentKind::from_aspect_ratio(aspect_ratio),
                })
            })
            .collect();

        debug!("detected {} component blobs", components.len());
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn aspect_ratio_buckets() {
        assert_eq!(ComponentKind::from_aspect_ratio(1.0), ComponentKind::IcOrResistor);
        assert_eq!(ComponentKind::from_aspect_ratio(3.0), ComponentKind::CapacitorOrConnector);
        assert_eq!(ComponentKind::from_aspect_ratio(0.3), ComponentKind::CapacitorOrConnector);
        assert_eq!(ComponentKind::from_aspect_ratio(1.5), ComponentKind::Unknown);
        // bounds are exclusive
        assert_eq!(ComponentKind::from_aspect_ratio(0.8), ComponentKind::Unknown);
        assert_eq!(ComponentKind::from_aspect_ratio(2.0), ComponentKind::Unknown);
    }

    #[test]
    fn finds_square_and_elongated_blobs() {
        let mut img = RgbImage::from_pixel(400, 300, Rgb([20, 60, 20]));
        let mut fill = |x0: u32, y0: u32, w: u32, h: u32| {
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    img.put_pixel(x, y, Rgb([230, 230, 230]));
                }
            }
        };
        fill(40, 40, 60, 60);
        fill(200, 100, 150, 40);

        let comps = ComponentDetector::default().detect(&Frame::new(img));
        assert_eq!(comps.len(), 2, "{comps:?}");
        let kinds: Vec<_> = comps.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&ComponentKind::IcOrResistor));
        assert!(kinds.contains(&ComponentKind::CapacitorOrConnector));
    }

    #[test]
    fn blank_frame_has_no_components() {
        let img = RgbImage::from_pixel(100, 100, Rgb([128, 128, 128]));
        assert!(ComponentDetector::default().detect(&Frame::new(img)).is_empty());
    }
}
