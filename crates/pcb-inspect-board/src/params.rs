use serde::{Deserialize, Serialize};

/// Parameters for [`crate::BoardLocator`].
///
/// The confidence weights and normalisers are empirical tuning values, not
/// invariants; override them from configuration when a camera setup needs it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorParams {
    /// Contours enclosing less than this many square pixels are ignored.
    pub min_board_area: f64,
    /// Best candidate is returned only at or above this confidence.
    pub confidence_threshold: f32,
    /// Gaussian sigma for sensor-noise suppression.
    pub blur_sigma: f32,
    /// Half-size of the adaptive-threshold neighbourhood.
    pub threshold_block_radius: u32,
    /// A pixel must be this much darker than its local mean to be foreground.
    pub threshold_offset: i16,
    /// Radius of the closing/opening square element.
    pub morph_radius: u8,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Dilation applied to the edge map so one-pixel gaps do not open contours.
    pub edge_dilation: u8,
    /// Polygon tolerance as a fraction of the contour perimeter.
    pub approx_epsilon_frac: f64,
    pub min_vertices: usize,
    pub max_vertices: usize,
    pub min_aspect_ratio: f32,
    pub max_aspect_ratio: f32,
    pub area_weight: f32,
    /// Area at which the size term of the confidence saturates.
    pub area_norm: f64,
    pub fill_weight: f32,
    pub compactness_weight: f32,
    /// `area / perimeter` at which the compactness term saturates.
    pub compactness_norm: f64,
}

impl Default for LocatorParams {
    fn default() -> Self {
        Self {
            min_board_area: 10_000.0,
            confidence_threshold: 0.7,
            blur_sigma: 1.1,
            threshold_block_radius: 5,
            threshold_offset: 2,
            morph_radius: 1,
            canny_low: 50.0,
            canny_high: 150.0,
            edge_dilation: 1,
            approx_epsilon_frac: 0.02,
            min_vertices: 4,
            max_vertices: 6,
            min_aspect_ratio: 0.5,
            max_aspect_ratio: 2.0,
            area_weight: 0.4,
            area_norm: 50_000.0,
            fill_weight: 0.3,
            compactness_weight: 0.3,
            compactness_norm: 10.0,
        }
    }
}

/// Digital zoom limits and defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomParams {
    pub min_zoom: f32,
    pub max_zoom: f32,
    /// Fractional border kept around the board when planning a zoom.
    pub margin: f32,
    /// Multiplier used by relative zoom-in / zoom-out requests.
    pub step_factor: f32,
}

impl Default for ZoomParams {
    fn default() -> Self {
        Self {
            min_zoom: 0.5,
            max_zoom: 4.0,
            margin: 0.1,
            step_factor: 1.2,
        }
    }
}

/// Parameters for [`crate::ComponentDetector`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentParams {
    pub canny_low: f32,
    pub canny_high: f32,
    /// Exclusive lower bound on contour area.
    pub min_area: f64,
    /// Exclusive upper bound on contour area.
    pub max_area: f64,
}

impl Default for ComponentParams {
    fn default() -> Self {
        Self {
            canny_low: 50.0,
            canny_high: 150.0,
            min_area: 500.0,
            max_area: 50_000.0,
        }
    }
}
