//! Digital zoom: planning a zoom level around a board and applying it as a
//! centered crop + resize.

use crate::params::ZoomParams;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use pcb_inspect_core::{BoundingBox, Frame, FrameSize};
use serde::{Deserialize, Serialize};

/// Zoom state of one camera session.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoomState {
    pub level: f32,
    /// True when the camera itself applied `level`.
    pub applied_via_hardware: bool,
}

impl Default for ZoomState {
    fn default() -> Self {
        Self {
            level: 1.0,
            applied_via_hardware: false,
        }
    }
}

/// Computes and applies software zoom within `[min_zoom, max_zoom]`.
///
/// Out-of-range requests saturate; nothing here fails.
#[derive(Clone, Debug, Default)]
pub struct ZoomPlanner {
    params: ZoomParams,
}

impl ZoomPlanner {
    pub fn new(params: ZoomParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &ZoomParams {
        &self.params
    }

    /// Saturate `level` into the configured range. NaN maps to 1.0 before
    /// clamping.
    pub fn clamp(&self, level: f32) -> f32 {
        let level = if level.is_nan() { 1.0 } else { level };
        level.clamp(self.params.min_zoom, self.params.max_zoom)
    }

    /// Largest zoom that keeps `bbox` plus `margin` visible on both axes.
    pub fn plan_zoom(&self, frame: FrameSize, bbox: &BoundingBox, margin: f32) -> f32 {
        let margin = margin.max(0.0);
        let fit = |frame_len: u32, box_len: u32| -> f32 {
            if box_len == 0 {
                f32::INFINITY
            } else {
                frame_len as f32 / (box_len as f32 * (1.0 + margin))
            }
        };
        let zoom = fit(frame.width, bbox.w).min(fit(frame.height, bbox.h));
        self.clamp(zoom)
    }

    /// [`Self::plan_zoom`] with the configured default margin.
    pub fn plan(&self, frame: FrameSize, bbox: &BoundingBox) -> f32 {
        self.plan_zoom(frame, bbox, self.params.margin)
    }

    pub fn zoom_in(&self, current: f32, factor: Option<f32>) -> f32 {
        let factor = factor.unwrap_or(self.params.step_factor).max(f32::EPSILON);
        self.clamp(current * factor)
    }

    pub fn zoom_out(&self, current: f32, factor: Option<f32>) -> f32 {
        let factor = factor.unwrap_or(self.params.step_factor).max(f32::EPSILON);
        self.clamp(current / factor)
    }

    /// Render `frame` at `level` (clamped). The output always has the input's
    /// dimensions; `1.0` returns an identical copy.
    ///
    /// Zooming in crops a centered `size / level` window and upsamples it.
    /// Zooming out places the frame centered on a black `size / level`
    /// canvas and downsamples that.
    pub fn apply_zoom(&self, frame: &Frame, level: f32) -> Frame {
        let level = self.clamp(level);
        let (w, h) = (frame.width(), frame.height());
        if level == 1.0 || w == 0 || h == 0 {
            return frame.clone();
        }

        let view_w = ((w as f32 / level).floor() as u32).max(1);
        let view_h = ((h as f32 / level).floor() as u32).max(1);

        let view = if level > 1.0 {
            let x = (w - view_w) / 2;
            let y = (h - view_h) / 2;
            imageops::crop_imm(frame.image(), x, y, view_w, view_h).to_image()
        } else {
            let mut canvas = RgbImage::from_pixel(view_w, view_h, Rgb([0, 0, 0]));
            let x = ((view_w - w) / 2) as i64;
            let y = ((view_h - h) / 2) as i64;
            imageops::overlay(&mut canvas, frame.image(), x, y);
            canvas
        };

        if view.dimensions() == (w, h) {
            return frame.derive(view);
        }
        frame.derive(imageops::resize(&view, w, h, FilterType::Lanczos3))
    }
}
