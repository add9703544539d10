//! Core types and utilities for PCB visual inspection.
//!
//! This crate holds what every pipeline stage shares: the immutable
//! [`Frame`], pixel geometry ([`BoundingBox`], polygon helpers), the
//! [`Homography`] solver and perspective warps, and the raster primitives in
//! [`raster`]. It carries no detector logic of its own.

mod frame;
mod geometry;
mod homography;
mod logger;
pub mod raster;
mod sampling;

pub use frame::{Frame, FrameError, FrameSize};
pub use geometry::{closed_perimeter, polygon_area, BoundingBox};
pub use homography::{fit_homography, homography_from_4pt, warp_perspective_rgb, Homography};
pub use sampling::sample_bilinear_rgb;

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_env, init_with_level, LOG_ENV_VAR};
