//! Board-level analysis of camera frames.
//!
//! - [`BoardLocator`] finds the board outline and scores how board-like it is.
//! - [`ZoomPlanner`] turns a board bounding box into a digital zoom level and
//!   renders frames at that level.
//! - [`ComponentDetector`] reports coarse component blobs.
//!
//! ```no_run
//! use pcb_inspect_board::{BoardLocator, ZoomPlanner};
//! # fn frame() -> pcb_inspect_core::Frame { unimplemented!() }
//! let frame = frame();
//! if let Some(board) = BoardLocator::default().locate(&frame) {
//!     let planner = ZoomPlanner::default();
//!     let level = planner.plan(frame.size(), &board.bounding_box);
//!     let zoomed = planner.apply_zoom(&frame, level);
//!     println!("zoom {level:.2}, {}x{}", zoomed.width(), zoomed.height());
//! }
//! ```

mod components;
mod locator;
mod params;
mod zoom;

pub use components::{Component, ComponentDetector, ComponentKind};
pub use locator::{BoardCandidate, BoardLocator};
pub use params::{ComponentParams, LocatorParams, ZoomParams};
pub use zoom::{ZoomPlanner, ZoomState};
