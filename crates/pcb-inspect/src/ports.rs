//! Collaborator ports.
//!
//! The inspection core never talks to a camera, a disk or a network service
//! directly. Adapters implement these traits; [`crate::DirSampleStore`] is the
//! bundled sample-store adapter.

use async_trait::async_trait;
use pcb_inspect_core::Frame;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::sample_store::{SampleMetadata, SampleStoreError};

/// Hardware features a camera reports. The core treats `false` as the norm.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraCapabilities {
    pub auto_focus_supported: bool,
    pub manual_focus_supported: bool,
    pub hardware_zoom_supported: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum FocusMode {
    #[default]
    Auto,
    /// Lens position in `[0, 1]`.
    Manual(f32),
}

/// Source of camera frames.
///
/// Only `next_frame` and `capabilities` are required. The hardware setters
/// default to "unsupported".
pub trait FrameSource: Send + Sync {
    /// Latest frame, or `None` when the device has nothing to give.
    fn next_frame(&self) -> Option<Frame>;

    fn capabilities(&self) -> CameraCapabilities;

    /// Ask the device to zoom optically. Returns whether it did.
    fn set_hardware_zoom(&self, _level: f32) -> bool {
        false
    }

    /// Returns whether the device accepted the focus mode.
    fn set_focus(&self, _mode: FocusMode) -> bool {
        false
    }
}

/// Which face of the board a reference or capture shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardSide {
    #[default]
    Front,
    Back,
}

/// A stored "known good" capture of one board type.
#[derive(Clone, Debug)]
pub struct QaSample {
    pub metadata: SampleMetadata,
    pub front: Frame,
    pub back: Frame,
}

impl QaSample {
    pub fn reference(&self, side: BoardSide) -> &Frame {
        match side {
            BoardSide::Front => &self.front,
            BoardSide::Back => &self.back,
        }
    }

    pub fn reference_path(&self, side: BoardSide) -> PathBuf {
        PathBuf::from(match side {
            BoardSide::Front => &self.metadata.image_paths.front,
            BoardSide::Back => &self.metadata.image_paths.back,
        })
    }
}

/// Listing entry of a sample store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub id: String,
    pub name: String,
}

/// Read side of the QA sample repository.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// `Ok(None)` for unknown ids and for samples whose images are gone.
    async fn get_sample(&self, id: &str) -> Result<Option<QaSample>, SampleStoreError>;

    /// Newest first.
    async fn list_samples(&self) -> Result<Vec<SampleSummary>, SampleStoreError>;
}

/// Answer of a [`RemoteJudge`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub succeeded: bool,
    /// Structured opinion, see [`crate::JudgeOpinion`] for the usual shape.
    /// A bare string is taken as the judge's free-text answer and parsed
    /// into that shape.
    pub opinion: serde_json::Value,
}

/// Independent second opinion on an image pair, typically a hosted
/// vision-language model. Its answer is merged into the report and never
/// changes the computed result.
#[async_trait]
pub trait RemoteJudge: Send + Sync {
    async fn compare(&self, test_image_path: &Path, reference_image_path: &Path) -> JudgeVerdict;
}
