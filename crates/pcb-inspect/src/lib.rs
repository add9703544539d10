//! High-level facade crate for the `pcb-inspect-*` workspace.
//!
//! This crate provides:
//! - re-exports of the pipeline crates
//! - the collaborator ports a deployment implements ([`FrameSource`],
//!   [`SampleStore`], [`RemoteJudge`]) and a directory-backed sample store
//! - [`InspectionSession`], which runs locate, zoom, capture, align, compare
//!   and classify as one cancellable background task and produces an
//!   [`InspectionReport`]
//!
//! ## Quickstart
//!
//! ```no_run
//! use pcb_inspect::{
//!     DirSampleStore, FrameSource, InspectionRequest, InspectionSession, InspectorConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn run(camera: Arc<dyn FrameSource>) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(DirSampleStore::new("qa_samples")?);
//! let session = InspectionSession::new(camera, store, None, InspectorConfig::default());
//!
//! let outcome = session
//!     .run_inspection(InspectionRequest::new("sample_20240101_120000_main"), |state| {
//!         println!("stage: {state}");
//!     })
//!     .await?;
//! if let Some(report) = outcome.report() {
//!     println!("{}", report.to_json()?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `pcb_inspect::core`: frames, geometry, homographies, raster helpers.
//! - `pcb_inspect::board`: board localisation, zoom planning, component blobs.
//! - `pcb_inspect::align`: feature matching and homography alignment.
//! - `pcb_inspect::compare`: structural similarity, regions, defect classes.

pub use pcb_inspect_align as align;
pub use pcb_inspect_board as board;
pub use pcb_inspect_compare as compare;
pub use pcb_inspect_core as core;

mod config;
mod judge;
mod ports;
mod report;
mod sample_store;
mod session;

pub use config::{ConfigError, InspectionParams, InspectorConfig};
pub use judge::JudgeOpinion;
pub use ports::{
    BoardSide, CameraCapabilities, FocusMode, FrameSource, JudgeVerdict, QaSample, RemoteJudge,
    SampleStore, SampleSummary,
};
pub use report::{AlignmentSummary, InspectionReport, OverallResult, RemoteJudgment};
pub use sample_store::{DirSampleStore, ImagePaths, SampleMetadata, SampleStoreError, SampleUpdate};
pub use session::{
    CameraSnapshot, InspectionFailure, InspectionHandle, InspectionRequest, InspectionSession,
    ProgressObserver, RunOutcome, RunState, StartError,
};

pub use pcb_inspect_align::{AlignFailure, AlignmentResult};
pub use pcb_inspect_board::{BoardCandidate, ZoomState};
pub use pcb_inspect_compare::{ComparisonResult, Defect, DefectType, Severity};
pub use pcb_inspect_core::{init_from_env, init_with_level, Frame};

/// Route `log` records into `tracing` and install the `tracing` subscriber.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let _ = tracing_log::LogTracer::init();
    pcb_inspect_core::init_tracing(json);
}
