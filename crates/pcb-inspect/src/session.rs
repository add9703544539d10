//! One camera, one sample store, one inspection at a time.
//!
//! Per-frame calls (`detect_board`, `next_frame`, zoom controls) are
//! synchronous. A full inspection runs as a tokio task with the vision stages
//! on the blocking pool and reports its progress through an observer.

use crate::config::InspectorConfig;
use crate::judge::structured_opinion;
use crate::ports::{BoardSide, CameraCapabilities, FocusMode, FrameSource, RemoteJudge, SampleStore};
use crate::report::{AlignmentSummary, InspectionReport, RemoteJudgment, ReportParts};
use image::{GrayImage, Luma, RgbImage};
use log::{debug, info, warn};
use parking_lot::Mutex;
use pcb_inspect_align::{AlignFailure, ImageAligner};
use pcb_inspect_board::{
    BoardCandidate, BoardLocator, Component, ComponentDetector, ZoomPlanner, ZoomState,
};
use pcb_inspect_compare::{CompareError, DefectClassifier, SimilarityComparator};
use pcb_inspect_core::{raster, Frame};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Stage of an inspection run.
///
/// Observers see the stages from `Locating` on in declaration order, skipping
/// `Zooming` and `AwaitingRemoteJudge` when they do not apply, then exactly
/// one terminal state, then `Idle` once the session accepts a new run. A
/// cancelled run skips the terminal state and ends on `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Locating,
    Zooming,
    Capturing,
    Aligning,
    Comparing,
    Classifying,
    AwaitingRemoteJudge,
    Complete,
    Failed,
    UnknownBoard,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Locating => "locating",
            RunState::Zooming => "zooming",
            RunState::Capturing => "capturing",
            RunState::Aligning => "aligning",
            RunState::Comparing => "comparing",
            RunState::Classifying => "classifying",
            RunState::AwaitingRemoteJudge => "awaiting_remote_judge",
            RunState::Complete => "complete",
            RunState::Failed => "failed",
            RunState::UnknownBoard => "unknown_board",
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Complete | RunState::Failed | RunState::UnknownBoard
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in [`RunState::Failed`].
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum InspectionFailure {
    #[error("no frame available from the frame source")]
    NoFrame,
    #[error("QA sample `{0}` not found")]
    SampleNotFound(String),
    #[error("sample store error: {0}")]
    SampleStore(String),
    #[error("alignment failed: {0}")]
    Alignment(#[from] AlignFailure),
    #[error("comparison failed: {0}")]
    Comparison(#[from] CompareError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Complete(Box<InspectionReport>),
    /// No board-shaped region in the capture.
    UnknownBoard,
    Failed(InspectionFailure),
    Cancelled,
}

impl RunOutcome {
    pub fn report(&self) -> Option<&InspectionReport> {
        match self {
            RunOutcome::Complete(report) => Some(report),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&InspectionFailure> {
        match self {
            RunOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    fn terminal_state(&self) -> Option<RunState> {
        match self {
            RunOutcome::Complete(_) => Some(RunState::Complete),
            RunOutcome::UnknownBoard => Some(RunState::UnknownBoard),
            RunOutcome::Failed(_) => Some(RunState::Failed),
            RunOutcome::Cancelled => None,
        }
    }
}

#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartError {
    #[error("an inspection is already running")]
    Busy,
    #[error("no tokio runtime on this thread")]
    NoRuntime,
}

/// What to inspect.
#[derive(Clone, Debug, Default)]
pub struct InspectionRequest {
    pub sample_id: String,
    pub side: BoardSide,
    /// Inspect this frame instead of pulling one from the frame source.
    pub test_frame: Option<Frame>,
    /// On-disk copy of the test capture; required for the remote judge leg.
    pub test_image_path: Option<PathBuf>,
}

impl InspectionRequest {
    pub fn new(sample_id: impl Into<String>) -> Self {
        Self {
            sample_id: sample_id.into(),
            ..Self::default()
        }
    }

    pub fn with_side(mut self, side: BoardSide) -> Self {
        self.side = side;
        self
    }

    pub fn with_test_frame(mut self, frame: Frame) -> Self {
        self.test_frame = Some(frame);
        self
    }

    pub fn with_test_image_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.test_image_path = Some(path.into());
        self
    }
}

/// Camera state as of the moment it was queried.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraSnapshot {
    pub capabilities: CameraCapabilities,
    pub zoom: ZoomState,
    pub focus: FocusMode,
}

pub type ProgressObserver = Arc<dyn Fn(RunState) + Send + Sync>;

/// Zoom state packed into one word so readers never lock: level bits in the
/// low half, the hardware flag in bit 32.
struct SharedZoom(AtomicU64);

impl SharedZoom {
    const HARDWARE_BIT: u64 = 1 << 32;

    fn new(state: ZoomState) -> Self {
        Self(AtomicU64::new(Self::pack(state)))
    }

    fn pack(state: ZoomState) -> u64 {
        let hw = if state.applied_via_hardware {
            Self::HARDWARE_BIT
        } else {
            0
        };
        u64::from(state.level.to_bits()) | hw
    }

    fn unpack(word: u64) -> ZoomState {
        ZoomState {
            level: f32::from_bits(word as u32),
            applied_via_hardware: word & Self::HARDWARE_BIT != 0,
        }
    }

    fn load(&self) -> ZoomState {
        Self::unpack(self.0.load(Ordering::Acquire))
    }

    /// Atomically replace the level with `next(current)` as a software zoom.
    fn update_level(&self, next: impl Fn(f32) -> f32) -> ZoomState {
        let step = |word: u64| ZoomState {
            level: next(Self::unpack(word).level),
            applied_via_hardware: false,
        };
        let previous = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                Some(Self::pack(step(word)))
            })
            .unwrap_or_else(|word| word);
        step(previous)
    }

    /// Flag `state` as applied by the lens unless another update got in
    /// first.
    fn mark_hardware(&self, state: ZoomState) -> bool {
        let hardware = ZoomState {
            applied_via_hardware: true,
            ..state
        };
        self.0
            .compare_exchange(
                Self::pack(state),
                Self::pack(hardware),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// The one run allowed in flight and the frames it holds.
struct ActiveRun {
    id: u64,
    buffers: Vec<Arc<Frame>>,
}

struct SessionInner {
    config: InspectorConfig,
    locator: BoardLocator,
    planner: ZoomPlanner,
    components: ComponentDetector,
    aligner: ImageAligner,
    comparator: SimilarityComparator,
    classifier: DefectClassifier,
    frames: Arc<dyn FrameSource>,
    samples: Arc<dyn SampleStore>,
    judge: Option<Arc<dyn RemoteJudge>>,
    zoom: SharedZoom,
    focus: Mutex<FocusMode>,
    active: Mutex<Option<ActiveRun>>,
    next_run_id: AtomicU64,
}

impl SessionInner {
    /// Keep `frame` alive for run `id` until it ends or is cancelled.
    fn hold(&self, id: u64, frame: Frame) -> Option<Arc<Frame>> {
        let mut active = self.active.lock();
        let run = active.as_mut().filter(|run| run.id == id)?;
        let frame = Arc::new(frame);
        run.buffers.push(Arc::clone(&frame));
        Some(frame)
    }

    /// End run `id`, dropping its buffers. A newer run is left alone.
    /// Returns whether this call freed the slot.
    fn release(&self, id: u64) -> bool {
        let finished = {
            let mut active = self.active.lock();
            if active.as_ref().is_some_and(|run| run.id == id) {
                active.take()
            } else {
                None
            }
        };
        match finished {
            Some(run) => {
                debug!("run {id} released {} buffers", run.buffers.len());
                true
            }
            None => false,
        }
    }

    /// Move to the clamped `next(current)` level, then offer it to the lens.
    fn update_zoom(&self, next: impl Fn(f32) -> f32) -> ZoomState {
        let state = self
            .zoom
            .update_level(|current| self.planner.clamp(next(current)));
        if self.frames.capabilities().hardware_zoom_supported
            && self.frames.set_hardware_zoom(state.level)
            && self.zoom.mark_hardware(state)
        {
            return ZoomState {
                applied_via_hardware: true,
                ..state
            };
        }
        state
    }

    fn set_zoom(&self, level: f32) -> ZoomState {
        self.update_zoom(|_| level)
    }

    /// Software zoom for frames that did not get it from the lens.
    fn zoomed(&self, frame: Frame, state: ZoomState) -> Frame {
        if state.applied_via_hardware || state.level == 1.0 {
            frame
        } else {
            self.planner.apply_zoom(&frame, state.level)
        }
    }
}

/// Releases the run slot however the run task ends, including abort.
struct RunGuard {
    inner: Arc<SessionInner>,
    id: u64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.release(self.id);
    }
}

/// Inspection session bound to one camera.
///
/// Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct InspectionSession {
    inner: Arc<SessionInner>,
}

impl InspectionSession {
    pub fn new(
        frame_source: Arc<dyn FrameSource>,
        sample_store: Arc<dyn SampleStore>,
        remote_judge: Option<Arc<dyn RemoteJudge>>,
        config: InspectorConfig,
    ) -> Self {
        let inner = SessionInner {
            locator: BoardLocator::new(config.locator.clone()),
            planner: ZoomPlanner::new(config.zoom.clone()),
            components: ComponentDetector::new(config.components.clone()),
            aligner: ImageAligner::new(config.aligner.clone()),
            comparator: SimilarityComparator::new(config.comparator.clone()),
            classifier: DefectClassifier::new(config.classifier.clone()),
            config,
            frames: frame_source,
            samples: sample_store,
            judge: remote_judge,
            zoom: SharedZoom::new(ZoomState::default()),
            focus: Mutex::new(FocusMode::default()),
            active: Mutex::new(None),
            next_run_id: AtomicU64::new(1),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.inner.config
    }

    pub fn detect_board(&self, frame: &Frame) -> Option<BoardCandidate> {
        self.inner.locator.locate(frame)
    }

    pub fn detect_components(&self, frame: &Frame) -> Vec<Component> {
        self.inner.components.detect(frame)
    }

    /// Next preview frame at the current zoom.
    pub fn next_frame(&self) -> Option<Frame> {
        let frame = self.inner.frames.next_frame()?;
        Some(self.inner.zoomed(frame, self.inner.zoom.load()))
    }

    /// Lock-free snapshot of the zoom state.
    #[inline]
    pub fn zoom(&self) -> ZoomState {
        self.inner.zoom.load()
    }

    /// Clamp `level` into the configured range, try the lens, and record
    /// the result. Never fails: without hardware zoom the level applies in
    /// software.
    pub fn set_zoom(&self, level: f32) -> ZoomState {
        self.inner.set_zoom(level)
    }

    pub fn zoom_in(&self, factor: Option<f32>) -> ZoomState {
        let planner = &self.inner.planner;
        self.inner.update_zoom(|current| planner.zoom_in(current, factor))
    }

    pub fn zoom_out(&self, factor: Option<f32>) -> ZoomState {
        let planner = &self.inner.planner;
        self.inner.update_zoom(|current| planner.zoom_out(current, factor))
    }

    pub fn reset_zoom(&self) -> ZoomState {
        self.inner.set_zoom(1.0)
    }

    /// Locate the board in `frame` and zoom to frame it.
    pub fn auto_zoom_to_board(&self, frame: &Frame) -> Option<BoardCandidate> {
        let board = self.inner.locator.locate(frame)?;
        let level = self.inner.planner.plan(frame.size(), &board.bounding_box);
        let state = self.inner.set_zoom(level);
        info!(
            "auto zoom {:.2} (hardware: {})",
            state.level, state.applied_via_hardware
        );
        Some(board)
    }

    /// Forward a focus mode to the camera if it supports that mode.
    /// Returns whether the camera accepted it.
    pub fn set_focus_mode(&self, mode: FocusMode) -> bool {
        let caps = self.inner.frames.capabilities();
        let mode = match mode {
            FocusMode::Auto if caps.auto_focus_supported => FocusMode::Auto,
            FocusMode::Manual(v) if caps.manual_focus_supported => {
                FocusMode::Manual(if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) })
            }
            _ => {
                debug!("focus mode {mode:?} not supported by camera");
                return false;
            }
        };
        let accepted = self.inner.frames.set_focus(mode);
        if accepted {
            *self.inner.focus.lock() = mode;
        }
        accepted
    }

    pub fn camera_snapshot(&self) -> CameraSnapshot {
        CameraSnapshot {
            capabilities: self.inner.frames.capabilities(),
            zoom: self.zoom(),
            focus: *self.inner.focus.lock(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    /// Start an inspection in the background.
    ///
    /// Fails with [`StartError::Busy`] while another run is in flight; that
    /// run is not touched.
    pub fn start_inspection<F>(
        &self,
        request: InspectionRequest,
        observer: F,
    ) -> Result<InspectionHandle, StartError>
    where
        F: Fn(RunState) + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StartError::NoRuntime)?;
        let id = {
            let mut active = self.inner.active.lock();
            if active.is_some() {
                return Err(StartError::Busy);
            }
            let id = self.inner.next_run_id.fetch_add(1, Ordering::Relaxed);
            *active = Some(ActiveRun {
                id,
                buffers: Vec::new(),
            });
            id
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let observer: ProgressObserver = Arc::new(observer);
        let guard = RunGuard {
            inner: Arc::clone(&self.inner),
            id,
        };
        let (flag, task_observer) = (Arc::clone(&cancelled), Arc::clone(&observer));
        let join = runtime.spawn(async move {
            let outcome = execute(&guard.inner, guard.id, request, &task_observer, &flag).await;
            // free the slot first so a terminal-state observer can start the next run
            if guard.inner.release(guard.id) {
                if let Some(state) = outcome.terminal_state() {
                    task_observer(state);
                }
                task_observer(RunState::Idle);
            }
            outcome
        });

        info!("inspection run {id} started");
        Ok(InspectionHandle {
            id,
            join,
            cancelled,
            observer,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Start an inspection and wait for it.
    pub async fn run_inspection<F>(
        &self,
        request: InspectionRequest,
        observer: F,
    ) -> Result<RunOutcome, StartError>
    where
        F: Fn(RunState) + Send + Sync + 'static,
    {
        Ok(self.start_inspection(request, observer)?.wait().await)
    }
}

/// Handle to an in-flight inspection.
pub struct InspectionHandle {
    id: u64,
    join: JoinHandle<RunOutcome>,
    cancelled: Arc<AtomicBool>,
    observer: ProgressObserver,
    inner: Arc<SessionInner>,
}

impl InspectionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn wait(self) -> RunOutcome {
        let result = self.join.await;
        if self.cancelled.load(Ordering::Acquire) {
            return RunOutcome::Cancelled;
        }
        match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => RunOutcome::Cancelled,
            Err(e) => RunOutcome::Failed(InspectionFailure::Internal(e.to_string())),
        }
    }

    /// Stop the run. Its buffers are dropped and the session accepts a new
    /// run by the time this returns.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.join.abort();
        if self.inner.release(self.id) {
            info!("inspection run {} cancelled", self.id);
            (self.observer)(RunState::Idle);
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T, InspectionFailure>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| InspectionFailure::Internal(e.to_string()))
}

macro_rules! stage {
    ($observer:expr, $cancelled:expr, $state:expr) => {{
        if $cancelled.load(Ordering::Acquire) {
            return RunOutcome::Cancelled;
        }
        debug!("run stage {}", $state);
        $observer($state);
    }};
}

macro_rules! try_stage {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(reason) => {
                warn!("inspection failed: {reason}");
                return RunOutcome::Failed(reason.into());
            }
        }
    };
}

#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(run = id, sample = %request.sample_id))
)]
async fn execute(
    inner: &Arc<SessionInner>,
    id: u64,
    request: InspectionRequest,
    observer: &ProgressObserver,
    cancelled: &AtomicBool,
) -> RunOutcome {
    let InspectionRequest {
        sample_id,
        side,
        test_frame,
        test_image_path,
    } = request;
    let supplied = test_frame.is_some();
    let params = &inner.config.inspection;

    stage!(observer, cancelled, RunState::Locating);
    let Some(first) = test_frame.or_else(|| inner.frames.next_frame()) else {
        return RunOutcome::Failed(InspectionFailure::NoFrame);
    };
    let first_size = first.size();
    let Some(first) = inner.hold(id, first) else {
        return RunOutcome::Cancelled;
    };
    let board = {
        let (inner, first) = (Arc::clone(inner), Arc::clone(&first));
        try_stage!(blocking(move || inner.locator.locate(&first)).await)
    };
    if board.is_none() {
        if params.require_board {
            info!("no board located, sample {sample_id} not inspected");
            return RunOutcome::UnknownBoard;
        }
        debug!("no board located, inspecting the full frame");
    }

    let mut zoom = inner.zoom.load();
    if let (true, Some(board)) = (params.auto_zoom, board.as_ref()) {
        stage!(observer, cancelled, RunState::Zooming);
        let level = inner.planner.plan(first_size, &board.bounding_box);
        zoom = if supplied {
            // A supplied frame is already captured; only software zoom reaches it.
            ZoomState {
                level,
                applied_via_hardware: false,
            }
        } else {
            inner.set_zoom(level)
        };
    }

    stage!(observer, cancelled, RunState::Capturing);
    let test = if supplied {
        Frame::clone(&first)
    } else {
        match inner.frames.next_frame() {
            Some(frame) => frame,
            None => return RunOutcome::Failed(InspectionFailure::NoFrame),
        }
    };
    drop(first);
    let test = {
        let inner_c = Arc::clone(inner);
        let enhance = params.enhance_capture;
        try_stage!(
            blocking(move || {
                let zoomed = inner_c.zoomed(test, zoom);
                if enhance {
                    enhance_capture(&zoomed)
                } else {
                    zoomed
                }
            })
            .await
        )
    };
    let Some(test) = inner.hold(id, test) else {
        return RunOutcome::Cancelled;
    };

    stage!(observer, cancelled, RunState::Aligning);
    let sample = match inner.samples.get_sample(&sample_id).await {
        Ok(Some(sample)) => sample,
        Ok(None) => return RunOutcome::Failed(InspectionFailure::SampleNotFound(sample_id)),
        Err(e) => return RunOutcome::Failed(InspectionFailure::SampleStore(e.to_string())),
    };
    let reference_path = sample.reference_path(side);
    let Some(reference) = inner.hold(id, sample.reference(side).clone()) else {
        return RunOutcome::Cancelled;
    };
    drop(sample);
    let (aligned, alignment) = {
        let (inner, reference, test) = (Arc::clone(inner), Arc::clone(&reference), Arc::clone(&test));
        try_stage!(blocking(move || inner.aligner.align(&reference, &test)).await)
    };
    if let Some(reason) = alignment.failure {
        warn!("alignment against {sample_id} failed: {reason}");
        return RunOutcome::Failed(InspectionFailure::Alignment(reason));
    }
    drop(test);
    let Some(aligned) = inner.hold(id, aligned) else {
        return RunOutcome::Cancelled;
    };

    stage!(observer, cancelled, RunState::Comparing);
    let comparison = {
        let (inner, reference, aligned) =
            (Arc::clone(inner), Arc::clone(&reference), Arc::clone(&aligned));
        try_stage!(blocking(move || inner.comparator.compare(&reference, &aligned)).await)
    };
    let comparison = try_stage!(comparison);

    stage!(observer, cancelled, RunState::Classifying);
    let (analysis, comparison) = {
        let inner = Arc::clone(inner);
        try_stage!(
            blocking(move || {
                let analysis = inner.classifier.classify(&reference, &aligned, &comparison);
                (analysis, comparison)
            })
            .await
        )
    };

    let remote_judgment = match (&inner.judge, &test_image_path) {
        (Some(judge), Some(test_path)) => {
            stage!(observer, cancelled, RunState::AwaitingRemoteJudge);
            let verdict = judge.compare(test_path, &reference_path).await;
            if verdict.succeeded {
                RemoteJudgment::Available {
                    opinion: structured_opinion(verdict.opinion),
                }
            } else {
                warn!("remote judge unavailable for {}", test_path.display());
                RemoteJudgment::Unavailable {
                    reason: "remote judge reported failure".to_string(),
                }
            }
        }
        _ => RemoteJudgment::Skipped,
    };
    if cancelled.load(Ordering::Acquire) {
        return RunOutcome::Cancelled;
    }

    let report = InspectionReport::assemble(ReportParts {
        sample_id,
        board_side: side,
        test_image_path,
        comparison,
        analysis,
        alignment: AlignmentSummary::from(&alignment),
        board,
        zoom_level: zoom.level,
        remote_judgment,
    });
    info!(
        "inspection {} {:?}: similarity {:.4}, {} defects, severity {}",
        report.inspection_id,
        report.overall_result,
        report.similarity_score,
        report.total_defects(),
        report.severity
    );
    RunOutcome::Complete(Box::new(report))
}

/// Per-channel histogram equalization followed by a 3x3 Gaussian blur.
fn enhance_capture(frame: &Frame) -> Frame {
    let src = frame.image();
    let (w, h) = src.dimensions();
    let mut out = RgbImage::new(w, h);
    for c in 0..3 {
        let channel = GrayImage::from_fn(w, h, |x, y| Luma([src.get_pixel(x, y)[c]]));
        let channel = raster::gaussian_blur(&raster::equalize_histogram(&channel), 0.8);
        for (x, y, p) in channel.enumerate_pixels() {
            out.get_pixel_mut(x, y)[c] = p[0];
        }
    }
    frame.derive(out)
}
