use async_trait::async_trait;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use pcb_inspect::{
    AlignFailure, BoardSide, CameraCapabilities, DefectType, FocusMode, Frame, FrameSource,
    ImagePaths, InspectionFailure, InspectionRequest, InspectionSession, InspectorConfig,
    InspectionHandle, JudgeVerdict, QaSample, RemoteJudge, RemoteJudgment, RunOutcome, RunState, SampleMetadata,
    SampleStore, SampleStoreError, SampleSummary, Severity, StartError,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Notify;

// ---------- fixtures ----------

/// Deterministic blocky texture: 8x8 cells of pseudo-random gray.
fn texture(w: u32, h: u32, seed: u32) -> RgbImage {
    let cell = |cx: u32, cy: u32| -> u8 {
        let mut v = cx.wrapping_mul(73_856_093) ^ cy.wrapping_mul(19_349_663) ^ seed;
        v ^= v >> 13;
        v = v.wrapping_mul(0x5bd1_e995);
        v ^= v >> 15;
        (v % 220) as u8 + 20
    };
    RgbImage::from_fn(w, h, |x, y| {
        let g = cell(x / 8, y / 8);
        Rgb([g, g, g])
    })
}

fn with_black_block(src: &RgbImage, x0: u32, y0: u32, size: u32) -> RgbImage {
    let mut out = src.clone();
    for y in y0..y0 + size {
        for x in x0..x0 + size {
            out.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }
    out
}

fn board_frame() -> Frame {
    Frame::new(RgbImage::from_fn(640, 480, |x, y| {
        if (180..460).contains(&x) && (130..345).contains(&y) {
            Rgb([220, 220, 220])
        } else {
            Rgb([30, 30, 30])
        }
    }))
}

fn flat_frame() -> Frame {
    Frame::new(RgbImage::from_pixel(320, 240, Rgb([120, 120, 120])))
}

fn full_frame_config() -> InspectorConfig {
    let mut cfg = InspectorConfig::default();
    cfg.inspection.require_board = false;
    cfg.inspection.auto_zoom = false;
    cfg
}

// ---------- fakes ----------

#[derive(Default)]
struct FakeCamera {
    frame: Option<Frame>,
    caps: CameraCapabilities,
    zoom_calls: Mutex<Vec<f32>>,
    focus_calls: Mutex<Vec<FocusMode>>,
}

impl FakeCamera {
    fn showing(frame: Frame) -> Self {
        Self {
            frame: Some(frame),
            ..Self::default()
        }
    }
}

impl FrameSource for FakeCamera {
    fn next_frame(&self) -> Option<Frame> {
        self.frame.clone()
    }

    fn capabilities(&self) -> CameraCapabilities {
        self.caps
    }

    fn set_hardware_zoom(&self, level: f32) -> bool {
        self.zoom_calls.lock().push(level);
        true
    }

    fn set_focus(&self, mode: FocusMode) -> bool {
        self.focus_calls.lock().push(mode);
        true
    }
}

#[derive(Default)]
struct MemoryStore {
    samples: HashMap<String, QaSample>,
    /// When set, lookups signal `entered` and then park until `release`.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl MemoryStore {
    fn with_sample(id: &str, front: Frame) -> Self {
        let metadata = SampleMetadata {
            sample_id: id.to_string(),
            board_name: "demo".to_string(),
            created_date: "2024-01-01T12:00:00.000000".to_string(),
            notes: String::new(),
            tags: Vec::new(),
            image_paths: ImagePaths {
                front: format!("/qa/{id}/front.jpg"),
                back: format!("/qa/{id}/back.jpg"),
            },
            version: "1.0".to_string(),
            last_modified: None,
        };
        let sample = QaSample {
            metadata,
            back: front.clone(),
            front,
        };
        Self {
            samples: HashMap::from([(id.to_string(), sample)]),
            gate: None,
        }
    }

    fn gated(mut self) -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        self.gate = Some((Arc::clone(&entered), Arc::clone(&release)));
        (self, entered, release)
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn get_sample(&self, id: &str) -> Result<Option<QaSample>, SampleStoreError> {
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        Ok(self.samples.get(id).cloned())
    }

    async fn list_samples(&self) -> Result<Vec<SampleSummary>, SampleStoreError> {
        Ok(self
            .samples
            .values()
            .map(|s| SampleSummary {
                id: s.metadata.sample_id.clone(),
                name: s.metadata.board_name.clone(),
            })
            .collect())
    }
}

struct FakeJudge {
    succeeded: bool,
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
}

#[async_trait]
impl RemoteJudge for FakeJudge {
    async fn compare(&self, test: &Path, reference: &Path) -> JudgeVerdict {
        self.calls
            .lock()
            .push((test.to_path_buf(), reference.to_path_buf()));
        JudgeVerdict {
            succeeded: self.succeeded,
            opinion: serde_json::json!({ "overall_quality": "pass", "confidence_score": 0.85 }),
        }
    }
}

/// Answers in prose, the way hosted models often do.
struct ProseJudge;

#[async_trait]
impl RemoteJudge for ProseJudge {
    async fn compare(&self, _test: &Path, _reference: &Path) -> JudgeVerdict {
        JudgeVerdict {
            succeeded: true,
            opinion: serde_json::Value::String(
                "Looks fine overall.\n{\"overall_quality\": \"pass\", \"confidence_score\": 0.92}".into(),
            ),
        }
    }
}

fn recorder() -> (Arc<Mutex<Vec<RunState>>>, impl Fn(RunState) + Send + Sync + 'static) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    (states, move |s| sink.lock().push(s))
}

fn session(camera: FakeCamera, store: MemoryStore, cfg: InspectorConfig) -> InspectionSession {
    InspectionSession::new(Arc::new(camera), Arc::new(store), None, cfg)
}

// ---------- runs ----------

#[tokio::test]
async fn identical_capture_passes() {
    let reference = Frame::new(texture(320, 240, 7));
    let camera = FakeCamera::showing(reference.clone());
    let session = session(camera, MemoryStore::with_sample("s1", reference), full_frame_config());

    let (states, observer) = recorder();
    let outcome = session
        .run_inspection(InspectionRequest::new("s1"), observer)
        .await
        .expect("start");

    let report = outcome.report().expect("complete");
    assert!(report.passed(), "similarity {}", report.similarity_score);
    assert!(report.similarity_score > 0.99);
    assert_eq!(report.severity, Severity::None);
    assert!(report.defects.is_empty());
    assert_eq!(report.total_regions_analyzed, 0);
    assert!(report.alignment.succeeded);
    assert_eq!(report.remote_judgment, RemoteJudgment::Skipped);
    assert_eq!(
        *states.lock(),
        vec![
            RunState::Locating,
            RunState::Capturing,
            RunState::Aligning,
            RunState::Comparing,
            RunState::Classifying,
            RunState::Complete,
            RunState::Idle,
        ]
    );
    assert!(!session.is_busy());
}

#[tokio::test]
async fn missing_block_is_critical() {
    let reference_img = texture(320, 240, 7);
    let test = Frame::new(with_black_block(&reference_img, 100, 60, 100));
    let store = MemoryStore::with_sample("s1", Frame::new(reference_img));
    let session = session(FakeCamera::default(), store, full_frame_config());

    let request = InspectionRequest::new("s1").with_test_frame(test);
    let outcome = session.run_inspection(request, |_| {}).await.expect("start");
    let report = outcome.report().expect("complete");

    assert!(!report.passed());
    assert!(report.total_regions_analyzed >= 1);
    assert_eq!(report.severity, Severity::Critical);
    assert!(report
        .defects
        .iter()
        .any(|d| d.defect_type == DefectType::MissingComponent));
    for defect in &report.defects {
        assert!(report.comparison.region(defect.region_id).is_some());
    }
    assert_eq!(
        report.recommendations[0],
        "CRITICAL: Missing components detected - board requires rework"
    );
}

#[tokio::test]
async fn remote_judge_is_merged_without_changing_the_result() {
    let reference = Frame::new(texture(320, 240, 7));
    for succeeded in [true, false] {
        let judge = Arc::new(FakeJudge {
            succeeded,
            calls: Mutex::new(Vec::new()),
        });
        let session = InspectionSession::new(
            Arc::new(FakeCamera::default()),
            Arc::new(MemoryStore::with_sample("s1", reference.clone())),
            Some(judge.clone() as Arc<dyn RemoteJudge>),
            full_frame_config(),
        );
        let (states, observer) = recorder();
        let request = InspectionRequest::new("s1")
            .with_side(BoardSide::Back)
            .with_test_frame(reference.clone())
            .with_test_image_path("/captures/test.png");
        let outcome = session.run_inspection(request, observer).await.expect("start");
        let report = outcome.report().expect("complete");

        assert!(report.passed());
        assert_eq!(report.board_side, BoardSide::Back);
        let states = states.lock();
        assert_eq!(
            states[states.len() - 3..],
            [RunState::AwaitingRemoteJudge, RunState::Complete, RunState::Idle]
        );
        assert_eq!(
            *judge.calls.lock(),
            vec![(
                PathBuf::from("/captures/test.png"),
                PathBuf::from("/qa/s1/back.jpg")
            )]
        );
        if succeeded {
            let opinion = report.remote_judgment.opinion().expect("opinion");
            assert_eq!(opinion.overall_quality, "pass");
        } else {
            assert!(matches!(
                report.remote_judgment,
                RemoteJudgment::Unavailable { .. }
            ));
        }
    }
}

#[tokio::test]
async fn prose_judge_answers_are_parsed() {
    let reference = Frame::new(texture(320, 240, 7));
    let session = InspectionSession::new(
        Arc::new(FakeCamera::default()),
        Arc::new(MemoryStore::with_sample("s1", reference.clone())),
        Some(Arc::new(ProseJudge) as Arc<dyn RemoteJudge>),
        full_frame_config(),
    );
    let request = InspectionRequest::new("s1")
        .with_test_frame(reference)
        .with_test_image_path("/captures/test.png");
    let outcome = session.run_inspection(request, |_| {}).await.expect("start");

    let report = outcome.report().expect("complete");
    let opinion = report.remote_judgment.opinion().expect("opinion");
    assert_eq!(opinion.overall_quality, "pass");
    assert_eq!(opinion.confidence_score, 0.92);
}

#[tokio::test]
async fn judge_is_skipped_without_a_test_image_path() {
    let reference = Frame::new(texture(320, 240, 7));
    let judge = Arc::new(FakeJudge {
        succeeded: true,
        calls: Mutex::new(Vec::new()),
    });
    let session = InspectionSession::new(
        Arc::new(FakeCamera::showing(reference.clone())),
        Arc::new(MemoryStore::with_sample("s1", reference)),
        Some(judge.clone() as Arc<dyn RemoteJudge>),
        full_frame_config(),
    );
    let (states, observer) = recorder();
    let outcome = session
        .run_inspection(InspectionRequest::new("s1"), observer)
        .await
        .expect("start");

    assert_eq!(outcome.report().expect("complete").remote_judgment, RemoteJudgment::Skipped);
    assert!(judge.calls.lock().is_empty());
    assert!(!states.lock().contains(&RunState::AwaitingRemoteJudge));
}

#[tokio::test]
async fn no_board_is_unknown_board_not_failure() {
    let store = MemoryStore::with_sample("s1", flat_frame());
    let session = session(FakeCamera::showing(flat_frame()), store, InspectorConfig::default());

    let (states, observer) = recorder();
    let outcome = session
        .run_inspection(InspectionRequest::new("s1"), observer)
        .await
        .expect("start");
    assert_eq!(outcome, RunOutcome::UnknownBoard);
    assert_eq!(
        *states.lock(),
        vec![RunState::Locating, RunState::UnknownBoard, RunState::Idle]
    );
}

#[tokio::test]
async fn board_run_zooms_before_capturing() {
    let store = MemoryStore::with_sample("s1", board_frame());
    let session = session(FakeCamera::showing(board_frame()), store, InspectorConfig::default());

    let (states, observer) = recorder();
    let outcome = session
        .run_inspection(InspectionRequest::new("s1"), observer)
        .await
        .expect("start");

    let states = states.lock();
    assert_eq!(
        states[..4],
        [
            RunState::Locating,
            RunState::Zooming,
            RunState::Capturing,
            RunState::Aligning
        ]
    );
    assert!(states[states.len() - 2].is_terminal());
    assert_eq!(states[states.len() - 1], RunState::Idle);
    assert!(session.zoom().level > 1.0);
    assert!(!session.zoom().applied_via_hardware);
    if let Some(report) = outcome.report() {
        assert!(report.board.is_some());
        assert_eq!(report.zoom_level, session.zoom().level);
    }
}

#[tokio::test]
async fn failures_keep_their_reason() {
    // camera gives nothing
    let session1 = session(FakeCamera::default(), MemoryStore::default(), full_frame_config());
    let (states, observer) = recorder();
    let outcome = session1
        .run_inspection(InspectionRequest::new("s1"), observer)
        .await
        .expect("start");
    assert_eq!(outcome.failure(), Some(&InspectionFailure::NoFrame));
    assert_eq!(
        *states.lock(),
        vec![RunState::Locating, RunState::Failed, RunState::Idle]
    );

    // stale sample id
    let reference = Frame::new(texture(320, 240, 7));
    let session2 = session(
        FakeCamera::showing(reference.clone()),
        MemoryStore::with_sample("s1", reference.clone()),
        full_frame_config(),
    );
    let outcome = session2
        .run_inspection(InspectionRequest::new("nope"), |_| {})
        .await
        .expect("start");
    assert_eq!(
        outcome,
        RunOutcome::Failed(InspectionFailure::SampleNotFound("nope".into()))
    );

    // featureless capture
    let request = InspectionRequest::new("s1").with_test_frame(flat_frame());
    let outcome = session2.run_inspection(request, |_| {}).await.expect("start");
    assert_eq!(
        outcome.failure(),
        Some(&InspectionFailure::Alignment(AlignFailure::NoFeatures))
    );
    assert!(!session2.is_busy());
}

// ---------- concurrency ----------

#[tokio::test]
async fn second_run_is_rejected_while_busy() {
    let reference = Frame::new(texture(320, 240, 7));
    let (store, entered, release) = MemoryStore::with_sample("s1", reference.clone()).gated();
    let session = session(FakeCamera::showing(reference), store, full_frame_config());

    let (states, observer) = recorder();
    let first = session
        .start_inspection(InspectionRequest::new("s1"), observer)
        .expect("first run starts");
    entered.notified().await;
    assert!(session.is_busy());

    let second = session.start_inspection(InspectionRequest::new("s1"), |_| {});
    assert_eq!(second.err(), Some(StartError::Busy));

    release.notify_one();
    let outcome = first.wait().await;
    assert!(outcome.report().is_some(), "{outcome:?}");
    let states = states.lock();
    assert_eq!(states[states.len() - 2..], [RunState::Complete, RunState::Idle]);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn terminal_observer_can_start_the_next_run() {
    let reference = Frame::new(texture(320, 240, 7));
    let session = session(
        FakeCamera::showing(reference.clone()),
        MemoryStore::with_sample("s1", reference),
        full_frame_config(),
    );

    let follow_up: Arc<Mutex<Option<Result<InspectionHandle, StartError>>>> =
        Arc::new(Mutex::new(None));
    let (slot, next) = (Arc::clone(&follow_up), session.clone());
    let first = session
        .start_inspection(InspectionRequest::new("s1"), move |state| {
            if state.is_terminal() {
                *slot.lock() = Some(next.start_inspection(InspectionRequest::new("s1"), |_| {}));
            }
        })
        .expect("first run starts");

    assert!(first.wait().await.report().is_some());
    let second = follow_up
        .lock()
        .take()
        .expect("observer saw the terminal state")
        .expect("slot was free");
    assert!(second.wait().await.report().is_some());
    assert!(!session.is_busy());
}

#[tokio::test]
async fn cancel_frees_the_session_immediately() {
    let reference = Frame::new(texture(320, 240, 7));
    let (store, entered, _release) = MemoryStore::with_sample("s1", reference.clone()).gated();
    let session = session(FakeCamera::showing(reference), store, full_frame_config());

    let (states, observer) = recorder();
    let handle = session
        .start_inspection(InspectionRequest::new("s1"), observer)
        .expect("start");
    entered.notified().await;
    assert!(session.is_busy());

    handle.cancel();
    assert!(!session.is_busy());
    assert_eq!(handle.wait().await, RunOutcome::Cancelled);
    let states = states.lock();
    assert_eq!(states.last(), Some(&RunState::Idle));
    assert!(!states.iter().any(|s| s.is_terminal()));
}

#[test]
fn starting_outside_a_runtime_is_an_error() {
    let session = session(FakeCamera::default(), MemoryStore::default(), full_frame_config());
    let result = session.start_inspection(InspectionRequest::new("s1"), |_| {});
    assert_eq!(result.err(), Some(StartError::NoRuntime));
    assert!(!session.is_busy());
}

// ---------- camera pass-throughs ----------

#[test]
fn software_zoom_saturates_and_keeps_frame_size() {
    let camera = FakeCamera::showing(Frame::new(texture(320, 240, 1)));
    let session = session(camera, MemoryStore::default(), InspectorConfig::default());

    assert_eq!(session.zoom().level, 1.0);
    let state = session.set_zoom(10.0);
    assert_eq!(state.level, 4.0);
    assert!(!state.applied_via_hardware);
    assert_eq!(session.set_zoom(0.1).level, 0.5);

    session.reset_zoom();
    approx::assert_relative_eq!(session.zoom_in(None).level, 1.2);
    approx::assert_relative_eq!(session.zoom_out(None).level, 1.0);

    session.set_zoom(2.0);
    let preview = session.next_frame().expect("frame");
    assert_eq!((preview.width(), preview.height()), (320, 240));
}

#[test]
fn concurrent_zoom_steps_all_land() {
    let session = session(FakeCamera::default(), MemoryStore::default(), InspectorConfig::default());
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..3 {
                    session.zoom_in(Some(1.1));
                }
            });
        }
    });
    let expected = (0..12).fold(1.0_f32, |level, _| (level * 1.1).clamp(0.5, 4.0));
    assert_eq!(session.zoom().level, expected);
}

#[test]
fn hardware_zoom_is_used_when_supported() {
    let camera = Arc::new(FakeCamera {
        caps: CameraCapabilities {
            hardware_zoom_supported: true,
            ..CameraCapabilities::default()
        },
        ..FakeCamera::default()
    });
    let session = InspectionSession::new(
        camera.clone(),
        Arc::new(MemoryStore::default()),
        None,
        InspectorConfig::default(),
    );
    let state = session.set_zoom(2.5);
    assert!(state.applied_via_hardware);
    assert_eq!(*camera.zoom_calls.lock(), vec![2.5]);
    assert_eq!(session.camera_snapshot().zoom, state);
}

#[test]
fn auto_zoom_frames_the_board() {
    let session = session(FakeCamera::default(), MemoryStore::default(), InspectorConfig::default());
    let board = session.auto_zoom_to_board(&board_frame()).expect("board");
    assert!(board.confidence >= 0.7);
    let level = session.zoom().level;
    assert!(level > 1.0 && level <= 4.0, "{level}");

    assert!(session.auto_zoom_to_board(&flat_frame()).is_none());
    assert_eq!(session.zoom().level, level);
}

#[test]
fn focus_is_only_forwarded_when_supported() {
    let plain = Arc::new(FakeCamera::default());
    let session1 = InspectionSession::new(
        plain.clone(),
        Arc::new(MemoryStore::default()),
        None,
        InspectorConfig::default(),
    );
    assert!(!session1.set_focus_mode(FocusMode::Auto));
    assert!(!session1.set_focus_mode(FocusMode::Manual(0.4)));
    assert!(plain.focus_calls.lock().is_empty());

    let manual = Arc::new(FakeCamera {
        caps: CameraCapabilities {
            manual_focus_supported: true,
            ..CameraCapabilities::default()
        },
        ..FakeCamera::default()
    });
    let session2 = InspectionSession::new(
        manual.clone(),
        Arc::new(MemoryStore::default()),
        None,
        InspectorConfig::default(),
    );
    assert!(session2.set_focus_mode(FocusMode::Manual(1.5)));
    assert!(!session2.set_focus_mode(FocusMode::Auto));
    assert_eq!(session2.camera_snapshot().focus, FocusMode::Manual(1.0));
    assert_eq!(*manual.focus_calls.lock(), vec![FocusMode::Manual(1.0)]);
}

#[test]
fn components_are_reported() {
    let frame = Frame::new(RgbImage::from_fn(400, 300, |x, y| {
        if (100..160).contains(&x) && (100..160).contains(&y) {
            Rgb([230, 230, 230])
        } else {
            Rgb([20, 20, 20])
        }
    }));
    let session = session(FakeCamera::default(), MemoryStore::default(), InspectorConfig::default());
    let components = session.detect_components(&frame);
    assert!(!components.is_empty());
}
