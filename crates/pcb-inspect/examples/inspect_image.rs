//! Inspect a still image against a stored QA sample.
//!
//! ```text
//! cargo run -p pcb-inspect --example inspect_image -- inspect.json
//! ```
//!
//! The JSON names the sample store root, the sample id, the test image and
//! optionally an `inspector` section with [`InspectorConfig`] overrides.

use std::{env, path::PathBuf, sync::Arc};

use image::ImageReader;
use pcb_inspect::{
    BoardSide, CameraCapabilities, DirSampleStore, Frame, FrameSource, InspectionRequest,
    InspectionSession, InspectorConfig, RunOutcome,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ExampleConfig {
    sample_root: PathBuf,
    sample_id: String,
    test_image: PathBuf,
    #[serde(default)]
    side: BoardSide,
    #[serde(default)]
    output_path: Option<PathBuf>,
    #[serde(default)]
    inspector: InspectorConfig,
}

/// A "camera" that keeps showing one image.
struct StillImage(Frame);

impl FrameSource for StillImage {
    fn next_frame(&self) -> Option<Frame> {
        Some(self.0.clone())
    }

    fn capabilities(&self) -> CameraCapabilities {
        CameraCapabilities::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "testdata/inspect.json".to_string());
    let cfg: ExampleConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;

    let image = ImageReader::open(&cfg.test_image)?
        .with_guessed_format()?
        .decode()?
        .to_rgb8();
    let camera = Arc::new(StillImage(Frame::new(image)));
    let store = Arc::new(DirSampleStore::new(&cfg.sample_root)?);
    let session = InspectionSession::new(camera, store, None, cfg.inspector);

    let request = InspectionRequest::new(cfg.sample_id)
        .with_side(cfg.side)
        .with_test_image_path(&cfg.test_image);
    let outcome = session
        .run_inspection(request, |state| println!("-> {state}"))
        .await?;

    match outcome {
        RunOutcome::Complete(report) => {
            println!(
                "{:?}: similarity {:.4}, {} defects, severity {}",
                report.overall_result,
                report.similarity_score,
                report.total_defects(),
                report.severity
            );
            for line in &report.recommendations {
                println!("  {line}");
            }
            if let Some(path) = cfg.output_path {
                report.write_json(&path)?;
                println!("wrote report to {}", path.display());
            }
        }
        RunOutcome::UnknownBoard => println!("no board found in {}", cfg.test_image.display()),
        RunOutcome::Failed(reason) => println!("inspection failed: {reason}"),
        RunOutcome::Cancelled => println!("inspection cancelled"),
    }
    Ok(())
}

fn init_logging() {
    #[cfg(feature = "tracing")]
    pcb_inspect::init_tracing(false);
    #[cfg(not(feature = "tracing"))]
    let _ = pcb_inspect::init_from_env(log::LevelFilter::Info);
}
