//! JSON configuration for an inspection session.

use pcb_inspect_align::AlignerParams;
use pcb_inspect_board::{ComponentParams, LocatorParams, ZoomParams};
use pcb_inspect_compare::{ClassifierParams, ComparatorParams};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Run-level switches of the orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionParams {
    /// End the run as "unknown board" when no board is located. When false
    /// the whole frame is inspected instead.
    pub require_board: bool,
    /// Zoom to the located board before capturing the test frame.
    pub auto_zoom: bool,
    /// Histogram-equalize and lightly blur the captured test frame.
    pub enhance_capture: bool,
}

impl Default for InspectionParams {
    fn default() -> Self {
        Self {
            require_board: true,
            auto_zoom: true,
            enhance_capture: false,
        }
    }
}

/// Every tunable of the pipeline in one document.
///
/// All sections are optional in JSON; missing fields keep their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    pub locator: LocatorParams,
    pub zoom: ZoomParams,
    pub components: ComponentParams,
    pub aligner: AlignerParams,
    pub comparator: ComparatorParams,
    pub classifier: ClassifierParams,
    pub inspection: InspectionParams,
}

impl InspectorConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("inspector.json");

        let mut cfg = InspectorConfig::default();
        cfg.comparator.threshold = 0.9;
        cfg.locator.area_weight = 0.5;
        cfg.inspection.require_board = false;
        cfg.write_json(&path).expect("write");

        assert_eq!(InspectorConfig::load_json(&path).expect("load"), cfg);
    }

    #[test]
    fn sparse_document_keeps_defaults() {
        let cfg: InspectorConfig = serde_json::from_str(
            r#"{ "classifier": { "missing_below": 0.25 }, "zoom": { "max_zoom": 3.0 } }"#,
        )
        .expect("parse");
        assert_eq!(cfg.classifier.missing_below, 0.25);
        assert_eq!(cfg.classifier.misaligned_below, 0.7);
        assert_eq!(cfg.zoom.max_zoom, 3.0);
        assert_eq!(cfg.zoom.min_zoom, 0.5);
        assert_eq!(cfg.aligner.ratio, 0.75);
        assert!(cfg.inspection.require_board);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = InspectorConfig::load_json("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
