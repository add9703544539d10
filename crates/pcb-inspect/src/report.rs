//! The immutable result of one inspection run.

use crate::judge::JudgeOpinion;
use crate::ports::BoardSide;
use chrono::{DateTime, Utc};
use pcb_inspect_align::{AlignFailure, AlignmentResult};
use pcb_inspect_board::BoardCandidate;
use pcb_inspect_compare::{ComparisonResult, Defect, DefectAnalysis, Severity};
use pcb_inspect_core::Homography;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OverallResult {
    Pass,
    Fail,
}

/// What became of the optional second opinion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteJudgment {
    /// No judge configured or no test image on disk to send.
    #[default]
    Skipped,
    Unavailable { reason: String },
    Available { opinion: serde_json::Value },
}

impl RemoteJudgment {
    /// The opinion in its usual shape, when one is available and parses.
    pub fn opinion(&self) -> Option<JudgeOpinion> {
        match self {
            RemoteJudgment::Available { opinion } => {
                serde_json::from_value(opinion.clone()).ok()
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentSummary {
    pub succeeded: bool,
    /// Inlying good matches.
    pub match_count: usize,
    pub good_matches: usize,
    /// Maps test pixels onto reference pixels.
    pub homography: Option<Homography>,
    pub failure: Option<AlignFailure>,
}

impl From<&AlignmentResult> for AlignmentSummary {
    fn from(r: &AlignmentResult) -> Self {
        Self {
            succeeded: r.succeeded,
            match_count: r.match_count,
            good_matches: r.good_matches,
            homography: r.homography,
            failure: r.failure,
        }
    }
}

/// One inspection, end to end.
///
/// Every computed field comes from the vision pipeline; the remote judgment
/// rides along and never changes them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InspectionReport {
    /// `insp_YYYYMMDD_HHMMSS`.
    pub inspection_id: String,
    pub sample_id: String,
    pub board_side: BoardSide,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_image_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
    pub overall_result: OverallResult,
    pub similarity_score: f64,
    pub difference_percentage: f64,
    pub comparison: ComparisonResult,
    pub defects: Vec<Defect>,
    pub severity: Severity,
    pub total_regions_analyzed: usize,
    pub recommendations: Vec<String>,
    pub alignment: AlignmentSummary,
    /// Board found in the capture, `None` when the whole frame was used.
    pub board: Option<BoardCandidate>,
    pub zoom_level: f32,
    pub remote_judgment: RemoteJudgment,
}

/// Inputs the orchestrator gathered during a run.
pub(crate) struct ReportParts {
    pub sample_id: String,
    pub board_side: BoardSide,
    pub test_image_path: Option<PathBuf>,
    pub comparison: ComparisonResult,
    pub analysis: DefectAnalysis,
    pub alignment: AlignmentSummary,
    pub board: Option<BoardCandidate>,
    pub zoom_level: f32,
    pub remote_judgment: RemoteJudgment,
}

impl InspectionReport {
    pub(crate) fn assemble(parts: ReportParts) -> Self {
        let timestamp = Utc::now();
        let ReportParts {
            sample_id,
            board_side,
            test_image_path,
            comparison,
            analysis,
            alignment,
            board,
            zoom_level,
            remote_judgment,
        } = parts;
        let recommendations = analysis.recommendations();
        Self {
            inspection_id: format!("insp_{}", timestamp.format("%Y%m%d_%H%M%S")),
            sample_id,
            board_side,
            test_image_path,
            timestamp,
            overall_result: if comparison.passed {
                OverallResult::Pass
            } else {
                OverallResult::Fail
            },
            similarity_score: comparison.similarity_score,
            difference_percentage: comparison.difference_percentage,
            total_regions_analyzed: comparison.total_regions(),
            comparison,
            severity: analysis.severity,
            defects: analysis.defects,
            recommendations,
            alignment,
            board,
            zoom_level,
            remote_judgment,
        }
    }

    #[inline]
    pub fn passed(&self) -> bool {
        self.overall_result == OverallResult::Pass
    }

    #[inline]
    pub fn total_defects(&self) -> usize {
        self.defects.len()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcb_inspect_compare::DefectType;
    use pcb_inspect_core::BoundingBox;

    fn parts(passed: bool, defects: Vec<Defect>) -> ReportParts {
        ReportParts {
            sample_id: "sample_20240101_120000_demo".into(),
            board_side: BoardSide::Back,
            test_image_path: None,
            comparison: ComparisonResult {
                similarity_score: if passed { 0.99 } else { 0.6 },
                difference_percentage: if passed { 0.0 } else { 12.5 },
                regions: Vec::new(),
                threshold: 0.95,
                passed,
            },
            analysis: DefectAnalysis::from_defects(defects),
            alignment: AlignmentSummary {
                succeeded: true,
                match_count: 42,
                good_matches: 50,
                homography: Some(Homography::identity()),
                failure: None,
            },
            board: None,
            zoom_level: 1.0,
            remote_judgment: RemoteJudgment::Skipped,
        }
    }

    #[test]
    fn passing_report() {
        let report = InspectionReport::assemble(parts(true, Vec::new()));
        assert!(report.passed());
        assert!(report.inspection_id.starts_with("insp_"));
        assert_eq!(report.inspection_id.len(), "insp_YYYYMMDD_HHMMSS".len());
        assert_eq!(report.severity, Severity::None);
        assert_eq!(
            report.recommendations,
            vec!["Board passes inspection - no defects detected"]
        );
    }

    #[test]
    fn failing_report_json_shape() {
        let defect = Defect {
            region_id: 0,
            bounding_box: BoundingBox::new(1, 2, 30, 40),
            defect_type: DefectType::SolderingDefect,
            similarity: 0.8,
            confidence: 0.2,
        };
        let report = InspectionReport::assemble(parts(false, vec![defect]));
        let json: serde_json::Value =
            serde_json::from_str(&report.to_json().expect("json")).expect("parse");
        assert_eq!(json["overall_result"], "FAIL");
        assert_eq!(json["severity"], "medium");
        assert_eq!(json["board_side"], "back");
        assert_eq!(json["remote_judgment"]["status"], "skipped");
        assert_eq!(json["defects"][0]["defect_type"], "soldering_defect");
        assert!(json.get("test_image_path").is_none());
    }

    #[test]
    fn available_judgment_exposes_opinion() {
        let judgment = RemoteJudgment::Available {
            opinion: serde_json::json!({ "overall_quality": "pass", "confidence_score": 0.8 }),
        };
        let opinion = judgment.opinion().expect("opinion");
        assert_eq!(opinion.overall_quality, "pass");
        assert!(RemoteJudgment::Skipped.opinion().is_none());
    }
}
