use crate::comparator::{gray_matching, ComparisonResult, RegionOfInterest};
use crate::ssim::{ssim, SsimParams};
use log::debug;
use pcb_inspect_core::{raster, BoundingBox, Frame};
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Local-similarity bands used to name a defect.
///
/// A region scoring at or above `soldering_below` is not recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierParams {
    pub missing_below: f64,
    pub misaligned_below: f64,
    pub soldering_below: f64,
    pub ssim: SsimParams,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            missing_below: 0.3,
            misaligned_below: 0.7,
            soldering_below: 0.9,
            ssim: SsimParams::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectType {
    MissingComponent,
    MisalignedComponent,
    SolderingDefect,
    /// The region was too thin for a windowed similarity.
    Unknown,
}

/// Worst-case summary of a defect set. Ordered from benign to worst.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    /// Id of the [`RegionOfInterest`] this defect was derived from.
    pub region_id: usize,
    pub bounding_box: BoundingBox,
    pub defect_type: DefectType,
    pub similarity: f64,
    /// `1 - similarity`.
    pub confidence: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DefectAnalysis {
    pub defects: Vec<Defect>,
    pub severity: Severity,
}

impl DefectAnalysis {
    pub fn from_defects(defects: Vec<Defect>) -> Self {
        let severity = severity_of(&defects);
        Self { defects, severity }
    }

    #[inline]
    pub fn total_defects(&self) -> usize {
        self.defects.len()
    }

    pub fn recommendations(&self) -> Vec<String> {
        recommendations(self.severity, self.defects.len())
    }
}

#[derive(Clone, Debug, Default)]
pub struct DefectClassifier {
    params: ClassifierParams,
}

impl DefectClassifier {
    pub fn new(params: ClassifierParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }

    /// Name the defect in every region of `comparison` and roll up severity.
    ///
    /// Only regions of `comparison` are visited, so every defect refers to one
    /// of them.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(regions = comparison.regions.len()))
    )]
    pub fn classify(
        &self,
        reference: &Frame,
        aligned: &Frame,
        comparison: &ComparisonResult,
    ) -> DefectAnalysis {
        let (w, h) = (reference.width(), reference.height());
        let ref_gray = reference.to_gray();
        let test_gray = gray_matching(aligned, w, h);

        let defects: Vec<Defect> = comparison
            .regions
            .iter()
            .filter_map(|region| self.classify_region(&ref_gray, &test_gray, region))
            .collect();

        let analysis = DefectAnalysis::from_defects(defects);
        debug!(
            "{} defects over {} regions, severity {}",
            analysis.total_defects(),
            comparison.regions.len(),
            analysis.severity
        );
        analysis
    }

    fn classify_region(
        &self,
        ref_gray: &image::GrayImage,
        test_gray: &image::GrayImage,
        region: &RegionOfInterest,
    ) -> Option<Defect> {
        let bbox = region
            .bounding_box
            .clamp_to(ref_gray.width(), ref_gray.height())?;
        let a = raster::crop_gray(ref_gray, bbox.x, bbox.y, bbox.w, bbox.h);
        let b = raster::crop_gray(test_gray, bbox.x, bbox.y, bbox.w, bbox.h);

        let p = &self.params;
        let (defect_type, similarity) = match ssim(&a, &b, &p.ssim) {
            Some(local) => {
                let s = local.score;
                let kind = if s < p.missing_below {
                    DefectType::MissingComponent
                } else if s < p.misaligned_below {
                    DefectType::MisalignedComponent
                } else if s < p.soldering_below {
                    DefectType::SolderingDefect
                } else {
                    return None;
                };
                (kind, s)
            }
            None => (DefectType::Unknown, mean_abs_similarity(&a, &b)),
        };

        Some(Defect {
            region_id: region.id,
            bounding_box: region.bounding_box,
            defect_type,
            similarity,
            confidence: 1.0 - similarity,
        })
    }
}

/// `1 - mean|a - b| / 255`, used when a crop is too thin for windowed SSIM.
fn mean_abs_similarity(a: &image::GrayImage, b: &image::GrayImage) -> f64 {
    let n = a.as_raw().len().max(1) as f64;
    let diff: f64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| (x as f64 - y as f64).abs())
        .sum();
    1.0 - diff / (255.0 * n)
}

/// Highest-priority severity present in `defects`.
pub fn severity_of(defects: &[Defect]) -> Severity {
    defects
        .iter()
        .map(|d| match d.defect_type {
            DefectType::MissingComponent => Severity::Critical,
            DefectType::MisalignedComponent => Severity::High,
            DefectType::SolderingDefect => Severity::Medium,
            DefectType::Unknown => Severity::Low,
        })
        .max()
        .unwrap_or(Severity::None)
}

/// Operator guidance for a severity and defect count.
pub fn recommendations(severity: Severity, total_defects: usize) -> Vec<String> {
    if total_defects == 0 {
        return vec!["Board passes inspection - no defects detected".to_string()];
    }
    let headline = match severity {
        Severity::Critical => Some("CRITICAL: Missing components detected - board requires rework"),
        Severity::High => {
            Some("HIGH: Component misalignment detected - manual inspection recommended")
        }
        Severity::Medium => Some("MEDIUM: Soldering defects detected - review soldering quality"),
        Severity::Low => Some("LOW: Minor defects detected - board may be acceptable"),
        Severity::None => None,
    };
    headline
        .map(str::to_string)
        .into_iter()
        .chain(std::iter::once(format!("Total defects found: {total_defects}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defect(region_id: usize, defect_type: DefectType) -> Defect {
        Defect {
            region_id,
            bounding_box: BoundingBox::new(0, 0, 10, 10),
            defect_type,
            similarity: 0.5,
            confidence: 0.5,
        }
    }

    #[test]
    fn severity_takes_the_worst_defect() {
        use DefectType::*;
        assert_eq!(severity_of(&[]), Severity::None);
        assert_eq!(severity_of(&[defect(0, Unknown)]), Severity::Low);
        assert_eq!(
            severity_of(&[defect(0, Unknown), defect(1, SolderingDefect)]),
            Severity::Medium
        );
        assert_eq!(
            severity_of(&[defect(0, SolderingDefect), defect(1, MisalignedComponent)]),
            Severity::High
        );
    }

    #[test]
    fn missing_component_always_critical() {
        use DefectType::*;
        let sets: [&[DefectType]; 4] = [
            &[],
            &[Unknown],
            &[SolderingDefect, Unknown],
            &[MisalignedComponent, SolderingDefect, MissingComponent],
        ];
        for set in sets {
            let mut defects: Vec<_> = set.iter().enumerate().map(|(i, &t)| defect(i, t)).collect();
            defects.push(defect(defects.len(), MissingComponent));
            assert_eq!(severity_of(&defects), Severity::Critical);
        }
    }

    #[test]
    fn recommendations_follow_severity() {
        assert_eq!(
            recommendations(Severity::None, 0),
            vec!["Board passes inspection - no defects detected"]
        );
        assert_eq!(
            recommendations(Severity::Critical, 3),
            vec![
                "CRITICAL: Missing components detected - board requires rework",
                "Total defects found: 3"
            ]
        );
        assert_eq!(recommendations(Severity::Low, 1).len(), 2);
    }

    #[test]
    fn severity_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).expect("json"),
            "\"critical\""
        );
        assert_eq!(
            serde_json::to_string(&DefectType::MissingComponent).expect("json"),
            "\"missing_component\""
        );
    }

    #[test]
    fn identical_crops_are_fully_similar() {
        let img = image::GrayImage::from_fn(5, 5, |x, y| image::Luma([(x * 40 + y) as u8]));
        assert_eq!(mean_abs_similarity(&img, &img), 1.0);
    }
}
