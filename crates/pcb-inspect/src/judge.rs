//! Parsing of free-text remote-judge answers.

use serde::{Deserialize, Serialize};

const FALLBACK_QUALITY: &str = "needs_review";
const FALLBACK_CONFIDENCE: f64 = 0.5;

/// Usual shape of a remote judge's opinion.
///
/// Unknown fields are ignored and missing ones default, so partially
/// conforming answers still parse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JudgeOpinion {
    /// `pass`, `fail` or `needs_review`.
    #[serde(default = "fallback_quality")]
    pub overall_quality: String,
    #[serde(default)]
    pub defects_found: Vec<serde_json::Value>,
    #[serde(default)]
    pub components_identified: Vec<serde_json::Value>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default = "fallback_confidence")]
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison_notes: Option<String>,
}

fn fallback_quality() -> String {
    FALLBACK_QUALITY.to_string()
}

fn fallback_confidence() -> f64 {
    FALLBACK_CONFIDENCE
}

impl JudgeOpinion {
    /// Extract the JSON object spanning the first `{` to the last `}` of
    /// `text`. Without one, or when it does not parse, the whole text becomes
    /// the single recommendation of a `needs_review` opinion.
    pub fn from_response_text(text: &str) -> Self {
        let object = match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if start < end => Some(&text[start..=end]),
            _ => None,
        };
        if let Some(json) = object {
            match serde_json::from_str::<JudgeOpinion>(json) {
                Ok(opinion) => return opinion,
                Err(e) => log::warn!("remote judge answer is not valid JSON ({e}), using text"),
            }
        }
        Self::text_fallback(text)
    }

    fn text_fallback(text: &str) -> Self {
        Self {
            overall_quality: fallback_quality(),
            defects_found: Vec::new(),
            components_identified: Vec::new(),
            recommendations: vec![text.to_string()],
            confidence_score: FALLBACK_CONFIDENCE,
            comparison_notes: None,
        }
    }

    fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Opinion as stored in a report: a bare string is the judge's free-text
/// answer and is parsed with [`JudgeOpinion::from_response_text`]; structured
/// opinions are kept as sent.
pub(crate) fn structured_opinion(opinion: serde_json::Value) -> serde_json::Value {
    match opinion {
        serde_json::Value::String(text) => JudgeOpinion::from_response_text(&text).to_value(),
        other => other,
    }
}
