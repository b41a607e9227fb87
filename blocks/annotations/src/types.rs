use aether_atoms::studies::Finding;
use serde::Deserialize;
use serde_json::Value;

use crate::llm::ModelError;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("malformed model reply: {0}")]
    Malformed(String),
}

// ========== ANALYSIS ==========
/// Validated model output for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub caption: String,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnalysis {
    caption: String,
    findings: Vec<RawFinding>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFinding {
    observation: String,
    #[serde(default)]
    possible_conditions: Option<Vec<String>>,
    #[serde(default)]
    bbox: Value,
}

/// Numeric arrays are kept as-is whatever their length; the annotator decides
/// whether they localize anything. Other shapes carry no box.
fn bbox_from_value(value: Value) -> Option<Vec<f64>> {
    match value {
        Value::Array(items) => items.iter().map(Value::as_f64).collect(),
        _ => None,
    }
}

impl Analysis {
    pub fn parse(reply: &str) -> Result<Self, AnalysisError> {
        let raw: RawAnalysis = serde_json::from_str(reply.trim())
            .map_err(|e| AnalysisError::Malformed(e.to_string()))?;

        let caption = raw.caption.trim().to_string();
        if caption.is_empty() {
            return Err(AnalysisError::Malformed("caption is blank".to_string()));
        }

        let findings = raw
            .findings
            .into_iter()
            .map(|f| Finding {
                observation: f.observation,
                possible_conditions: f.possible_conditions.unwrap_or_default(),
                bbox: bbox_from_value(f.bbox),
            })
            .collect();

        Ok(Self { caption, findings })
    }
}
