use aether_atoms::studies::Finding;
use std::sync::Arc;

use crate::llm::VisionModel;

pub const NO_ABNORMALITIES_SUMMARY: &str =
    "No significant abnormalities were identified in the analyzed images.";

pub const DISCLAIMER: &str =
    "These observations are informational and not a substitute for professional diagnosis.";

const FALLBACK_HEADING: &str = "Summary of findings:";

/// One line per finding, numbered by image position in the batch.
pub fn fact_list(findings_per_image: &[Vec<Finding>]) -> String {
    let mut lines = Vec::new();

    for (i, findings) in findings_per_image.iter().enumerate() {
        let image = i + 1;
        if findings.is_empty() {
            lines.push(format!("Image {image}: no abnormal findings"));
            continue;
        }
        for finding in findings {
            if finding.possible_conditions.is_empty() {
                lines.push(format!("Image {image}: {}", finding.observation));
            } else {
                lines.push(format!(
                    "Image {image}: {} (possible: {})",
                    finding.observation,
                    finding.possible_conditions.join(", ")
                ));
            }
        }
    }

    lines.join("\n")
}

pub fn fallback_summary(facts: &str) -> String {
    format!("{FALLBACK_HEADING}\n{facts}\n\n{DISCLAIMER}")
}

/// Aggregates one batch of findings into a single report.
#[derive(Clone)]
pub struct StudySummarizer {
    model: Arc<dyn VisionModel>,
}

impl StudySummarizer {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self { model }
    }

    /// Never fails: model errors fall back to the rendered fact list.
    pub async fn summarize(&self, findings_per_image: &[Vec<Finding>]) -> String {
        if findings_per_image.iter().all(Vec::is_empty) {
            return NO_ABNORMALITIES_SUMMARY.to_string();
        }

        let facts = fact_list(findings_per_image);
        match self.model.summarize(&facts).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("⚠️ summarizer returned blank text, using fact list");
                fallback_summary(&facts)
            }
            Err(e) => {
                tracing::warn!("⚠️ summarizer failed, using fact list: {}", e);
                fallback_summary(&facts)
            }
        }
    }
}
