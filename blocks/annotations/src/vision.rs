use std::sync::Arc;

use crate::llm::VisionModel;
use crate::types::{Analysis, AnalysisError};

/// Per-image model call with a validated result.
#[derive(Clone)]
pub struct VisionAnalyzer {
    model: Arc<dyn VisionModel>,
}

impl VisionAnalyzer {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self { model }
    }

    pub async fn analyze(&self, image_bytes: &[u8]) -> Result<Analysis, AnalysisError> {
        let reply = self.model.describe(image_bytes).await?;
        let analysis = Analysis::parse(&reply)?;

        tracing::debug!(
            "🔬 analysis: findings={}, localized={}",
            analysis.findings.len(),
            analysis.findings.iter().filter(|f| f.bounding_box().is_some()).count()
        );

        Ok(analysis)
    }
}
