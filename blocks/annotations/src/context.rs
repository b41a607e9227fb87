use aether_atoms::drawing::Annotator;
use aether_atoms::media::BlobStore;
use aether_atoms::studies::StudyStore;
use std::sync::Arc;

use crate::llm::VisionModel;
use crate::summary::StudySummarizer;
use crate::vision::VisionAnalyzer;

/// Everything a pass needs, built once at startup.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn StudyStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub analyzer: VisionAnalyzer,
    pub summarizer: StudySummarizer,
    pub annotator: Arc<Annotator>,
}

impl WorkerContext {
    pub fn new(
        store: Arc<dyn StudyStore>,
        blobs: Arc<dyn BlobStore>,
        model: Arc<dyn VisionModel>,
        annotator: Annotator,
    ) -> Self {
        Self {
            store,
            blobs,
            analyzer: VisionAnalyzer::new(model.clone()),
            summarizer: StudySummarizer::new(model),
            annotator: Arc::new(annotator),
        }
    }
}
