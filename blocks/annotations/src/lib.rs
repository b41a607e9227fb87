pub mod context;
pub mod llm;
pub mod poller;
pub mod processor;
pub mod summary;
pub mod types;
pub mod vision;

pub use context::WorkerContext;
pub use llm::{ModelError, OpenAiClient, VisionModel};
pub use poller::{Poller, TickReport};
pub use processor::{process_study, ImageError, PassOutcome, PassReport, ProcessError};
pub use summary::{StudySummarizer, NO_ABNORMALITIES_SUMMARY};
pub use types::{Analysis, AnalysisError};
pub use vision::VisionAnalyzer;
