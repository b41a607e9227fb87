// Re-export model types, the store seam and its DynamoDB implementation
pub mod model;
pub mod service;
pub mod store;

pub use model::{
    AiRequest, Caption, CaptionRaw, Completion, Finding, Interpretation, PersistenceSchema,
    RequestStatus, RetryState, Study, StudyResults, FAIL_CEILING,
};
pub use service::DynamoStudyStore;
pub use store::{StoreError, StudyStore, WriteBack, WriteTarget};
