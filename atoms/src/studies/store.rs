use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::{Caption, RetryState, Study};
use crate::dynamo::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("DynamoDB {operation} error: {message}")]
    Dynamo {
        operation: &'static str,
        message: String,
    },
    #[error("malformed study record {study_id}: {source}")]
    Malformed {
        study_id: String,
        #[source]
        source: CodecError,
    },
    #[error("study not found: {0}")]
    NotFound(String),
    #[error("request {requested_at} of study {study_id} is no longer pending at position {index}")]
    RequestMoved {
        study_id: String,
        requested_at: String,
        index: usize,
    },
    #[error("conditional update rejected for study {0}")]
    Conflict(String),
}

/// Where a batch of captions lands.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteTarget {
    /// Complete the request at `index`, matched on its `requested_at`.
    Request { index: usize, requested_at: String },
    /// Append to the study's single interpretation blob, creating it if absent.
    Interpretation { create: bool },
}

/// Everything one successful pass persists, in one atomic update.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBack {
    pub target: WriteTarget,
    pub captions: Vec<Caption>,
    pub summary: String,
    pub written_at: DateTime<Utc>,
}

/// System of record for studies and their retry bookkeeping.
#[async_trait]
pub trait StudyStore: Send + Sync {
    /// Ids of studies with outstanding work, at most `limit`.
    async fn find_pending(&self, limit: usize) -> Result<Vec<String>, StoreError>;

    /// Authoritative read of a study including its retry states.
    async fn load_study(&self, study_id: &str) -> Result<Option<Study>, StoreError>;

    /// Set `previewCount` unless already set; returns the stored value.
    async fn init_preview_count(&self, study_id: &str, count: u32) -> Result<u32, StoreError>;

    /// Count one more failure for `locator`; returns the updated state.
    async fn record_failure(
        &self,
        study_id: &str,
        locator: &str,
        error: &str,
    ) -> Result<RetryState, StoreError>;

    async fn write_back(&self, study_id: &str, write: &WriteBack) -> Result<(), StoreError>;

    async fn clear_analysis_requested(&self, study_id: &str) -> Result<(), StoreError>;
}
