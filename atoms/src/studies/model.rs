use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::drawing::model::BoundingBox;

/// Consecutive failures after which a locator is skipped for good.
pub const FAIL_CEILING: u32 = 3;

/// Which of the two result layouts a deployment persists.
/// Chosen once per deployment; a table never mixes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceSchema {
    /// `aiRequests` queue of pending/completed requests, locators in `previewKeys`.
    #[default]
    Queue,
    /// Single `aiInterpretation` blob, locators in `imageUrls`.
    Embedded,
}

impl PersistenceSchema {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "queue" | "requests" => Some(Self::Queue),
            "embedded" | "polling" | "interpretation" => Some(Self::Embedded),
            _ => None,
        }
    }

    /// Study attribute holding the ordered image locators.
    pub fn locator_field(&self) -> &'static str {
        match self {
            Self::Queue => "previewKeys",
            Self::Embedded => "imageUrls",
        }
    }
}

// ========== FINDING ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub observation: String,
    #[serde(default)]
    pub possible_conditions: Vec<String>,
    /// `[x, y, w, h]` normalized to the image size. Kept verbatim even when
    /// malformed; see [`Finding::bounding_box`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
}

impl Finding {
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.bbox.as_deref().and_then(BoundingBox::from_slice)
    }
}

// ========== CAPTION ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct CaptionRaw {
    #[serde(default)]
    pub findings: Vec<Finding>,
}

/// One processed image: source locator, annotated copy and the model output.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Caption {
    pub url: String,
    pub annotated_url: String,
    pub caption: String,
    #[serde(default)]
    pub raw: CaptionRaw,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Interpretation {
    #[serde(default)]
    pub enhanced_captions: Vec<Caption>,
    #[serde(default)]
    pub aggregate_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

// ========== REQUEST ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Completed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiRequest {
    /// Opaque identity of the request; scoped updates match on it.
    pub requested_at: String,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<Interpretation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AiRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

// ========== RETRY STATE ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    pub locator: String,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub permanently_failed: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RetryState {
    pub fn is_exhausted(&self) -> bool {
        self.permanently_failed || self.attempts >= FAIL_CEILING
    }
}

// ========== STUDY ==========
#[derive(Debug, Clone, PartialEq)]
pub enum StudyResults {
    Queue { requests: Vec<AiRequest> },
    Embedded { interpretation: Option<Interpretation> },
}

impl StudyResults {
    pub fn schema(&self) -> PersistenceSchema {
        match self {
            Self::Queue { .. } => PersistenceSchema::Queue,
            Self::Embedded { .. } => PersistenceSchema::Embedded,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Study {
    pub study_id: String,
    pub user_id: String,
    pub image_locators: Vec<String>,
    pub analysis_requested: bool,
    pub preview_count: Option<u32>,
    pub uploaded_at: Option<String>,
    pub results: StudyResults,
    pub retry_states: Vec<RetryState>,
}

/// Counts the finalize step compares against the denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub captioned: usize,
    pub permanently_failed: usize,
    pub preview_count: usize,
    pub pending_requests: Option<usize>,
}

impl Completion {
    pub fn is_resolved(&self) -> bool {
        let exhausted = self.captioned + self.permanently_failed >= self.preview_count;
        exhausted || self.pending_requests == Some(0)
    }
}

impl Study {
    pub fn schema(&self) -> PersistenceSchema {
        self.results.schema()
    }

    /// Every caption produced so far, across all requests.
    pub fn captions(&self) -> Vec<&Caption> {
        match &self.results {
            StudyResults::Queue { requests } => requests
                .iter()
                .filter_map(|r| r.interpretation.as_ref())
                .flat_map(|i| i.enhanced_captions.iter())
                .collect(),
            StudyResults::Embedded { interpretation } => interpretation
                .iter()
                .flat_map(|i| i.enhanced_captions.iter())
                .collect(),
        }
    }

    pub fn done_locators(&self) -> HashSet<&str> {
        self.captions().into_iter().map(|c| c.url.as_str()).collect()
    }

    /// The request this pass services: the first pending one.
    pub fn first_pending_request(&self) -> Option<(usize, &AiRequest)> {
        match &self.results {
            StudyResults::Queue { requests } => {
                requests.iter().enumerate().find(|(_, r)| r.is_pending())
            }
            StudyResults::Embedded { .. } => None,
        }
    }

    pub fn retry_state(&self, locator: &str) -> Option<&RetryState> {
        self.retry_states.iter().find(|r| r.locator == locator)
    }

    pub fn is_permanently_failed(&self, locator: &str) -> bool {
        self.retry_state(locator).is_some_and(RetryState::is_exhausted)
    }

    /// Denominator snapshot for `previewCount`; repeated locators count once.
    pub fn distinct_locators(&self) -> usize {
        self.image_locators.iter().collect::<HashSet<_>>().len()
    }

    pub fn completion(&self) -> Completion {
        let done = self.done_locators();
        let permanently_failed = self
            .image_locators
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|l| !done.contains(l.as_str()) && self.is_permanently_failed(l))
            .count();
        let pending_requests = match &self.results {
            StudyResults::Queue { requests } => {
                Some(requests.iter().filter(|r| r.is_pending()).count())
            }
            StudyResults::Embedded { .. } => None,
        };

        Completion {
            captioned: done.len(),
            permanently_failed,
            preview_count: self
                .preview_count
                .map(|c| c as usize)
                .unwrap_or_else(|| self.distinct_locators()),
            pending_requests,
        }
    }
}
