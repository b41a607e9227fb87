#![allow(dead_code)]

use aether_atoms::drawing::Annotator;
use aether_atoms::media::{BlobError, BlobStore};
use aether_atoms::studies::{
    AiRequest, Interpretation, RequestStatus, RetryState, StoreError, Study, StudyResults,
    StudyStore, WriteBack, WriteTarget, FAIL_CEILING,
};
use annotations_block::{ModelError, VisionModel, WorkerContext};
use async_trait::async_trait;
use chrono::Utc;
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ========== STORE ==========
#[derive(Default)]
pub struct MemoryStore {
    pub studies: Mutex<HashMap<String, Study>>,
    pub mutations: AtomicUsize,
    pub write_backs: Mutex<Vec<WriteBack>>,
    pub fail_find: AtomicBool,
    pub fail_write_back_for: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn with(studies: Vec<Study>) -> Arc<Self> {
        let store = Self::default();
        {
            let mut map = store.studies.lock().unwrap();
            for study in studies {
                map.insert(study.study_id.clone(), study);
            }
        }
        Arc::new(store)
    }

    pub fn study(&self, id: &str) -> Study {
        self.studies.lock().unwrap()[id].clone()
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StudyStore for MemoryStore {
    async fn find_pending(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        if self.fail_find.load(Ordering::SeqCst) {
            return Err(StoreError::Dynamo {
                operation: "query",
                message: "throttled".to_string(),
            });
        }

        let studies = self.studies.lock().unwrap();
        let mut ids: Vec<String> = studies
            .values()
            .filter(|s| s.analysis_requested)
            .filter(|s| match &s.results {
                StudyResults::Queue { requests } => requests.iter().any(AiRequest::is_pending),
                StudyResults::Embedded { .. } => true,
            })
            .map(|s| s.study_id.clone())
            .collect();
        ids.sort();
        ids.truncate(limit);
        Ok(ids)
    }

    async fn load_study(&self, study_id: &str) -> Result<Option<Study>, StoreError> {
        Ok(self.studies.lock().unwrap().get(study_id).cloned())
    }

    async fn init_preview_count(&self, study_id: &str, count: u32) -> Result<u32, StoreError> {
        self.touch();
        let mut studies = self.studies.lock().unwrap();
        let study = studies
            .get_mut(study_id)
            .ok_or_else(|| StoreError::NotFound(study_id.to_string()))?;
        Ok(*study.preview_count.get_or_insert(count))
    }

    async fn record_failure(
        &self,
        study_id: &str,
        locator: &str,
        error: &str,
    ) -> Result<RetryState, StoreError> {
        self.touch();
        let mut studies = self.studies.lock().unwrap();
        let study = studies
            .get_mut(study_id)
            .ok_or_else(|| StoreError::NotFound(study_id.to_string()))?;

        let idx = match study.retry_states.iter().position(|r| r.locator == locator) {
            Some(idx) => idx,
            None => {
                study.retry_states.push(RetryState {
                    locator: locator.to_string(),
                    attempts: 0,
                    last_error: None,
                    permanently_failed: false,
                    updated_at: None,
                });
                study.retry_states.len() - 1
            }
        };

        let state = &mut study.retry_states[idx];
        state.attempts += 1;
        state.last_error = Some(error.to_string());
        state.permanently_failed = state.attempts >= FAIL_CEILING;
        state.updated_at = Some(Utc::now());
        Ok(state.clone())
    }

    async fn write_back(&self, study_id: &str, write: &WriteBack) -> Result<(), StoreError> {
        if self.fail_write_back_for.lock().unwrap().contains(study_id) {
            return Err(StoreError::Dynamo {
                operation: "update_item",
                message: "connection reset".to_string(),
            });
        }

        self.touch();
        let mut studies = self.studies.lock().unwrap();
        let study = studies
            .get_mut(study_id)
            .ok_or_else(|| StoreError::NotFound(study_id.to_string()))?;

        match (&write.target, &mut study.results) {
            (WriteTarget::Request { index, requested_at }, StudyResults::Queue { requests }) => {
                let request = requests
                    .get_mut(*index)
                    .filter(|r| &r.requested_at == requested_at && r.is_pending())
                    .ok_or_else(|| StoreError::RequestMoved {
                        study_id: study_id.to_string(),
                        requested_at: requested_at.clone(),
                        index: *index,
                    })?;
                request.status = RequestStatus::Completed;
                request.completed_at = Some(write.written_at);
                request.interpretation = Some(Interpretation {
                    enhanced_captions: write.captions.clone(),
                    aggregate_summary: write.summary.clone(),
                    updated_at: Some(write.written_at),
                });
            }
            (WriteTarget::Interpretation { create }, StudyResults::Embedded { interpretation }) => {
                if *create != interpretation.is_none() {
                    return Err(StoreError::Conflict(study_id.to_string()));
                }
                let interpretation = interpretation.get_or_insert_with(Interpretation::default);
                interpretation.enhanced_captions.extend(write.captions.iter().cloned());
                interpretation.aggregate_summary = write.summary.clone();
                interpretation.updated_at = Some(write.written_at);
            }
            _ => return Err(StoreError::Conflict(study_id.to_string())),
        }

        self.write_backs.lock().unwrap().push(write.clone());
        Ok(())
    }

    async fn clear_analysis_requested(&self, study_id: &str) -> Result<(), StoreError> {
        self.touch();
        let mut studies = self.studies.lock().unwrap();
        let study = studies
            .get_mut(study_id)
            .ok_or_else(|| StoreError::NotFound(study_id.to_string()))?;
        study.analysis_requested = false;
        Ok(())
    }
}

// ========== BLOBS ==========
#[derive(Default)]
pub struct MemoryBlobs {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub fetched: Mutex<Vec<String>>,
    pub puts: AtomicUsize,
}

impl MemoryBlobs {
    pub fn with_images(locators: &[&str]) -> Arc<Self> {
        let blobs = Self::default();
        {
            let mut objects = blobs.objects.lock().unwrap();
            for locator in locators {
                objects.insert(locator.to_string(), sample_png());
            }
        }
        Arc::new(blobs)
    }

    pub fn fetch_count(&self, locator: &str) -> usize {
        self.fetched.lock().unwrap().iter().filter(|l| *l == locator).count()
    }

    pub fn total_fetches(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn fetch_bytes(&self, locator: &str) -> Result<Vec<u8>, BlobError> {
        self.fetched.lock().unwrap().push(locator.to_string());
        self.objects
            .lock()
            .unwrap()
            .get(locator)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(locator.to_string()))
    }

    async fn put_bytes(&self, key: &str, bytes: Vec<u8>, _: &str) -> Result<(), BlobError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn presign_read(&self, key: &str, _: Duration) -> Result<String, BlobError> {
        Ok(format!("https://bucket.s3.amazonaws.com/{}?X-Amz-Signature=test", key))
    }
}

// ========== MODEL ==========
pub const FINDING_REPLY: &str = r#"{
    "caption": "Chest radiograph with a right lower lobe opacity.",
    "findings": [
        {"observation": "right lower lobe opacity", "possibleConditions": ["pneumonia"], "bbox": [0.5, 0.5, 0.25, 0.25]}
    ]
}"#;

pub const NORMAL_REPLY: &str = r#"{"caption": "Normal chest radiograph.", "findings": []}"#;

pub struct ScriptedModel {
    pub default_reply: String,
    pub scripted: Mutex<VecDeque<String>>,
    pub describe_calls: AtomicUsize,
    pub summaries: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            default_reply: reply.to_string(),
            scripted: Mutex::new(VecDeque::new()),
            describe_calls: AtomicUsize::new(0),
            summaries: Mutex::new(Vec::new()),
        })
    }

    /// Replies consumed in order before falling back to the default.
    pub fn then(&self, reply: &str) -> &Self {
        self.scripted.lock().unwrap().push_back(reply.to_string());
        self
    }

    pub fn summarize_calls(&self) -> usize {
        self.summaries.lock().unwrap().len()
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    async fn describe(&self, _: &[u8]) -> Result<String, ModelError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripted.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| self.default_reply.clone()))
    }

    async fn summarize(&self, facts: &str) -> Result<String, ModelError> {
        self.summaries.lock().unwrap().push(facts.to_string());
        Ok(format!("Report on {} findings.", facts.lines().count()))
    }
}

// ========== FIXTURES ==========
pub fn sample_png() -> Vec<u8> {
    let img = RgbImage::from_pixel(48, 32, Rgb([40, 40, 40]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn embedded_study(id: &str, locators: &[&str]) -> Study {
    Study {
        study_id: id.to_string(),
        user_id: "user-1".to_string(),
        image_locators: locators.iter().map(|l| l.to_string()).collect(),
        analysis_requested: true,
        preview_count: None,
        uploaded_at: Some("2024-06-01T10:00:00Z".to_string()),
        results: StudyResults::Embedded { interpretation: None },
        retry_states: Vec::new(),
    }
}

pub fn queue_study(id: &str, locators: &[&str], requested: &[&str]) -> Study {
    Study {
        results: StudyResults::Queue {
            requests: requested
                .iter()
                .map(|at| AiRequest {
                    requested_at: at.to_string(),
                    status: RequestStatus::Pending,
                    interpretation: None,
                    completed_at: None,
                })
                .collect(),
        },
        ..embedded_study(id, locators)
    }
}

pub fn context(
    store: &Arc<MemoryStore>,
    blobs: &Arc<MemoryBlobs>,
    model: &Arc<ScriptedModel>,
) -> WorkerContext {
    WorkerContext::new(
        store.clone(),
        blobs.clone(),
        model.clone(),
        Annotator::without_font(),
    )
}
