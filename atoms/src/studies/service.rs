use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::operation::update_item::builders::UpdateItemFluentBuilder;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::model::{
    AiRequest, Interpretation, PersistenceSchema, RetryState, Study, StudyResults, FAIL_CEILING,
};
use super::store::{StoreError, StudyStore, WriteBack, WriteTarget};
use crate::dynamo::{from_attr, item_to_json, to_attr, CodecError};

const STUDY_PK: &str = "STUDY";

fn study_sk(study_id: &str) -> String {
    format!("STUDY#{}", study_id)
}

fn retry_pk(study_id: &str) -> String {
    format!("STUDY#{}", study_id)
}

/// Presigned URLs can exceed the sort key limit, so retry items are keyed by digest.
fn retry_sk(locator: &str) -> String {
    format!("RETRY#{:x}", Sha256::digest(locator.as_bytes()))
}

fn dynamo_err<E>(operation: &'static str) -> impl Fn(E) -> StoreError
where
    E: std::error::Error + 'static,
{
    move |e| StoreError::Dynamo {
        operation,
        message: DisplayErrorContext(&e).to_string(),
    }
}

/// DynamoDB-backed study store.
///
/// Studies live under `PK = "STUDY"`, `SK = "STUDY#{id}"`; retry states are
/// separate items under `PK = "STUDY#{id}"` so increments stay atomic.
#[derive(Clone)]
pub struct DynamoStudyStore {
    client: DynamoClient,
    table_name: String,
    schema: PersistenceSchema,
}

impl DynamoStudyStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>, schema: PersistenceSchema) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            schema,
        }
    }

    pub fn schema(&self) -> PersistenceSchema {
        self.schema
    }

    fn study_update(&self, study_id: &str) -> UpdateItemFluentBuilder {
        self.client
            .update_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(STUDY_PK.to_string()))
            .key("SK", AttributeValue::S(study_sk(study_id)))
    }

    fn retry_update(&self, study_id: &str, locator: &str) -> UpdateItemFluentBuilder {
        self.client
            .update_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(retry_pk(study_id)))
            .key("SK", AttributeValue::S(retry_sk(locator)))
    }

    async fn load_retry_states(&self, study_id: &str) -> Result<Vec<RetryState>, StoreError> {
        let mut states = Vec::new();
        let mut start_key = None;

        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .consistent_read(true)
                .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
                .expression_attribute_values(":pk", AttributeValue::S(retry_pk(study_id)))
                .expression_attribute_values(":sk_prefix", AttributeValue::S("RETRY#".to_string()))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(dynamo_err("query"))?;

            for item in result.items() {
                states.push(decode_retry_state(study_id, item)?);
            }

            match result.last_evaluated_key() {
                Some(key) => start_key = Some(key.clone()),
                None => break,
            }
        }

        Ok(states)
    }
}

fn malformed(study_id: &str) -> impl Fn(CodecError) -> StoreError + '_ {
    move |source| StoreError::Malformed {
        study_id: study_id.to_string(),
        source,
    }
}

fn decode_retry_state(
    study_id: &str,
    item: &HashMap<String, AttributeValue>,
) -> Result<RetryState, StoreError> {
    let json = item_to_json(item).map_err(malformed(study_id))?;
    serde_json::from_value(json)
        .map_err(CodecError::Deserialize)
        .map_err(malformed(study_id))
}

/// Decode a study item for the given schema. Retry states are loaded separately.
pub fn decode_study(
    schema: PersistenceSchema,
    item: &HashMap<String, AttributeValue>,
) -> Result<Study, StoreError> {
    let study_id = item
        .get("studyId")
        .and_then(|v| v.as_s().ok())
        .map(|s| s.to_string())
        .or_else(|| {
            item.get("SK")
                .and_then(|v| v.as_s().ok())
                .and_then(|sk| sk.strip_prefix("STUDY#"))
                .map(|s| s.to_string())
        })
        .unwrap_or_default();

    let image_locators: Vec<String> = match item.get(schema.locator_field()) {
        Some(attr) => from_attr(attr).map_err(malformed(&study_id))?,
        None => Vec::new(),
    };

    let results = match schema {
        PersistenceSchema::Queue => StudyResults::Queue {
            requests: match item.get("aiRequests") {
                Some(attr) => from_attr::<Vec<AiRequest>>(attr).map_err(malformed(&study_id))?,
                None => Vec::new(),
            },
        },
        PersistenceSchema::Embedded => StudyResults::Embedded {
            interpretation: match item.get("aiInterpretation") {
                Some(attr) => Some(from_attr::<Interpretation>(attr).map_err(malformed(&study_id))?),
                None => None,
            },
        },
    };

    Ok(Study {
        user_id: item.get("userId").and_then(|v| v.as_s().ok()).map(|s| s.to_string()).unwrap_or_default(),
        image_locators,
        analysis_requested: item.get("analysisRequested").and_then(|v| v.as_bool().ok()).copied().unwrap_or(false),
        preview_count: item.get("previewCount").and_then(|v| v.as_n().ok()).and_then(|n| n.parse().ok()),
        uploaded_at: item.get("uploadedAt").and_then(|v| v.as_s().ok()).map(|s| s.to_string()),
        results,
        retry_states: Vec::new(),
        study_id,
    })
}

#[async_trait]
impl StudyStore for DynamoStudyStore {
    async fn find_pending(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let mut studies = Vec::new();
        let mut start_key = None;

        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("PK = :pk")
                .filter_expression("analysisRequested = :requested")
                .expression_attribute_values(":pk", AttributeValue::S(STUDY_PK.to_string()))
                .expression_attribute_values(":requested", AttributeValue::Bool(true))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(dynamo_err("query"))?;

            for item in result.items() {
                match decode_study(self.schema, item) {
                    Ok(study) => studies.push(study),
                    // One broken record must not stall the whole queue.
                    Err(e) => tracing::warn!("⚠️ skipping undecodable study record: {}", e),
                }
            }

            if self.schema == PersistenceSchema::Queue {
                studies.retain(|s| s.first_pending_request().is_some());
                if studies.len() >= limit {
                    break;
                }
            }

            match result.last_evaluated_key() {
                Some(key) => start_key = Some(key.clone()),
                None => break,
            }
        }

        if self.schema == PersistenceSchema::Embedded {
            studies.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        }

        Ok(studies
            .into_iter()
            .take(limit)
            .map(|s| s.study_id)
            .collect())
    }

    async fn load_study(&self, study_id: &str) -> Result<Option<Study>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .consistent_read(true)
            .key("PK", AttributeValue::S(STUDY_PK.to_string()))
            .key("SK", AttributeValue::S(study_sk(study_id)))
            .send()
            .await
            .map_err(dynamo_err("get_item"))?;

        let Some(item) = result.item() else {
            return Ok(None);
        };

        let mut study = decode_study(self.schema, item)?;
        if study.study_id.is_empty() {
            study.study_id = study_id.to_string();
        }
        study.retry_states = self.load_retry_states(study_id).await?;

        Ok(Some(study))
    }

    async fn init_preview_count(&self, study_id: &str, count: u32) -> Result<u32, StoreError> {
        let result = preview_count_update(count)
            .apply(self.study_update(study_id))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(se) if se.is_conditional_check_failed_exception() => {
                    StoreError::NotFound(study_id.to_string())
                }
                _ => dynamo_err("update_item")(e),
            })?;

        Ok(result
            .attributes()
            .and_then(|attrs| attrs.get("previewCount"))
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse().ok())
            .unwrap_or(count))
    }

    async fn record_failure(
        &self,
        study_id: &str,
        locator: &str,
        error: &str,
    ) -> Result<RetryState, StoreError> {
        let result = failure_update(locator, error, Utc::now())
            .apply(self.retry_update(study_id, locator))
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(dynamo_err("update_item"))?;

        let mut state = match result.attributes() {
            Some(attrs) => decode_retry_state(study_id, attrs)?,
            None => RetryState {
                locator: locator.to_string(),
                attempts: 1,
                last_error: Some(error.to_string()),
                permanently_failed: false,
                updated_at: Some(Utc::now()),
            },
        };

        if state.attempts >= FAIL_CEILING && !state.permanently_failed {
            promote_failure_update()
                .apply(self.retry_update(study_id, locator))
                .send()
                .await
                .map_err(dynamo_err("update_item"))?;
            state.permanently_failed = true;
        }

        Ok(state)
    }

    async fn write_back(&self, study_id: &str, write: &WriteBack) -> Result<(), StoreError> {
        let captions = to_attr(&write.captions).map_err(malformed(study_id))?;

        write_back_update(write, captions)
            .apply(self.study_update(study_id))
            .send()
            .await
            .map_err(|e| {
                let conditional = e
                    .as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception());
                if conditional {
                    write_back_rejected(study_id, &write.target)
                } else {
                    dynamo_err("update_item")(e)
                }
            })?;

        Ok(())
    }

    async fn clear_analysis_requested(&self, study_id: &str) -> Result<(), StoreError> {
        clear_requested_update()
            .apply(self.study_update(study_id))
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(se) if se.is_conditional_check_failed_exception() => {
                    StoreError::NotFound(study_id.to_string())
                }
                _ => dynamo_err("update_item")(e),
            })?;

        Ok(())
    }
}

/// One `UpdateItem` call without its key: expression, guard and placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateExpr {
    pub update: String,
    pub condition: Option<String>,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
}

impl UpdateExpr {
    fn new(update: impl Into<String>) -> Self {
        Self {
            update: update.into(),
            condition: None,
            names: HashMap::new(),
            values: HashMap::new(),
        }
    }

    fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    fn name(mut self, placeholder: &str, name: &str) -> Self {
        self.names.insert(placeholder.to_string(), name.to_string());
        self
    }

    fn value(mut self, placeholder: &str, value: AttributeValue) -> Self {
        self.values.insert(placeholder.to_string(), value);
        self
    }

    fn apply(self, builder: UpdateItemFluentBuilder) -> UpdateItemFluentBuilder {
        // DynamoDB rejects an empty names map
        let names = (!self.names.is_empty()).then_some(self.names);
        builder
            .update_expression(self.update)
            .set_condition_expression(self.condition)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(Some(self.values))
    }
}

pub fn preview_count_update(count: u32) -> UpdateExpr {
    UpdateExpr::new("SET previewCount = if_not_exists(previewCount, :count)")
        .condition("attribute_exists(SK)")
        .value(":count", AttributeValue::N(count.to_string()))
}

/// Upserts the retry item and bumps `attempts` atomically.
pub fn failure_update(locator: &str, error: &str, now: DateTime<Utc>) -> UpdateExpr {
    UpdateExpr::new(
        "SET locator = :locator, lastError = :error, updatedAt = :now, \
         permanentlyFailed = if_not_exists(permanentlyFailed, :false) ADD attempts :one",
    )
    .value(":locator", AttributeValue::S(locator.to_string()))
    .value(":error", AttributeValue::S(error.to_string()))
    .value(":now", AttributeValue::S(now.to_rfc3339()))
    .value(":false", AttributeValue::Bool(false))
    .value(":one", AttributeValue::N("1".to_string()))
}

pub fn promote_failure_update() -> UpdateExpr {
    UpdateExpr::new("SET permanentlyFailed = :true").value(":true", AttributeValue::Bool(true))
}

fn interpretation_map(captions: AttributeValue, summary: &str) -> HashMap<String, AttributeValue> {
    let mut interpretation = HashMap::new();
    interpretation.insert("enhancedCaptions".to_string(), captions);
    interpretation.insert("aggregateSummary".to_string(), AttributeValue::S(summary.to_string()));
    interpretation
}

/// The single atomic update persisting one pass. `captions` is the encoded caption list.
pub fn write_back_update(write: &WriteBack, captions: AttributeValue) -> UpdateExpr {
    let now = write.written_at.to_rfc3339();

    match &write.target {
        WriteTarget::Request { index, requested_at } => {
            let p = format!("aiRequests[{}]", index);
            UpdateExpr::new(format!(
                "SET {p}.interpretation = :interpretation, {p}.#status = :completed, {p}.completedAt = :now"
            ))
            .condition(format!("{p}.requestedAt = :requested_at AND {p}.#status = :pending"))
            .name("#status", "status")
            .value(":interpretation", AttributeValue::M(interpretation_map(captions, &write.summary)))
            .value(":completed", AttributeValue::S("completed".to_string()))
            .value(":pending", AttributeValue::S("pending".to_string()))
            .value(":requested_at", AttributeValue::S(requested_at.clone()))
            .value(":now", AttributeValue::S(now))
        }
        WriteTarget::Interpretation { create: true } => {
            let mut interpretation = interpretation_map(captions, &write.summary);
            interpretation.insert("updatedAt".to_string(), AttributeValue::S(now));

            UpdateExpr::new("SET aiInterpretation = :interpretation")
                .condition("attribute_exists(SK) AND attribute_not_exists(aiInterpretation)")
                .value(":interpretation", AttributeValue::M(interpretation))
        }
        WriteTarget::Interpretation { create: false } => UpdateExpr::new(
            "SET aiInterpretation.enhancedCaptions = list_append(if_not_exists(aiInterpretation.enhancedCaptions, :empty), :captions), \
             aiInterpretation.aggregateSummary = :summary, aiInterpretation.updatedAt = :now",
        )
        .condition("attribute_exists(aiInterpretation)")
        .value(":empty", AttributeValue::L(Vec::new()))
        .value(":captions", captions)
        .value(":summary", AttributeValue::S(write.summary.clone()))
        .value(":now", AttributeValue::S(now)),
    }
}

/// Error for a write-back whose condition did not hold.
pub fn write_back_rejected(study_id: &str, target: &WriteTarget) -> StoreError {
    match target {
        WriteTarget::Request { index, requested_at } => StoreError::RequestMoved {
            study_id: study_id.to_string(),
            requested_at: requested_at.clone(),
            index: *index,
        },
        WriteTarget::Interpretation { .. } => StoreError::Conflict(study_id.to_string()),
    }
}

/// Guarded so a study deleted mid-pass is not recreated as a bare item.
pub fn clear_requested_update() -> UpdateExpr {
    UpdateExpr::new("SET analysisRequested = :false")
        .condition("attribute_exists(SK)")
        .value(":false", AttributeValue::Bool(false))
}
