//! One pass over one study.
//!
//! Select the work, snapshot the denominator, run every outstanding image
//! through fetch / analyze / annotate / upload, persist the batch in a single
//! write, then decide whether the study is finished. Image failures are
//! recorded against the locator and never abort the pass; a failed write-back
//! aborts it and leaves the images to be redone on a later tick.

use aether_atoms::drawing::DrawingError;
use aether_atoms::media::{
    annotated_key, BlobError, MonotonicMillis, JPEG_CONTENT_TYPE, PRESIGNED_URL_TTL,
};
use aether_atoms::studies::{
    Caption, CaptionRaw, Finding, StoreError, Study, StudyResults, WriteBack, WriteTarget,
};
use chrono::Utc;
use std::collections::HashSet;

use crate::context::WorkerContext;
use crate::types::AnalysisError;

static ANNOTATION_CLOCK: MonotonicMillis = MonotonicMillis::new();

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("fetch failed: {0}")]
    Fetch(#[source] BlobError),
    #[error("analysis failed: {0}")]
    Analyze(#[source] AnalysisError),
    #[error("annotation failed: {0}")]
    Annotate(#[source] DrawingError),
    #[error("upload failed: {0}")]
    Upload(#[source] BlobError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("study not found: {0}")]
    StudyNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// `analysisRequested` was cleared by this pass.
    pub finalized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    NothingPending,
    Processed(PassReport),
}

async fn load(ctx: &WorkerContext, study_id: &str) -> Result<Study, ProcessError> {
    ctx.store
        .load_study(study_id)
        .await?
        .ok_or_else(|| ProcessError::StudyNotFound(study_id.to_string()))
}

/// Which result slot this pass writes into, or `None` when there is no work.
fn select_target(study: &Study) -> Option<WriteTarget> {
    match &study.results {
        StudyResults::Queue { .. } => {
            study
                .first_pending_request()
                .map(|(index, request)| WriteTarget::Request {
                    index,
                    requested_at: request.requested_at.clone(),
                })
        }
        StudyResults::Embedded { interpretation } => {
            study.analysis_requested.then(|| WriteTarget::Interpretation {
                create: interpretation.is_none(),
            })
        }
    }
}

async fn process_image(
    ctx: &WorkerContext,
    user_id: &str,
    locator: &str,
) -> Result<Caption, ImageError> {
    let bytes = ctx.blobs.fetch_bytes(locator).await.map_err(ImageError::Fetch)?;

    let analysis = ctx
        .analyzer
        .analyze(&bytes)
        .await
        .map_err(ImageError::Analyze)?;

    let annotated = ctx
        .annotator
        .annotate(&bytes, &analysis.caption, &analysis.findings)
        .map_err(ImageError::Annotate)?;

    let key = annotated_key(user_id, ANNOTATION_CLOCK.next());
    ctx.blobs
        .put_bytes(&key, annotated, JPEG_CONTENT_TYPE)
        .await
        .map_err(ImageError::Upload)?;
    let annotated_url = ctx
        .blobs
        .presign_read(&key, PRESIGNED_URL_TTL)
        .await
        .map_err(ImageError::Upload)?;

    Ok(Caption {
        url: locator.to_string(),
        annotated_url,
        caption: analysis.caption,
        raw: CaptionRaw {
            findings: analysis.findings,
        },
        timestamp: Utc::now(),
    })
}

/// Re-read the study and clear `analysisRequested` once nothing is left to do.
async fn finalize(ctx: &WorkerContext, study_id: &str) -> Result<bool, ProcessError> {
    let study = load(ctx, study_id).await?;
    let completion = study.completion();

    tracing::debug!(
        "🧮 finalize {}: captioned={}, failed={}, preview_count={}, pending_requests={:?}",
        study_id,
        completion.captioned,
        completion.permanently_failed,
        completion.preview_count,
        completion.pending_requests
    );

    if !study.analysis_requested || !completion.is_resolved() {
        return Ok(false);
    }

    ctx.store.clear_analysis_requested(study_id).await?;
    tracing::info!("🏁 study {} resolved, analysisRequested cleared", study_id);
    Ok(true)
}

pub async fn process_study(
    ctx: &WorkerContext,
    study_id: &str,
) -> Result<PassOutcome, ProcessError> {
    let study = load(ctx, study_id).await?;

    let Some(target) = select_target(&study) else {
        tracing::debug!("study {} has nothing pending", study_id);
        return Ok(PassOutcome::NothingPending);
    };

    if study.preview_count.is_none() {
        let count = u32::try_from(study.distinct_locators()).unwrap_or(u32::MAX);
        let stored = ctx.store.init_preview_count(study_id, count).await?;
        tracing::info!("📐 study {} previewCount={}", study_id, stored);
    }

    tracing::info!(
        "🔄 processing study {}: locators={}, target={:?}",
        study_id,
        study.image_locators.len(),
        target
    );

    let mut report = PassReport::default();
    let mut seen: HashSet<&str> = study.done_locators();
    let mut batch: Vec<Caption> = Vec::new();

    for locator in &study.image_locators {
        if !seen.insert(locator.as_str()) {
            continue;
        }
        if study.is_permanently_failed(locator) {
            report.skipped += 1;
            continue;
        }

        match process_image(ctx, &study.user_id, locator).await {
            Ok(caption) => {
                tracing::info!("✅ captioned {} -> {}", locator, caption.annotated_url);
                report.succeeded += 1;
                batch.push(caption);
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!("⚠️ image {} of study {} failed: {}", locator, study_id, e);

                match ctx.store.record_failure(study_id, locator, &e.to_string()).await {
                    Ok(state) if state.permanently_failed => {
                        tracing::warn!(
                            "🚫 {} permanently failed after {} attempts",
                            locator,
                            state.attempts
                        );
                    }
                    Ok(_) => {}
                    Err(se) => {
                        tracing::error!("❌ could not record failure for {}: {}", locator, se);
                    }
                }
            }
        }
    }

    if !batch.is_empty() {
        let findings: Vec<Vec<Finding>> =
            batch.iter().map(|c| c.raw.findings.clone()).collect();
        let summary = ctx.summarizer.summarize(&findings).await;

        let write = WriteBack {
            target,
            captions: batch,
            summary,
            written_at: Utc::now(),
        };
        ctx.store.write_back(study_id, &write).await?;
        tracing::info!("💾 study {}: wrote {} captions", study_id, write.captions.len());
    }

    report.finalized = finalize(ctx, study_id).await?;

    tracing::info!(
        "📊 study {} pass done: succeeded={}, failed={}, skipped={}, finalized={}",
        study_id,
        report.succeeded,
        report.failed,
        report.skipped,
        report.finalized
    );

    Ok(PassOutcome::Processed(report))
}
