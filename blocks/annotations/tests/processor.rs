mod support;

use aether_atoms::studies::{RequestStatus, StudyResults};
use annotations_block::{process_study, PassOutcome, PassReport, ProcessError, NO_ABNORMALITIES_SUMMARY};
use support::*;

fn interpretation_captions(store: &MemoryStore, id: &str) -> Vec<String> {
    match store.study(id).results {
        StudyResults::Embedded { interpretation } => interpretation
            .map(|i| i.enhanced_captions.into_iter().map(|c| c.url).collect())
            .unwrap_or_default(),
        StudyResults::Queue { .. } => panic!("expected embedded schema"),
    }
}

#[tokio::test]
async fn partial_failure_keeps_study_open() {
    let store = MemoryStore::with(vec![embedded_study("s1", &["img/1.png", "img/2.png", "img/3.png"])]);
    let blobs = MemoryBlobs::with_images(&["img/1.png", "img/2.png"]);
    let model = ScriptedModel::replying(FINDING_REPLY);
    let ctx = context(&store, &blobs, &model);

    let outcome = process_study(&ctx, "s1").await.unwrap();
    assert_eq!(
        outcome,
        PassOutcome::Processed(PassReport {
            succeeded: 2,
            failed: 1,
            skipped: 0,
            finalized: false
        })
    );

    let study = store.study("s1");
    assert_eq!(study.preview_count, Some(3));
    assert!(study.analysis_requested);
    assert_eq!(interpretation_captions(&store, "s1"), vec!["img/1.png", "img/2.png"]);

    let retry = study.retry_state("img/3.png").unwrap();
    assert_eq!(retry.attempts, 1);
    assert!(!retry.permanently_failed);
    assert!(retry.last_error.as_deref().unwrap().contains("img/3.png"));

    let summaries = model.summaries.lock().unwrap().clone();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].contains("Image 1: right lower lobe opacity (possible: pneumonia)"));
    assert!(summaries[0].contains("Image 2:"));
    assert!(!summaries[0].contains("Image 3:"));

    // annotated copies land under the owner's prefix
    let objects = blobs.objects.lock().unwrap();
    assert_eq!(objects.keys().filter(|k| k.starts_with("annotated/user-1/")).count(), 2);
}

#[tokio::test]
async fn fail_ceiling_finalizes_and_is_never_retried() {
    let store = MemoryStore::with(vec![embedded_study("s1", &["img/1.png", "img/2.png", "img/3.png"])]);
    let blobs = MemoryBlobs::with_images(&["img/1.png", "img/2.png"]);
    let model = ScriptedModel::replying(FINDING_REPLY);
    let ctx = context(&store, &blobs, &model);

    process_study(&ctx, "s1").await.unwrap();
    let second = process_study(&ctx, "s1").await.unwrap();
    assert_eq!(
        second,
        PassOutcome::Processed(PassReport {
            succeeded: 0,
            failed: 1,
            skipped: 0,
            finalized: false
        })
    );

    let third = process_study(&ctx, "s1").await.unwrap();
    assert_eq!(
        third,
        PassOutcome::Processed(PassReport {
            succeeded: 0,
            failed: 1,
            skipped: 0,
            finalized: true
        })
    );

    let study = store.study("s1");
    assert!(!study.analysis_requested);
    let retry = study.retry_state("img/3.png").unwrap();
    assert_eq!(retry.attempts, 3);
    assert!(retry.permanently_failed);

    // nothing pending any more; the failed locator is not fetched again
    assert_eq!(process_study(&ctx, "s1").await.unwrap(), PassOutcome::NothingPending);
    assert_eq!(blobs.fetch_count("img/3.png"), 3);
    assert_eq!(blobs.fetch_count("img/1.png"), 1);
    assert_eq!(store.write_backs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn analysis_failures_count_toward_the_ceiling() {
    let store = MemoryStore::with(vec![embedded_study("s1", &["img/1.png", "img/2.png"])]);
    let blobs = MemoryBlobs::with_images(&["img/1.png"]);
    let model = ScriptedModel::replying(FINDING_REPLY);
    let ctx = context(&store, &blobs, &model);

    // img/1 keeps getting unusable replies while img/2 is missing
    for _ in 0..3 {
        model.then("{}");
        process_study(&ctx, "s1").await.unwrap();
    }

    let study = store.study("s1");
    assert!(study.is_permanently_failed("img/1.png"));
    assert!(study.is_permanently_failed("img/2.png"));
    assert!(!study.analysis_requested);
    assert!(interpretation_captions(&store, "s1").is_empty());
    assert!(store.write_backs.lock().unwrap().is_empty());
    assert!(study
        .retry_state("img/1.png")
        .unwrap()
        .last_error
        .as_deref()
        .unwrap()
        .contains("malformed"));
}

#[tokio::test]
async fn exhausted_locator_is_skipped_without_fetching() {
    let mut study = embedded_study("s1", &["img/1.png", "img/2.png"]);
    study.retry_states.push(aether_atoms::studies::RetryState {
        locator: "img/2.png".to_string(),
        attempts: 3,
        last_error: Some("fetch failed".to_string()),
        permanently_failed: true,
        updated_at: None,
    });
    let store = MemoryStore::with(vec![study]);
    let blobs = MemoryBlobs::with_images(&["img/1.png", "img/2.png"]);
    let model = ScriptedModel::replying(FINDING_REPLY);
    let ctx = context(&store, &blobs, &model);

    let outcome = process_study(&ctx, "s1").await.unwrap();
    assert_eq!(
        outcome,
        PassOutcome::Processed(PassReport {
            succeeded: 1,
            failed: 0,
            skipped: 1,
            finalized: true
        })
    );
    assert_eq!(blobs.fetch_count("img/2.png"), 0);
}

#[tokio::test]
async fn empty_findings_use_fixed_summary_without_model_call() {
    let store = MemoryStore::with(vec![embedded_study("s1", &["img/1.png", "img/2.png"])]);
    let blobs = MemoryBlobs::with_images(&["img/1.png", "img/2.png"]);
    let model = ScriptedModel::replying(NORMAL_REPLY);
    let ctx = context(&store, &blobs, &model);

    let outcome = process_study(&ctx, "s1").await.unwrap();
    assert!(matches!(outcome, PassOutcome::Processed(PassReport { succeeded: 2, finalized: true, .. })));
    assert_eq!(model.summarize_calls(), 0);

    match store.study("s1").results {
        StudyResults::Embedded { interpretation: Some(i) } => {
            assert_eq!(i.aggregate_summary, NO_ABNORMALITIES_SUMMARY);
            assert_eq!(i.enhanced_captions.len(), 2);
            assert!(i.updated_at.is_some());
        }
        other => panic!("unexpected results {:?}", other),
    }
}

#[tokio::test]
async fn finished_study_is_left_untouched() {
    let store = MemoryStore::with(vec![embedded_study("s1", &["img/1.png"])]);
    let blobs = MemoryBlobs::with_images(&["img/1.png"]);
    let model = ScriptedModel::replying(FINDING_REPLY);
    let ctx = context(&store, &blobs, &model);

    process_study(&ctx, "s1").await.unwrap();
    assert!(!store.study("s1").analysis_requested);

    let mutations = store.mutations();
    let puts = blobs.puts();
    assert_eq!(process_study(&ctx, "s1").await.unwrap(), PassOutcome::NothingPending);
    assert_eq!(store.mutations(), mutations);
    assert_eq!(blobs.puts(), puts);
}

#[tokio::test]
async fn only_uncaptioned_locators_are_fetched() {
    let store = MemoryStore::with(vec![embedded_study(
        "s1",
        &["img/1.png", "img/2.png", "img/3.png", "img/4.png"],
    )]);
    let blobs = MemoryBlobs::with_images(&["img/1.png", "img/2.png", "img/3.png", "img/4.png"]);
    let model = ScriptedModel::replying(FINDING_REPLY);
    let ctx = context(&store, &blobs, &model);

    // first pass: 1 and 2 succeed, 3 and 4 return garbage
    model.then(FINDING_REPLY).then(FINDING_REPLY).then("nope").then("nope");
    process_study(&ctx, "s1").await.unwrap();
    assert_eq!(blobs.total_fetches(), 4);

    process_study(&ctx, "s1").await.unwrap();
    assert_eq!(blobs.total_fetches(), 6);
    assert_eq!(blobs.fetch_count("img/1.png"), 1);
    assert_eq!(blobs.fetch_count("img/2.png"), 1);

    let urls = interpretation_captions(&store, "s1");
    assert_eq!(urls, vec!["img/1.png", "img/2.png", "img/3.png", "img/4.png"]);
    assert!(!store.study("s1").analysis_requested);
}

#[tokio::test]
async fn duplicate_locators_are_processed_once() {
    let store = MemoryStore::with(vec![embedded_study("s1", &["img/1.png", "img/1.png"])]);
    let blobs = MemoryBlobs::with_images(&["img/1.png"]);
    let model = ScriptedModel::replying(FINDING_REPLY);
    let ctx = context(&store, &blobs, &model);

    process_study(&ctx, "s1").await.unwrap();
    assert_eq!(blobs.fetch_count("img/1.png"), 1);
    assert_eq!(interpretation_captions(&store, "s1"), vec!["img/1.png"]);

    let study = store.study("s1");
    assert_eq!(study.preview_count, Some(1));
    assert!(!study.analysis_requested);
}

#[tokio::test]
async fn failed_write_back_persists_nothing_and_is_redone() {
    let store = MemoryStore::with(vec![embedded_study("s1", &["img/1.png", "img/2.png"])]);
    let blobs = MemoryBlobs::with_images(&["img/1.png", "img/2.png"]);
    let model = ScriptedModel::replying(FINDING_REPLY);
    let ctx = context(&store, &blobs, &model);

    store.fail_write_back_for.lock().unwrap().insert("s1".to_string());
    let err = process_study(&ctx, "s1").await.unwrap_err();
    assert!(matches!(err, ProcessError::Store(_)));
    assert!(interpretation_captions(&store, "s1").is_empty());
    assert!(store.study("s1").analysis_requested);

    store.fail_write_back_for.lock().unwrap().clear();
    process_study(&ctx, "s1").await.unwrap();

    let writes = store.write_backs.lock().unwrap();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].captions.len(), 2);
    assert_eq!(blobs.fetch_count("img/1.png"), 2);
}

#[tokio::test]
async fn preview_count_is_kept_when_locators_grow() {
    let mut study = embedded_study("s1", &["img/1.png", "img/2.png", "img/3.png"]);
    study.preview_count = Some(2);
    let store = MemoryStore::with(vec![study]);
    let blobs = MemoryBlobs::with_images(&["img/1.png", "img/2.png"]);
    let model = ScriptedModel::replying(FINDING_REPLY);
    let ctx = context(&store, &blobs, &model);

    let outcome = process_study(&ctx, "s1").await.unwrap();
    assert!(matches!(outcome, PassOutcome::Processed(PassReport { finalized: true, .. })));
    assert_eq!(store.study("s1").preview_count, Some(2));
}

#[tokio::test]
async fn queue_completes_first_pending_request_only() {
    let store = MemoryStore::with(vec![queue_study(
        "q1",
        &["img/1.png", "img/2.png"],
        &["2024-06-01T10:00:00Z", "2024-06-01T11:00:00Z"],
    )]);
    let blobs = MemoryBlobs::with_images(&["img/1.png"]);
    let model = ScriptedModel::replying(FINDING_REPLY);
    let ctx = context(&store, &blobs, &model);

    process_study(&ctx, "q1").await.unwrap();

    let study = store.study("q1");
    assert!(study.analysis_requested);
    let StudyResults::Queue { requests } = &study.results else {
        panic!("expected queue schema");
    };
    assert_eq!(requests[0].status, RequestStatus::Completed);
    assert!(requests[0].completed_at.is_some());
    let first = requests[0].interpretation.as_ref().unwrap();
    assert_eq!(first.enhanced_captions.len(), 1);
    assert_eq!(first.enhanced_captions[0].url, "img/1.png");
    assert_eq!(requests[1].status, RequestStatus::Pending);
    assert!(requests[1].interpretation.is_none());

    // the second request sees img/1 as done and only retries img/2
    let second = process_study(&ctx, "q1").await.unwrap();
    assert_eq!(
        second,
        PassOutcome::Processed(PassReport {
            succeeded: 0,
            failed: 1,
            skipped: 0,
            finalized: false
        })
    );
    assert_eq!(blobs.fetch_count("img/1.png"), 1);
    let StudyResults::Queue { requests } = store.study("q1").results else {
        panic!("expected queue schema");
    };
    assert_eq!(requests[1].status, RequestStatus::Pending);
}

#[tokio::test]
async fn queue_request_completion_clears_gate() {
    let store = MemoryStore::with(vec![queue_study("q1", &["img/1.png"], &["t1"])]);
    let blobs = MemoryBlobs::with_images(&["img/1.png"]);
    let model = ScriptedModel::replying(FINDING_REPLY);
    let ctx = context(&store, &blobs, &model);

    let outcome = process_study(&ctx, "q1").await.unwrap();
    assert!(matches!(outcome, PassOutcome::Processed(PassReport { finalized: true, .. })));
    assert!(!store.study("q1").analysis_requested);
    assert_eq!(process_study(&ctx, "q1").await.unwrap(), PassOutcome::NothingPending);
}

#[tokio::test]
async fn unknown_study_is_an_error() {
    let store = MemoryStore::with(vec![]);
    let blobs = MemoryBlobs::with_images(&[]);
    let model = ScriptedModel::replying(FINDING_REPLY);
    let ctx = context(&store, &blobs, &model);

    let err = process_study(&ctx, "missing").await.unwrap_err();
    assert!(matches!(err, ProcessError::StudyNotFound(id) if id == "missing"));
}
