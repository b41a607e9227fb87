use aether_atoms::drawing::Annotator;
use aether_atoms::media::S3BlobStore;
use aether_atoms::studies::DynamoStudyStore;
use aether_shared::{telemetry, AppState, WorkerSettings};
use annotations_block::{OpenAiClient, Poller, WorkerContext};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    telemetry::init_tracing(true);

    let settings = match WorkerSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("❌ invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let state = AppState::new(&settings.storage).await;

    let model = match OpenAiClient::new(
        settings.openai_api_key.clone(),
        settings.openai_base_url.clone(),
        settings.vision_model.clone(),
    ) {
        Ok(model) => model,
        Err(e) => {
            tracing::error!("❌ cannot build model client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let annotator = Annotator::from_font_file(&settings.caption_font, settings.caption_font_size)
        .unwrap_or_else(|e| {
            tracing::warn!("⚠️ {}; captions will not be rendered", e);
            Annotator::without_font()
        });

    let store = DynamoStudyStore::new(
        state.dynamo_client.clone(),
        settings.table_name.clone(),
        settings.schema,
    );
    let blobs = S3BlobStore::new(state.s3_client.clone(), state.bucket.clone());

    tracing::info!(
        "🤖 AI worker starting: table={}, schema={:?}, model={}",
        settings.table_name,
        settings.schema,
        model.model()
    );

    let ctx = WorkerContext::new(Arc::new(store), Arc::new(blobs), Arc::new(model), annotator);

    Poller::new(ctx)
        .with_batch_size(settings.batch_size)
        .with_poll_interval(settings.poll_interval)
        .with_error_backoff(settings.error_backoff)
        .run_forever()
        .await;

    ExitCode::SUCCESS
}
