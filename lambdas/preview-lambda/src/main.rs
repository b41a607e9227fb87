use aether_atoms::media::S3BlobStore;
use aether_shared::{telemetry, AppState, StorageSettings};
use lambda_http::{run, service_fn, Error, Request};
use std::sync::Arc;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    telemetry::init_tracing(false);

    let storage = StorageSettings::from_env()?;
    let state = AppState::new(&storage).await;
    let blobs = Arc::new(S3BlobStore::new(state.s3_client.clone(), state.bucket.clone()));

    run(service_fn(move |event: Request| {
        let blobs = blobs.clone();
        async move { http_handler::function_handler(event, blobs.as_ref()).await }
    }))
    .await
}
