pub mod config;
pub mod telemetry;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::Client as S3Client;

pub use config::{ConfigError, StorageSettings, WorkerSettings};

/// AWS clients built once per process and shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub dynamo_client: DynamoClient,
    pub s3_client: S3Client,
    pub bucket: String,
}

impl AppState {
    pub async fn new(storage: &StorageSettings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &storage.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(creds) = &storage.credentials {
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                None,
                None,
                "aether-static",
            ));
        }

        let config = loader.load().await;
        tracing::info!(
            "🔧 AWS clients ready: region={:?}, bucket={}",
            config.region(),
            storage.bucket
        );

        Self {
            dynamo_client: DynamoClient::new(&config),
            s3_client: S3Client::new(&config),
            bucket: storage.bucket.clone(),
        }
    }
}
