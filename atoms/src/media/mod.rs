// Re-export model types and service functions
pub mod dicom;
pub mod http;
pub mod model;
pub mod service;

pub use dicom::{dicom_to_jpeg, PreviewError};
pub use http::*;
pub use model::{
    annotated_key, key_from_locator, preview_key, preview_shard, MonotonicMillis, PreviewRequest,
    PreviewResponse, JPEG_CONTENT_TYPE, PRESIGNED_URL_TTL,
};
pub use service::{BlobError, BlobStore, S3BlobStore};
