use lambda_http::{http::StatusCode, Body, Error, Response};

use super::dicom::dicom_to_jpeg;
use super::model::{
    preview_key, MonotonicMillis, PreviewRequest, PreviewResponse, JPEG_CONTENT_TYPE,
    PRESIGNED_URL_TTL,
};
use super::service::{BlobError, BlobStore};

static PREVIEW_CLOCK: MonotonicMillis = MonotonicMillis::new();

fn json_response(status: StatusCode, body: String) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(body.into())
        .map_err(Box::new)?)
}

fn error_response(status: StatusCode, message: String) -> Result<Response<Body>, Error> {
    json_response(status, serde_json::json!({ "error": message }).to_string())
}

/// HTTP Handler: POST /preview
///
/// Converts the DICOM object at `dicomKey` into a sharded JPEG preview and
/// returns a presigned URL for it.
pub async fn create_preview_handler(
    blobs: &dyn BlobStore,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: PreviewRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => {
            tracing::error!("Failed to parse preview request: {}", e);
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e));
        }
    };

    tracing::info!(
        "📥 create_preview_handler: dicom_key={}, study_id={}",
        req.dicom_key,
        req.study_id
    );

    let dicom_bytes = match blobs.fetch_bytes(&req.dicom_key).await {
        Ok(bytes) => bytes,
        Err(BlobError::NotFound(_)) => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("DICOM not found: {}", req.dicom_key),
            );
        }
        Err(e) => {
            tracing::error!("❌ fetching {} failed: {}", req.dicom_key, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let jpeg = match dicom_to_jpeg(&dicom_bytes) {
        Ok(jpeg) => jpeg,
        Err(e) => {
            tracing::error!("❌ converting {} failed: {}", req.dicom_key, e);
            return error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string());
        }
    };

    let key = preview_key(&req.study_id, PREVIEW_CLOCK.next());
    let uploaded = async {
        blobs.put_bytes(&key, jpeg, JPEG_CONTENT_TYPE).await?;
        blobs.presign_read(&key, PRESIGNED_URL_TTL).await
    }
    .await;

    match uploaded {
        Ok(preview_url) => {
            tracing::info!("✅ preview ready: study_id={}, key={}", req.study_id, key);
            json_response(
                StatusCode::OK,
                serde_json::to_string(&PreviewResponse { preview_url })?,
            )
        }
        Err(e) => {
            tracing::error!("❌ storing preview {} failed: {}", key, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
