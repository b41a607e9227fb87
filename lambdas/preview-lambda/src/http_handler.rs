use aether_atoms::media::{self, BlobStore};
use lambda_http::{
    http::{header::HeaderValue, Method, StatusCode},
    Body, Error, Request, Response,
};

fn with_cors_headers(mut resp: Response<Body>) -> Response<Body> {
    let headers = resp.headers_mut();
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET,HEAD,POST,OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type,Authorization"),
    );
    resp
}

fn json(status: StatusCode, value: serde_json::Value) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(value.to_string().into())
        .map_err(Box::new)?)
}

fn empty(status: StatusCode) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .body(Body::Empty)
        .map_err(Box::new)?)
}

/// Main Lambda handler - routes preview service requests
pub(crate) async fn function_handler(
    event: Request,
    blobs: &dyn BlobStore,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path().trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    tracing::info!("🚀 Preview Lambda invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == Method::OPTIONS {
        return empty(StatusCode::OK).map(with_cors_headers);
    }

    let resp = match (method, path) {
        (&Method::GET, "/") => json(
            StatusCode::OK,
            serde_json::json!({ "message": "Aether JPEG service is running" }),
        ),
        (&Method::HEAD, "/") => empty(StatusCode::OK),
        (&Method::GET, "/health") => json(
            StatusCode::OK,
            serde_json::json!({ "status": "ok", "service": "aether-preview" }),
        ),
        (&Method::POST, "/preview") => media::create_preview_handler(blobs, event.body()).await,
        (_, "/" | "/health" | "/preview") => json(
            StatusCode::METHOD_NOT_ALLOWED,
            serde_json::json!({ "error": "Method not allowed" }),
        ),
        _ => json(
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "Not found" }),
        ),
    };

    resp.map(with_cors_headers)
}
