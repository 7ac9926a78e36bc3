//! Axum router construction and S3 route mapping.
//!
//! The [`app`] function wires every endpoint in the dispatch table to its
//! handler and returns a ready-to-serve [`axum::Router`]. A single handler
//! per method+path dispatches internally on query markers, the same shape
//! `examples/e6qu-bleepstore` uses for its router.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, head, post, put};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, warn};

use crate::auth;
use crate::chunked;
use crate::errors::S3Error;
use crate::hash::sha256_hex;
use crate::primitives::{parse_query_string, MAX_HEADER_SIZE};
use crate::AppState;

const STREAMING_SENTINEL: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD";

/// Matches `MAX_BODY_SIZE`: request bodies above this are rejected before
/// the handler ever sees them.
const MAX_BODY_SIZE: usize = 5 * 1024 * 1024 * 1024;

/// Build the axum [`Router`] with every S3-compatible route.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handle_get_service))
        .route("/:bucket", get(handle_get_bucket))
        .route("/:bucket", put(handle_put_bucket))
        .route("/:bucket", delete(handle_delete_bucket))
        .route("/:bucket/*key", get(handle_get_object))
        .route("/:bucket/*key", put(handle_put_object))
        .route("/:bucket/*key", delete(handle_delete_object))
        .route("/:bucket/*key", head(handle_head_object))
        .route("/:bucket/*key", post(handle_post_object))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, auth_middleware))
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(middleware::from_fn(header_size_middleware))
}

// -- Header size middleware ---------------------------------------------------

/// Rejects requests whose header block exceeds `MAX_HEADER_SIZE`, mirroring
/// each header as `name: value\r\n` the way it appears on the wire.
async fn header_size_middleware(req: Request<axum::body::Body>, next: Next) -> Result<Response, S3Error> {
    let total: usize = req
        .headers()
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 4)
        .sum();
    if total > MAX_HEADER_SIZE {
        return Err(S3Error::InvalidArgument("request header block exceeds MAX_HEADER_SIZE".into()));
    }
    Ok(next.run(req).await)
}

// -- Common headers middleware -----------------------------------------------

/// Adds `Date` and `Server` to every response, the way the teacher's
/// `common_headers_middleware` does.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let date = crate::primitives::format_http_date(now);
    headers.insert("date", HeaderValue::from_str(&date).unwrap());
    headers.insert("server", HeaderValue::from_static("s3lite"));

    response
}

// -- Auth + aws-chunked middleware -------------------------------------------

/// SigV4 verification against the server's single configured credential
/// pair, followed by aws-chunked decoding of the body when the client
/// declared a streaming payload.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, S3Error> {
    let (parts, body) = req.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| S3Error::InvalidArgument(format!("failed to read request body: {e}")))?;

    let auth_header = parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| S3Error::AccessDenied)?;
    let parsed = auth::parse_authorization_header(auth_header)?;

    let query_string = parts.uri.query().unwrap_or("");
    let headers = auth::extract_headers_for_signing(&parts.headers);

    let payload_hash = match parts.headers.get("x-amz-content-sha256").and_then(|v| v.to_str().ok()) {
        Some(declared) => declared.to_string(),
        None => sha256_hex(&body_bytes),
    };

    auth::verify(
        parts.method.as_str(),
        parts.uri.path(),
        query_string,
        &headers,
        &payload_hash,
        &parsed,
        &state.config.access_key,
        &state.config.secret_key,
    )?;
    debug!(access_key = %parsed.access_key_id, "request authenticated");

    let decoded_body = if payload_hash == STREAMING_SENTINEL || chunked::looks_like_chunked(&body_bytes) {
        chunked::decode(&body_bytes)?
    } else {
        body_bytes.to_vec()
    };

    let req = Request::from_parts(parts, axum::body::Body::from(decoded_body));
    Ok(next.run(req).await)
}

// -- Query parameter parsing --------------------------------------------------

fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    parse_query_string(raw.as_deref().unwrap_or("")).into_iter().collect()
}

// -- Service-level dispatch ---------------------------------------------------

async fn handle_get_service(State(state): State<Arc<AppState>>) -> Result<Response, S3Error> {
    crate::handlers::bucket::list_buckets(state).await
}

// -- Bucket-level dispatch -----------------------------------------------------

/// `GET /:bucket` -- only `?list-type=2` (ListObjectsV2) is recognised;
/// anything else is unmatched per the dispatch table.
async fn handle_get_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);
    if query.get("list-type").is_some_and(|v| v == "2") {
        crate::handlers::object::list_objects_v2(state, &bucket, &query).await
    } else {
        Err(S3Error::MethodNotAllowed)
    }
}

async fn handle_put_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    crate::handlers::bucket::create_bucket(state, &bucket).await
}

async fn handle_delete_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    crate::handlers::bucket::delete_bucket(state, &bucket).await
}

// -- Object-level dispatch -----------------------------------------------------

async fn handle_get_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    crate::handlers::object::get_object(state, &bucket, &key, &headers).await
}

async fn handle_head_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    crate::handlers::object::head_object(state, &bucket, &key, &headers).await
}

/// `PUT /:bucket/*key` -- `uploadId`/`partNumber` routes to `UploadPart`,
/// otherwise `PutObject`.
async fn handle_put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    body: axum::body::Bytes,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);
    if query.contains_key("uploadId") || query.contains_key("partNumber") {
        crate::handlers::multipart::upload_part(state, &query, body).await
    } else {
        crate::handlers::object::put_object(state, &bucket, &key, body).await
    }
}

/// `DELETE /:bucket/*key` -- `uploadId` routes to `AbortMultipartUpload`,
/// otherwise `DeleteObject`.
async fn handle_delete_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);
    if query.contains_key("uploadId") {
        crate::handlers::multipart::abort_multipart_upload(state, &query).await
    } else {
        crate::handlers::object::delete_object(state, &bucket, &key).await
    }
}

/// `POST /:bucket/*key` -- bare `uploads` starts a multipart upload,
/// `uploadId` completes one; anything else is unmatched.
async fn handle_post_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    body: axum::body::Bytes,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);
    if query.contains_key("uploads") {
        crate::handlers::multipart::create_multipart_upload(state, &bucket, &key).await
    } else if query.contains_key("uploadId") {
        crate::handlers::multipart::complete_multipart_upload(state, &query, body).await
    } else {
        warn!(%bucket, %key, "unmatched POST query on object path");
        Err(S3Error::MethodNotAllowed)
    }
}
