//! Bucket-level handlers: `ListBuckets`, `CreateBucket`, `DeleteBucket`.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::errors::S3Error;
use crate::xml::render_list_buckets_result;
use crate::AppState;

const XML_CONTENT_TYPE: &str = "application/xml";

/// `GET /` -- enumerate every bucket, sorted by name.
pub async fn list_buckets(state: Arc<AppState>) -> Result<Response, S3Error> {
    let buckets = state.storage.list_buckets()?;
    let rendered: Vec<(String, String)> = buckets
        .iter()
        .map(|b| (b.name.clone(), b.creation_date_iso8601()))
        .collect();
    let refs: Vec<(&str, &str)> = rendered.iter().map(|(n, d)| (n.as_str(), d.as_str())).collect();
    let body = render_list_buckets_result(&refs);

    Ok((StatusCode::OK, [("content-type", XML_CONTENT_TYPE)], body).into_response())
}

/// `PUT /<bucket>` -- create the bucket's directory. Idempotent: an existing
/// bucket directory is a 200, not an error.
pub async fn create_bucket(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    state.storage.create_bucket(bucket)?;
    Ok((StatusCode::OK, [("content-type", XML_CONTENT_TYPE)], "").into_response())
}

/// `DELETE /<bucket>` -- remove an empty bucket directory.
pub async fn delete_bucket(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    state.storage.delete_bucket(bucket)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
