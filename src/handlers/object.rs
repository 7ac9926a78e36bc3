//! Object-level handlers: `PutObject`, `GetObject`, `HeadObject`,
//! `DeleteObject`, `ListObjectsV2`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;

use crate::errors::S3Error;
use crate::primitives::parse_range;
use crate::xml::{render_list_objects_result, ObjectEntry};
use crate::AppState;

const XML_CONTENT_TYPE: &str = "application/xml";
const DEFAULT_MAX_KEYS: u32 = 1000;

/// `PUT /<bucket>/<key>` -- write the body atomically, respond with the
/// content MD5 as a quoted `ETag`.
pub async fn put_object(state: Arc<AppState>, bucket: &str, key: &str, body: Bytes) -> Result<Response, S3Error> {
    let etag = state.storage.put_object(bucket, key, body)?;
    Ok((
        StatusCode::OK,
        [("etag", format!("\"{etag}\""))],
        "",
    )
        .into_response())
}

/// `GET /<bucket>/<key>` -- full object, or a single byte range via `Range`.
pub async fn get_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let object = state.storage.get_object(bucket, key)?;
    let etag_header = format!("\"{}\"", object.meta.etag);
    let last_modified = crate::primitives::format_http_date(object.meta.last_modified);

    match headers.get(axum::http::header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(raw_range) => match parse_range(raw_range, object.meta.size) {
            Some((start, end)) => {
                let slice = object.data.slice(start as usize..=end as usize);
                let content_range = format!("bytes {start}-{end}/{}", object.meta.size);
                Ok((
                    StatusCode::PARTIAL_CONTENT,
                    [
                        ("content-type", "application/octet-stream".to_string()),
                        ("etag", etag_header),
                        ("last-modified", last_modified),
                        ("content-range", content_range),
                        ("content-length", slice.len().to_string()),
                    ],
                    slice,
                )
                    .into_response())
            }
            None => Err(S3Error::InvalidArgument("invalid Range header".into())),
        },
        None => Ok((
            StatusCode::OK,
            [
                ("content-type", "application/octet-stream".to_string()),
                ("etag", etag_header),
                ("last-modified", last_modified),
                ("content-length", object.meta.size.to_string()),
            ],
            object.data,
        )
            .into_response()),
    }
}

/// `HEAD /<bucket>/<key>` -- identical header logic to `GetObject`, no body.
pub async fn head_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let meta = state.storage.head_object(bucket, key)?;
    let etag_header = format!("\"{}\"", meta.etag);
    let last_modified = crate::primitives::format_http_date(meta.last_modified);

    match headers.get(axum::http::header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(raw_range) => match parse_range(raw_range, meta.size) {
            Some((start, end)) => {
                let content_range = format!("bytes {start}-{end}/{}", meta.size);
                Ok((
                    StatusCode::PARTIAL_CONTENT,
                    [
                        ("etag", etag_header),
                        ("last-modified", last_modified),
                        ("content-range", content_range),
                        ("content-length", (end - start + 1).to_string()),
                    ],
                )
                    .into_response())
            }
            None => Err(S3Error::InvalidArgument("invalid Range header".into())),
        },
        None => Ok((
            StatusCode::OK,
            [
                ("etag", etag_header),
                ("last-modified", last_modified),
                ("content-length", meta.size.to_string()),
            ],
        )
            .into_response()),
    }
}

/// `DELETE /<bucket>/<key>` -- unlink, always 204.
pub async fn delete_object(state: Arc<AppState>, bucket: &str, key: &str) -> Result<Response, S3Error> {
    state.storage.delete_object(bucket, key)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `GET /<bucket>?list-type=2` -- depth-first listing with prefix/delimiter/
/// continuation-token pagination.
pub async fn list_objects_v2(
    state: Arc<AppState>,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let prefix = query.get("prefix").cloned().unwrap_or_default();
    let delimiter = query.get("delimiter").cloned().unwrap_or_default();
    let max_keys = match query.get("max-keys") {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| S3Error::InvalidArgument("max-keys must be a positive integer".into()))?
            .min(DEFAULT_MAX_KEYS),
        None => DEFAULT_MAX_KEYS,
    };
    let continuation_key = match query.get("continuation-token") {
        Some(token) => {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(token)
                .map_err(|_| S3Error::InvalidArgument("invalid continuation-token".into()))?;
            Some(
                String::from_utf8(decoded)
                    .map_err(|_| S3Error::InvalidArgument("invalid continuation-token".into()))?,
            )
        }
        None => None,
    };

    let result = state
        .storage
        .list_objects(bucket, &prefix, &delimiter, max_keys, continuation_key.as_deref())?;

    let last_modified: Vec<String> = result.keys.iter().map(|(_, m)| m.last_modified_iso8601()).collect();
    let entries: Vec<ObjectEntry> = result
        .keys
        .iter()
        .zip(last_modified.iter())
        .map(|((key, meta), lm)| ObjectEntry {
            key,
            last_modified: lm,
            etag: &meta.etag,
            size: meta.size,
        })
        .collect();
    let common_prefix_refs: Vec<&str> = result.common_prefixes.iter().map(String::as_str).collect();
    let key_count = (entries.len() + common_prefix_refs.len()) as u32;
    let next_token = result
        .next_continuation_key
        .map(|k| base64::engine::general_purpose::STANDARD.encode(k.as_bytes()));

    let body = render_list_objects_result(
        bucket,
        &prefix,
        &delimiter,
        max_keys,
        key_count,
        result.is_truncated,
        next_token.as_deref(),
        &entries,
        &common_prefix_refs,
    );

    Ok((StatusCode::OK, [("content-type", XML_CONTENT_TYPE)], body).into_response())
}
