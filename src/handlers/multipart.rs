//! Multipart-upload handlers: Initiate, UploadPart, Complete, Abort.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::errors::S3Error;
use crate::xml::{render_complete_multipart_upload_result, render_initiate_multipart_upload_result};
use crate::AppState;

const XML_CONTENT_TYPE: &str = "application/xml";

/// `POST /<bucket>/<key>?uploads` -- start a new multipart upload.
pub async fn create_multipart_upload(state: Arc<AppState>, bucket: &str, key: &str) -> Result<Response, S3Error> {
    let upload_id = state.storage.initiate_multipart_upload(bucket, key)?;
    let body = render_initiate_multipart_upload_result(bucket, key, &upload_id);
    Ok((StatusCode::OK, [("content-type", XML_CONTENT_TYPE)], body).into_response())
}

/// `PUT /<bucket>/<key>?partNumber=N&uploadId=...` -- write one part.
pub async fn upload_part(
    state: Arc<AppState>,
    query: &HashMap<String, String>,
    body: Bytes,
) -> Result<Response, S3Error> {
    let upload_id = query
        .get("uploadId")
        .ok_or_else(|| S3Error::InvalidArgument("missing uploadId".into()))?;
    let part_number: u32 = query
        .get("partNumber")
        .ok_or_else(|| S3Error::InvalidArgument("missing partNumber".into()))?
        .parse()
        .map_err(|_| S3Error::InvalidArgument("partNumber must be an integer".into()))?;

    let etag = state.storage.upload_part(upload_id, part_number, body)?;
    Ok((StatusCode::OK, [("etag", format!("\"{etag}\""))], "").into_response())
}

/// `POST /<bucket>/<key>?uploadId=...` -- assemble the upload's parts in
/// filesystem order into the final object. The client's part list is parsed
/// for well-formedness only; it does not influence assembly.
pub async fn complete_multipart_upload(
    state: Arc<AppState>,
    query: &HashMap<String, String>,
    body: Bytes,
) -> Result<Response, S3Error> {
    let upload_id = query
        .get("uploadId")
        .ok_or_else(|| S3Error::InvalidArgument("missing uploadId".into()))?;

    parse_complete_multipart_upload_xml(&body)?;

    let (bucket, key, etag) = state.storage.complete_multipart_upload(upload_id)?;
    let location = format!("/{bucket}/{key}");
    let body = render_complete_multipart_upload_result(&location, &bucket, &key, &format!("\"{etag}\""));
    Ok((StatusCode::OK, [("content-type", XML_CONTENT_TYPE)], body).into_response())
}

/// `DELETE /<bucket>/<key>?uploadId=...` -- discard an in-progress upload.
pub async fn abort_multipart_upload(state: Arc<AppState>, query: &HashMap<String, String>) -> Result<Response, S3Error> {
    let upload_id = query
        .get("uploadId")
        .ok_or_else(|| S3Error::InvalidArgument("missing uploadId".into()))?;
    state.storage.abort_multipart_upload(upload_id)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Check that the request body is a well-formed `<CompleteMultipartUpload>`
/// part list. The parsed `(PartNumber, ETag)` pairs are discarded -- the
/// server assembles parts in filesystem order instead (see storage.rs).
fn parse_complete_multipart_upload_xml(body: &[u8]) -> Result<(), S3Error> {
    if body.is_empty() {
        return Err(S3Error::InvalidArgument("empty CompleteMultipartUpload body".into()));
    }

    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut saw_root = false;
    let mut current_tag: Option<String> = None;
    let mut part_number: Option<String> = None;
    let mut etag: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "CompleteMultipartUpload" {
                    saw_root = true;
                }
                if name == "Part" {
                    part_number = None;
                    etag = None;
                }
                current_tag = Some(name);
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|_| S3Error::InvalidArgument("malformed CompleteMultipartUpload XML".into()))?
                    .into_owned();
                match current_tag.as_deref() {
                    Some("PartNumber") => part_number = Some(text),
                    Some("ETag") => etag = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "Part" {
                    let n = part_number
                        .as_ref()
                        .ok_or_else(|| S3Error::InvalidArgument("Part missing PartNumber".into()))?;
                    n.parse::<u32>()
                        .map_err(|_| S3Error::InvalidArgument("PartNumber must be an integer".into()))?;
                    etag.as_ref()
                        .ok_or_else(|| S3Error::InvalidArgument("Part missing ETag".into()))?;
                }
                current_tag = None;
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(S3Error::InvalidArgument("malformed CompleteMultipartUpload XML".into())),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(S3Error::InvalidArgument("missing CompleteMultipartUpload root element".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_part_list() {
        let xml = b"<CompleteMultipartUpload><Part><PartNumber>1</PartNumber><ETag>\"abc\"</ETag></Part></CompleteMultipartUpload>";
        assert!(parse_complete_multipart_upload_xml(xml).is_ok());
    }

    #[test]
    fn rejects_empty_body() {
        assert!(parse_complete_multipart_upload_xml(b"").is_err());
    }

    #[test]
    fn rejects_missing_root() {
        let xml = b"<Part><PartNumber>1</PartNumber><ETag>\"abc\"</ETag></Part>";
        assert!(parse_complete_multipart_upload_xml(xml).is_err());
    }

    #[test]
    fn rejects_part_missing_etag() {
        let xml = b"<CompleteMultipartUpload><Part><PartNumber>1</PartNumber></Part></CompleteMultipartUpload>";
        assert!(parse_complete_multipart_upload_xml(xml).is_err());
    }

    #[test]
    fn rejects_non_numeric_part_number() {
        let xml = b"<CompleteMultipartUpload><Part><PartNumber>x</PartNumber><ETag>\"abc\"</ETag></Part></CompleteMultipartUpload>";
        assert!(parse_complete_multipart_upload_xml(xml).is_err());
    }
}
