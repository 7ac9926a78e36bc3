//! S3 XML response rendering.
//!
//! All responses this server produces are XML-encoded. This module builds
//! them with `quick-xml`, routing every user-controlled text value through
//! [`crate::primitives::xml_escape`] before handing it to the writer via
//! `BytesText::from_escaped` — `quick_xml`'s own `BytesText::new` would
//! otherwise double-escape.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use crate::primitives::xml_escape;

/// Render the minimal `<Error><Code>/<Message></Error>` envelope. No
/// `<Resource>`/`<RequestId>` — this server doesn't track either.
pub fn render_error(code: &str, message: &str) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_decl(&mut writer);
    write_simple_element_group(&mut writer, "Error", &[("Code", code), ("Message", message)]);
    finish(writer)
}

/// Render the `<ListAllMyBucketsResult>` response for `GET /`.
///
/// `buckets` is a list of `(name, creation_date)` pairs.
pub fn render_list_buckets_result(buckets: &[(&str, &str)]) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_decl(&mut writer);

    let root = BytesStart::new("ListAllMyBucketsResult")
        .with_attributes([("xmlns", "http://s3.amazonaws.com/doc/2006-03-01/")]);
    writer.write_event(Event::Start(root)).expect("start root");

    writer
        .write_event(Event::Start(BytesStart::new("Buckets")))
        .expect("start Buckets");
    for (name, date) in buckets {
        write_simple_element_group(&mut writer, "Bucket", &[("Name", name), ("CreationDate", date)]);
    }
    writer
        .write_event(Event::End(BytesEnd::new("Buckets")))
        .expect("end Buckets");

    writer
        .write_event(Event::End(BytesEnd::new("ListAllMyBucketsResult")))
        .expect("end root");

    finish(writer)
}

/// One object entry inside a `ListObjectsV2` response.
pub struct ObjectEntry<'a> {
    pub key: &'a str,
    pub last_modified: &'a str,
    pub etag: &'a str,
    pub size: u64,
}

/// Render `<ListBucketResult>` for ListObjectsV2, in the element order
/// fixed by the external interface: Name, Prefix, Delimiter?, MaxKeys,
/// KeyCount, IsTruncated, NextContinuationToken?, Contents*, CommonPrefixes*.
#[allow(clippy::too_many_arguments)]
pub fn render_list_objects_result(
    bucket: &str,
    prefix: &str,
    delimiter: &str,
    max_keys: u32,
    key_count: u32,
    is_truncated: bool,
    next_continuation_token: Option<&str>,
    entries: &[ObjectEntry<'_>],
    common_prefixes: &[&str],
) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_decl(&mut writer);

    let root = BytesStart::new("ListBucketResult")
        .with_attributes([("xmlns", "http://s3.amazonaws.com/doc/2006-03-01/")]);
    writer.write_event(Event::Start(root)).expect("start root");

    write_text_element(&mut writer, "Name", bucket);
    write_text_element(&mut writer, "Prefix", prefix);
    if !delimiter.is_empty() {
        write_text_element(&mut writer, "Delimiter", delimiter);
    }
    write_text_element(&mut writer, "MaxKeys", &max_keys.to_string());
    write_text_element(&mut writer, "KeyCount", &key_count.to_string());
    write_text_element(&mut writer, "IsTruncated", if is_truncated { "true" } else { "false" });
    if let Some(token) = next_continuation_token {
        write_text_element(&mut writer, "NextContinuationToken", token);
    }

    for entry in entries {
        writer
            .write_event(Event::Start(BytesStart::new("Contents")))
            .expect("start Contents");
        write_text_element(&mut writer, "Key", entry.key);
        write_text_element(&mut writer, "LastModified", entry.last_modified);
        write_text_element(&mut writer, "Size", &entry.size.to_string());
        write_text_element(&mut writer, "ETag", entry.etag);
        writer
            .write_event(Event::End(BytesEnd::new("Contents")))
            .expect("end Contents");
    }

    for cp in common_prefixes {
        writer
            .write_event(Event::Start(BytesStart::new("CommonPrefixes")))
            .expect("start CommonPrefixes");
        write_text_element(&mut writer, "Prefix", cp);
        writer
            .write_event(Event::End(BytesEnd::new("CommonPrefixes")))
            .expect("end CommonPrefixes");
    }

    writer
        .write_event(Event::End(BytesEnd::new("ListBucketResult")))
        .expect("end root");

    finish(writer)
}

/// Render `<InitiateMultipartUploadResult>`.
pub fn render_initiate_multipart_upload_result(bucket: &str, key: &str, upload_id: &str) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_decl(&mut writer);
    write_simple_element_group(
        &mut writer,
        "InitiateMultipartUploadResult",
        &[("Bucket", bucket), ("Key", key), ("UploadId", upload_id)],
    );
    finish(writer)
}

/// Render `<CompleteMultipartUploadResult>`.
pub fn render_complete_multipart_upload_result(
    location: &str,
    bucket: &str,
    key: &str,
    etag: &str,
) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_decl(&mut writer);
    write_simple_element_group(
        &mut writer,
        "CompleteMultipartUploadResult",
        &[("Location", location), ("Bucket", bucket), ("Key", key), ("ETag", etag)],
    );
    finish(writer)
}

fn write_decl(writer: &mut Writer<Cursor<Vec<u8>>>) {
    writer
        .write_event(Event::Decl(quick_xml::events::BytesDecl::new("1.0", Some("UTF-8"), None)))
        .expect("xml decl");
}

fn finish(writer: Writer<Cursor<Vec<u8>>>) -> String {
    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

/// Write a `<tag>text</tag>` element, escaping `text` first.
fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) {
    writer.write_event(Event::Start(BytesStart::new(tag))).expect("start tag");
    writer
        .write_event(Event::Text(BytesText::from_escaped(xml_escape(text))))
        .expect("text");
    writer.write_event(Event::End(BytesEnd::new(tag))).expect("end tag");
}

/// Write a parent element containing a flat list of child text elements.
fn write_simple_element_group(writer: &mut Writer<Cursor<Vec<u8>>>, parent: &str, children: &[(&str, &str)]) {
    writer
        .write_event(Event::Start(BytesStart::new(parent)))
        .expect("start parent");
    for (tag, value) in children {
        write_text_element(writer, tag, value);
    }
    writer.write_event(Event::End(BytesEnd::new(parent))).expect("end parent");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_is_minimal() {
        let xml = render_error("NoSuchBucket", "The specified bucket does not exist");
        assert!(xml.contains("<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message></Error>"));
        assert!(!xml.contains("Resource"));
        assert!(!xml.contains("RequestId"));
    }

    #[test]
    fn error_message_is_escaped() {
        let xml = render_error("InvalidArgument", "bad <value>");
        assert!(xml.contains("bad &lt;value&gt;"));
    }

    #[test]
    fn list_objects_element_order() {
        let entries = [ObjectEntry {
            key: "a",
            last_modified: "1970-01-01T00:00:00Z",
            etag: "\"abc\"",
            size: 3,
        }];
        let xml = render_list_objects_result("b", "", "/", 1000, 1, false, None, &entries, &["b/"]);
        let name_pos = xml.find("<Name>").unwrap();
        let contents_pos = xml.find("<Contents>").unwrap();
        let cp_pos = xml.find("<CommonPrefixes>").unwrap();
        assert!(name_pos < contents_pos);
        assert!(contents_pos < cp_pos);
    }
}
