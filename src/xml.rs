//! S3 XML response rendering.
//!
//! Responses are built with `quick-xml`'s event writer.  Writing into an
//! in-memory buffer cannot fail, so the writer helpers do not return errors.

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::time::SystemTime;

use crate::storage::listing::ListPage;

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Storage class reported for every object.
const STORAGE_CLASS: &str = "STANDARD";

/// ISO-8601 UTC with millisecond precision, e.g. `2024-01-01T00:00:00.000Z`.
pub fn iso8601(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
}

struct XmlDoc {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl XmlDoc {
    fn new() -> Self {
        let mut doc = Self {
            writer: Writer::new(Cursor::new(Vec::new())),
        };
        doc.emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));
        doc
    }

    fn emit(&mut self, event: Event<'_>) {
        self.writer
            .write_event(event)
            .expect("writing to an in-memory buffer");
    }

    fn open_root(&mut self, tag: &str) {
        self.emit(Event::Start(
            BytesStart::new(tag).with_attributes([("xmlns", S3_XMLNS)]),
        ));
    }

    fn open(&mut self, tag: &str) {
        self.emit(Event::Start(BytesStart::new(tag)));
    }

    fn close(&mut self, tag: &str) {
        self.emit(Event::End(BytesEnd::new(tag)));
    }

    /// `<tag>text</tag>`
    fn text(&mut self, tag: &str, text: &str) {
        self.open(tag);
        self.emit(Event::Text(BytesText::new(text)));
        self.close(tag);
    }

    /// A parent element holding a flat list of text children.
    fn group(&mut self, parent: &str, children: &[(&str, &str)]) {
        self.open(parent);
        for (tag, value) in children {
            self.text(tag, value);
        }
        self.close(parent);
    }

    fn finish(self) -> String {
        String::from_utf8_lossy(&self.writer.into_inner().into_inner()).into_owned()
    }
}

fn bool_text(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Render an S3 `<Error>` document.
///
/// ```xml
/// <Error>
///   <Code>NoSuchBucket</Code>
///   <Message>The specified bucket does not exist</Message>
///   <RequestId>4442587FB7D0A2F9</RequestId>
///   <HostId>...</HostId>
/// </Error>
/// ```
pub fn render_error(code: &str, message: &str, request_id: &str, host_id: &str) -> String {
    let mut doc = XmlDoc::new();
    doc.group(
        "Error",
        &[
            ("Code", code),
            ("Message", message),
            ("RequestId", request_id),
            ("HostId", host_id),
        ],
    );
    doc.finish()
}

/// Render `<ListAllMyBucketsResult>` for `GET /`.
///
/// `buckets` holds `(name, creation_date)` pairs.
pub fn render_list_buckets_result(owner: &str, buckets: &[(&str, &str)]) -> String {
    let mut doc = XmlDoc::new();
    doc.open_root("ListAllMyBucketsResult");
    doc.group("Owner", &[("ID", owner), ("DisplayName", owner)]);
    doc.open("Buckets");
    for &(name, created) in buckets {
        doc.group("Bucket", &[("Name", name), ("CreationDate", created)]);
    }
    doc.close("Buckets");
    doc.close("ListAllMyBucketsResult");
    doc.finish()
}

/// Pagination fields that differ between ListObjects v1 and v2.
pub enum ListVersion<'a> {
    V1 {
        marker: &'a str,
        next_marker: Option<&'a str>,
    },
    V2 {
        continuation_token: Option<&'a str>,
        next_continuation_token: Option<&'a str>,
        start_after: Option<&'a str>,
    },
}

/// Everything needed to render `<ListBucketResult>`.
pub struct ListObjectsView<'a> {
    pub bucket: &'a str,
    pub prefix: &'a str,
    pub delimiter: &'a str,
    pub max_keys: usize,
    pub page: &'a ListPage,
    pub version: ListVersion<'a>,
}

/// Render `<ListBucketResult>` for either listing version.
pub fn render_list_objects_result(view: &ListObjectsView<'_>) -> String {
    let mut doc = XmlDoc::new();
    doc.open_root("ListBucketResult");
    doc.text("Name", view.bucket);
    doc.text("Prefix", view.prefix);

    match &view.version {
        ListVersion::V1 { marker, .. } => doc.text("Marker", marker),
        ListVersion::V2 {
            continuation_token,
            start_after,
            ..
        } => {
            if let Some(token) = continuation_token {
                doc.text("ContinuationToken", token);
            }
            if let Some(start_after) = start_after.filter(|s| !s.is_empty()) {
                doc.text("StartAfter", start_after);
            }
            doc.text("KeyCount", &view.page.key_count().to_string());
        }
    }

    doc.text("Delimiter", view.delimiter);
    doc.text("MaxKeys", &view.max_keys.to_string());
    doc.text("IsTruncated", bool_text(view.page.is_truncated));

    match &view.version {
        ListVersion::V1 {
            next_marker: Some(next),
            ..
        } => doc.text("NextMarker", next),
        ListVersion::V2 {
            next_continuation_token: Some(next),
            ..
        } => doc.text("NextContinuationToken", next),
        _ => {}
    }

    for object in &view.page.contents {
        doc.open("Contents");
        doc.text("Key", &object.key);
        doc.text("LastModified", &iso8601(object.meta.last_modified));
        doc.text("ETag", &object.meta.etag);
        doc.text("Size", &object.meta.size.to_string());
        doc.text("StorageClass", STORAGE_CLASS);
        doc.close("Contents");
    }

    for prefix in &view.page.common_prefixes {
        doc.group("CommonPrefixes", &[("Prefix", prefix.as_str())]);
    }

    doc.close("ListBucketResult");
    doc.finish()
}
