//! Attachment detector
//!
//! Pure scan over the conversation: finds the newest user message and
//! reports which attachments it carries. No logging, no I/O; the caller
//! decides what to do with [`Scan::skipped`].

use crate::decoder::{data_url_mime, Payload, DATA_URL_PREFIX};
use crate::error::InterceptError;
use crate::payload::{Content, ContentPart, FileEntry, MessageView, RequestView};
use serde_json::Value;

/// Name used when a file carries none
pub const UNNAMED_FILE: &str = "unnamed";

/// MIME type used when neither the part nor its payload declares one
pub const FALLBACK_MIME: &str = "application/octet-stream";

/// Where an attachment was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentSource {
    /// `{"type": "file"}` content part
    FilePart,
    /// `{"type": "image_url"}` content part with a data URL
    ImagePart,
    /// First entry of the message's sibling `files` list
    FilesField,
    /// First entry of the request-level `files` list
    RequestFiles,
}

impl std::fmt::Display for AttachmentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FilePart => "file_part",
            Self::ImagePart => "image_part",
            Self::FilesField => "files_field",
            Self::RequestFiles => "request_files",
        };
        f.write_str(s)
    }
}

/// A detected attachment, still encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Encoding the attachment was found in
    pub source: AttachmentSource,
    /// File name to upload under
    pub name: String,
    /// MIME type to upload with
    pub mime_type: String,
    /// Encoded payload
    pub payload: Payload,
}

impl Extraction {
    /// Decode the payload into raw bytes
    ///
    /// # Errors
    ///
    /// Returns `InterceptError::Decode` if the payload is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>, InterceptError> {
        self.payload.decode()
    }
}

/// A candidate that looked like an attachment but could not be used
#[derive(Debug)]
pub struct Skipped {
    /// Location inside the message, e.g. `content[2]` or `files[0]`
    pub location: String,
    /// Why it was skipped
    pub reason: InterceptError,
}

/// Outcome of scanning a conversation
#[derive(Debug, Default)]
pub struct Scan {
    /// Index of the scanned user message, `None` if there was none
    pub message_index: Option<usize>,
    /// Usable attachments in discovery order
    pub attachments: Vec<Extraction>,
    /// Candidates that were skipped, with reasons
    pub skipped: Vec<Skipped>,
}

impl Scan {
    /// Whether any usable attachment was found
    #[must_use]
    pub fn found(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// Scan the newest user message of a conversation
///
/// Messages are walked newest to oldest; the first user message is the
/// only one inspected, whether or not it carries anything. File parts
/// win over inline images, and the sibling `files` list is consulted
/// only when the content yields nothing.
#[must_use]
pub fn scan(messages: &[Value]) -> Scan {
    let Some((index, message)) = messages
        .iter()
        .enumerate()
        .rev()
        .map(|(i, raw)| (i, MessageView::new(raw)))
        .find(|(_, view)| view.is_user())
    else {
        return Scan::default();
    };

    let mut scan = scan_message(&message);
    scan.message_index = Some(index);
    scan
}

/// Scan a whole request body, falling back to its top-level `files` list
#[must_use]
pub fn scan_request(body: &Value) -> Scan {
    let request = RequestView::new(body);
    let mut scan = scan(request.messages());
    if !scan.found() {
        if let Some(files) = request.files() {
            scan_request_files(files, &mut scan);
        }
    }
    scan
}

/// Add the first entry of a request-level `files` list to `scan`
pub fn scan_request_files(files: &[Value], scan: &mut Scan) {
    collect_first_entry(files, AttachmentSource::RequestFiles, scan);
}

/// First attachment of the newest user message, if any
#[must_use]
pub fn detect(messages: &[Value]) -> Option<Extraction> {
    scan(messages).attachments.into_iter().next()
}

/// Scan a single message
#[must_use]
pub fn scan_message(message: &MessageView<'_>) -> Scan {
    let mut scan = Scan::default();

    if let Content::Parts(parts) = message.content {
        let mut images = Vec::new();
        for (i, raw) in parts.iter().enumerate() {
            let location = format!("content[{i}]");
            match ContentPart::parse(raw) {
                Ok(ContentPart::File(entry)) => {
                    match extraction_from_entry(entry, AttachmentSource::FilePart) {
                        Ok(extraction) => scan.attachments.push(extraction),
                        Err(reason) => scan.skipped.push(Skipped { location, reason }),
                    }
                }
                Ok(ContentPart::ImageUrl { image_url }) => {
                    let url = image_url.url();
                    // Remote URLs are not attachments
                    if url.starts_with(DATA_URL_PREFIX) {
                        images.push((location, url.to_string()));
                    }
                }
                Ok(ContentPart::Text { .. }) => {}
                Err(reason) => scan.skipped.push(Skipped { location, reason }),
            }
        }

        if scan.attachments.is_empty() {
            for (location, url) in images {
                match Payload::from_data_url(&url) {
                    Ok(payload) => {
                        let mime_type = data_url_mime(&url).to_string();
                        scan.attachments.push(Extraction {
                            source: AttachmentSource::ImagePart,
                            name: image_name(scan.attachments.len(), &mime_type),
                            mime_type,
                            payload,
                        });
                    }
                    Err(reason) => scan.skipped.push(Skipped { location, reason }),
                }
            }
        }
    }

    if !scan.found() {
        if let Some(files) = message.files {
            collect_first_entry(files, AttachmentSource::FilesField, &mut scan);
        }
    }

    scan
}

fn collect_first_entry(files: &[Value], source: AttachmentSource, scan: &mut Scan) {
    let Some(first) = files.first() else {
        return;
    };
    let location = "files[0]".to_string();
    let extraction =
        FileEntry::parse(first).and_then(|entry| extraction_from_entry(entry, source));
    match extraction {
        Ok(extraction) => scan.attachments.push(extraction),
        Err(reason) => scan.skipped.push(Skipped { location, reason }),
    }
}

fn extraction_from_entry(
    entry: FileEntry,
    source: AttachmentSource,
) -> Result<Extraction, InterceptError> {
    let entry = entry.flatten();
    let payload = Payload::parse(&entry.file_data)?;
    Ok(Extraction {
        source,
        name: entry.name.unwrap_or_else(|| UNNAMED_FILE.to_string()),
        mime_type: resolve_mime(entry.mime_type, &payload),
        payload,
    })
}

fn resolve_mime(declared: Option<String>, payload: &Payload) -> String {
    declared
        .filter(|m| !m.is_empty())
        .or_else(|| {
            payload
                .declared_mime()
                .filter(|m| !m.is_empty())
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

fn image_name(index: usize, mime_type: &str) -> String {
    let ext = mime_type
        .split_once('/')
        .map(|(_, sub)| sub)
        .filter(|sub| !sub.is_empty() && *sub != "unknown")
        .unwrap_or("bin");
    let ext = ext.split('+').next().unwrap_or(ext);
    if index == 0 {
        format!("image.{ext}")
    } else {
        format!("image_{}.{ext}", index + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(content: Value) -> Value {
        json!({"role": "user", "content": content})
    }

    #[test]
    fn test_file_part_detected() -> Result<(), InterceptError> {
        let messages = vec![user(json!([
            {"type": "text", "text": "summarize"},
            {"type": "file", "name": "a.pdf", "mime_type": "application/pdf",
             "file_data": "data:application/pdf;base64,JVBERi0xLjQ="}
        ]))];

        let found = detect(&messages).ok_or_else(|| InterceptError::Decode("none".into()))?;
        assert_eq!(found.source, AttachmentSource::FilePart);
        assert_eq!(found.name, "a.pdf");
        assert_eq!(found.mime_type, "application/pdf");
        assert_eq!(found.decode()?, b"%PDF-1.4");
        Ok(())
    }

    #[test]
    fn test_image_data_url_detected() {
        let messages = vec![user(json!([
            {"type": "image_url", "image_url": {"url": "data:image/png;base64,iVBORw0KGgo="}}
        ]))];

        let found = detect(&messages);
        assert!(matches!(
            found,
            Some(Extraction { source: AttachmentSource::ImagePart, ref mime_type, ref name, .. })
                if mime_type == "image/png" && name == "image.png"
        ));
    }

    #[test]
    fn test_text_only_not_found() {
        let messages = vec![user(json!([{"type": "text", "text": "hello"}]))];
        let scan = scan(&messages);
        assert!(!scan.found());
        assert!(scan.skipped.is_empty());
        assert_eq!(scan.message_index, Some(0));
    }

    #[test]
    fn test_empty_messages_not_found() {
        let scan = scan(&[]);
        assert!(!scan.found());
        assert!(scan.message_index.is_none());
    }

    #[test]
    fn test_plain_string_content_not_found() {
        assert!(detect(&[user(json!("just text"))]).is_none());
    }

    #[test]
    fn test_file_part_wins_over_image() {
        let messages = vec![user(json!([
            {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
            {"type": "file", "name": "b.txt", "mime_type": "text/plain",
             "file_data": {"bytes": "aGk="}}
        ]))];

        let scan = scan(&messages);
        assert_eq!(scan.attachments.len(), 1);
        assert_eq!(scan.attachments[0].source, AttachmentSource::FilePart);
        assert_eq!(scan.attachments[0].name, "b.txt");
    }

    #[test]
    fn test_all_file_parts_collected_in_order() {
        let messages = vec![user(json!([
            {"type": "file", "name": "one.txt", "file_data": {"bytes": "MQ=="}},
            {"type": "file", "name": "two.txt", "file_data": {"bytes": "Mg=="}}
        ]))];

        let names: Vec<_> = scan(&messages)
            .attachments
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["one.txt", "two.txt"]);
    }

    #[test]
    fn test_only_newest_user_message_is_scanned() {
        let older = user(json!([
            {"type": "file", "name": "old.pdf", "file_data": {"bytes": "AAAA"}}
        ]));
        let newer = user(json!("no attachment here"));
        let reply = json!({"role": "assistant", "content": "ok"});

        let scan = scan(&[older, newer, reply]);
        assert!(!scan.found());
        assert_eq!(scan.message_index, Some(1));
    }

    #[test]
    fn test_remote_image_url_ignored() {
        let messages = vec![user(json!([
            {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}}
        ]))];
        let scan = scan(&messages);
        assert!(!scan.found());
        assert!(scan.skipped.is_empty());
    }

    #[test]
    fn test_malformed_data_url_skipped() {
        let messages = vec![user(json!([
            {"type": "image_url", "image_url": {"url": "data:image/png,rawbytes"}}
        ]))];
        let scan = scan(&messages);
        assert!(!scan.found());
        assert_eq!(scan.skipped.len(), 1);
        assert_eq!(scan.skipped[0].location, "content[0]");
        assert!(matches!(scan.skipped[0].reason, InterceptError::Decode(_)));
    }

    #[test]
    fn test_unknown_part_type_skipped() {
        let messages = vec![user(json!([{"type": "input_audio", "input_audio": {}}]))];
        let scan = scan(&messages);
        assert!(!scan.found());
        assert!(matches!(
            scan.skipped[0].reason,
            InterceptError::UnrecognizedShape(_)
        ));
    }

    #[test]
    fn test_files_field_fallback_uses_first_entry() {
        let message = json!({
            "role": "user",
            "content": "see attached",
            "files": [
                {"name": "first.csv", "mime_type": "text/csv", "file_data": {"bytes": "YSxi"}},
                {"name": "second.csv", "file_data": {"bytes": "Yyxk"}}
            ]
        });

        let scan = scan(&[message]);
        assert_eq!(scan.attachments.len(), 1);
        let first = &scan.attachments[0];
        assert_eq!(first.source, AttachmentSource::FilesField);
        assert_eq!(first.name, "first.csv");
        assert_eq!(first.mime_type, "text/csv");
    }

    #[test]
    fn test_request_files_consulted_last() {
        let body = json!({
            "messages": [user(json!("hi"))],
            "files": [{"file": {"filename": "r.bin", "data": {"bytes": "AQID"}}}]
        });

        let scan = scan_request(&body);
        assert_eq!(scan.attachments.len(), 1);
        assert_eq!(scan.attachments[0].source, AttachmentSource::RequestFiles);
        assert_eq!(scan.attachments[0].name, "r.bin");
        assert_eq!(scan.attachments[0].mime_type, FALLBACK_MIME);
    }

    #[test]
    fn test_wrapped_file_part_detected() -> Result<(), InterceptError> {
        let messages = vec![user(json!([
            {"type": "file", "file": {
                "filename": "w.txt",
                "mime_type": "text/plain",
                "file_data": "data:text/plain;base64,YSxi"
            }}
        ]))];

        let found = detect(&messages).ok_or_else(|| InterceptError::Decode("none".into()))?;
        assert_eq!(found.source, AttachmentSource::FilePart);
        assert_eq!(found.name, "w.txt");
        assert_eq!(found.mime_type, "text/plain");
        assert_eq!(found.decode()?, b"a,b");
        Ok(())
    }

    #[test]
    fn test_missing_name_and_mime_fall_back() {
        let messages = vec![user(json!([
            {"type": "file", "file_data": "data:text/markdown;base64,IyBoaQ=="}
        ]))];
        let found = detect(&messages);
        assert!(matches!(
            found,
            Some(Extraction { ref name, ref mime_type, .. })
                if name == UNNAMED_FILE && mime_type == "text/markdown"
        ));
    }
}
