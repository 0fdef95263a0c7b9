//! Typed views over the untyped chat request
//!
//! The host hands over a JSON body it owns. Everything here borrows from
//! that body and never writes back into it.

use crate::error::InterceptError;
use serde::Deserialize;
use serde_json::Value;

/// Role whose messages are scanned for attachments
pub const USER_ROLE: &str = "user";

/// Fallback chat id when the body carries none
pub const UNKNOWN_CHAT: &str = "unknown_chat";

/// Fallback user id when no user context is supplied
pub const UNKNOWN_USER: &str = "unknown_user";

/// Message content: plain text, a list of parts, or something unexpected
#[derive(Debug, Clone, Copy)]
pub enum Content<'a> {
    /// Plain string content
    Text(&'a str),
    /// Ordered content parts
    Parts(&'a [Value]),
    /// Content missing or of another JSON type
    Other,
}

/// Borrowed view of a single chat message
#[derive(Debug, Clone, Copy)]
pub struct MessageView<'a> {
    /// Sender role, `"unknown"` when absent
    pub role: &'a str,
    /// Message content
    pub content: Content<'a>,
    /// Sibling attachment list, if present
    pub files: Option<&'a [Value]>,
    raw: &'a Value,
}

impl<'a> MessageView<'a> {
    /// Build a view over a raw message value
    #[must_use]
    pub fn new(raw: &'a Value) -> Self {
        let role = raw.get("role").and_then(Value::as_str).unwrap_or("unknown");
        let content = match raw.get("content") {
            Some(Value::String(s)) => Content::Text(s),
            Some(Value::Array(parts)) => Content::Parts(parts),
            _ => Content::Other,
        };
        let files = raw.get("files").and_then(Value::as_array).map(Vec::as_slice);
        Self {
            role,
            content,
            files,
            raw,
        }
    }

    /// Whether the message was authored by the user
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == USER_ROLE
    }

    /// Top-level keys of the message, for diagnostics
    #[must_use]
    pub fn keys(&self) -> Vec<&'a str> {
        object_keys(self.raw)
    }
}

/// Borrowed view of the whole request body
#[derive(Debug, Clone, Copy)]
pub struct RequestView<'a> {
    raw: &'a Value,
}

impl<'a> RequestView<'a> {
    /// Build a view over a request body
    #[must_use]
    pub const fn new(raw: &'a Value) -> Self {
        Self { raw }
    }

    /// Messages in conversation order, empty when absent or malformed
    #[must_use]
    pub fn messages(&self) -> &'a [Value] {
        self.raw
            .get("messages")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Conversation id from `conversation_id` or `chat_id`
    #[must_use]
    pub fn chat_id(&self) -> String {
        ["conversation_id", "chat_id"]
            .iter()
            .find_map(|key| self.raw.get(*key).and_then(id_to_string))
            .unwrap_or_else(|| UNKNOWN_CHAT.to_string())
    }

    /// Request-level attachment list, if present
    #[must_use]
    pub fn files(&self) -> Option<&'a [Value]> {
        self.raw
            .get("files")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
    }

    /// Top-level keys of the body, for diagnostics
    #[must_use]
    pub fn keys(&self) -> Vec<&'a str> {
        object_keys(self.raw)
    }
}

/// User id from the optional host-supplied user context
#[must_use]
pub fn user_id(user: Option<&Value>) -> String {
    user.and_then(|u| u.get("id"))
        .and_then(id_to_string)
        .unwrap_or_else(|| UNKNOWN_USER.to_string())
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn object_keys(value: &Value) -> Vec<&str> {
    value
        .as_object()
        .map(|map| map.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

/// `image_url` field of an image part: either `{ "url": ... }` or a bare string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ImageUrl {
    /// Object form used by OpenAI-style clients
    Object {
        /// Remote or data URL
        url: String,
    },
    /// Bare string form
    Bare(String),
}

impl ImageUrl {
    /// The URL regardless of form
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Object { url } | Self::Bare(url) => url,
        }
    }
}

/// One element of a multipart message content sequence
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text part
    Text {
        /// Text body
        #[serde(default)]
        text: String,
    },
    /// File part carrying inline data, flat or wrapped in `file`
    File(FileEntry),
    /// Image reference part
    ImageUrl {
        /// Image location
        image_url: ImageUrl,
    },
}

impl ContentPart {
    /// Parse a raw content part
    ///
    /// # Errors
    ///
    /// Returns `InterceptError::UnrecognizedShape` when the part has an unknown
    /// `type` or is missing required fields.
    pub fn parse(raw: &Value) -> Result<Self, InterceptError> {
        Self::deserialize(raw).map_err(|e| {
            let kind = part_type(raw);
            InterceptError::UnrecognizedShape(format!("content part of type {kind}: {e}"))
        })
    }
}

/// The `type` discriminator of a raw part, for diagnostics
#[must_use]
pub fn part_type(raw: &Value) -> &str {
    raw.get("type").and_then(Value::as_str).unwrap_or("unknown")
}

/// Entry of a sibling or request-level `files` list
#[derive(Debug, Deserialize)]
pub struct FileEntry {
    /// Original file name
    #[serde(default, alias = "filename")]
    pub name: Option<String>,
    /// Declared MIME type
    #[serde(default, alias = "content_type")]
    pub mime_type: Option<String>,
    /// Data URL string or `{ "bytes": ... }` container
    #[serde(default, alias = "data")]
    pub file_data: Value,
    /// Nested descriptor some clients wrap the payload in
    #[serde(default)]
    pub file: Option<Box<FileEntry>>,
}

impl FileEntry {
    /// Parse a raw `files` entry
    ///
    /// # Errors
    ///
    /// Returns `InterceptError::UnrecognizedShape` if the entry is not a mapping.
    pub fn parse(raw: &Value) -> Result<Self, InterceptError> {
        if !raw.is_object() {
            return Err(InterceptError::UnrecognizedShape(
                "files entry is not a mapping".to_string(),
            ));
        }
        Self::deserialize(raw)
            .map_err(|e| InterceptError::UnrecognizedShape(format!("files entry: {e}")))
    }

    /// Flatten one level of nesting: outer fields win, inner ones fill gaps
    #[must_use]
    pub fn flatten(self) -> Self {
        let Self {
            name,
            mime_type,
            file_data,
            file,
        } = self;
        let Some(inner) = file else {
            return Self {
                name,
                mime_type,
                file_data,
                file: None,
            };
        };
        let inner = inner.flatten();
        Self {
            name: name.or(inner.name),
            mime_type: mime_type.or(inner.mime_type),
            file_data: if file_data.is_null() {
                inner.file_data
            } else {
                file_data
            },
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_view_shapes() {
        let text = json!({"role": "user", "content": "hello"});
        assert!(matches!(MessageView::new(&text).content, Content::Text("hello")));

        let parts = json!({"role": "user", "content": [{"type": "text", "text": "hi"}]});
        assert!(matches!(MessageView::new(&parts).content, Content::Parts(p) if p.len() == 1));

        let other = json!({"role": "assistant", "content": 42});
        let view = MessageView::new(&other);
        assert!(matches!(view.content, Content::Other));
        assert!(!view.is_user());
    }

    #[test]
    fn test_chat_and_user_ids() {
        let body = json!({"conversation_id": "c-1"});
        assert_eq!(RequestView::new(&body).chat_id(), "c-1");

        let body = json!({"chat_id": 17});
        assert_eq!(RequestView::new(&body).chat_id(), "17");

        let body = json!({});
        assert_eq!(RequestView::new(&body).chat_id(), UNKNOWN_CHAT);

        let user = json!({"id": "u-9", "name": "x"});
        assert_eq!(user_id(Some(&user)), "u-9");
        assert_eq!(user_id(None), UNKNOWN_USER);
    }

    #[test]
    fn test_content_part_parse() {
        let part = ContentPart::parse(&json!({"type": "image_url", "image_url": "data:x"}));
        assert!(matches!(
            part,
            Ok(ContentPart::ImageUrl { image_url }) if image_url.url() == "data:x"
        ));

        let part = ContentPart::parse(&json!({"type": "audio", "input_audio": {}}));
        assert!(matches!(part, Err(InterceptError::UnrecognizedShape(_))));
    }

    #[test]
    fn test_wrapped_file_part_parses() {
        let part = ContentPart::parse(&json!({
            "type": "file",
            "file": {"filename": "w.pdf", "file_data": "data:application/pdf;base64,AAAA"}
        }));
        let Ok(ContentPart::File(entry)) = part else {
            panic!("expected a file part, got {part:?}");
        };
        let entry = entry.flatten();
        assert_eq!(entry.name.as_deref(), Some("w.pdf"));
        assert_eq!(entry.file_data, json!("data:application/pdf;base64,AAAA"));
    }

    #[test]
    fn test_file_entry_flatten() -> Result<(), InterceptError> {
        let entry = FileEntry::parse(&json!({
            "name": "outer.txt",
            "file": {"mime_type": "text/plain", "file_data": {"bytes": "aGk="}}
        }))?
        .flatten();
        assert_eq!(entry.name.as_deref(), Some("outer.txt"));
        assert_eq!(entry.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(entry.file_data, json!({"bytes": "aGk="}));
        Ok(())
    }
}
