//! Forwarder: stages an extracted file on disk and uploads it
//!
//! The staged copy lives in a `NamedTempFile` and is removed once the
//! POST attempt is over, whatever its outcome.

use crate::config::Valves;
use crate::detector::FALLBACK_MIME;
use crate::error::InterceptError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client as HttpClient, StatusCode};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Maximum number of body characters kept in an upstream error
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Where and how to upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Upload endpoint URL
    pub url: String,
    /// Per-request timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl UploadTarget {
    /// Target described by the current valves
    #[must_use]
    pub fn from_valves(valves: &Valves) -> Self {
        Self {
            url: valves.rag_api_url.clone(),
            timeout: valves.upload_timeout(),
        }
    }
}

/// A decoded file plus the conversation it came from
#[derive(Debug, Clone)]
pub struct Upload {
    /// Raw file contents
    pub bytes: Vec<u8>,
    /// File name sent in the multipart `file` part
    pub file_name: String,
    /// MIME type of the `file` part
    pub mime_type: String,
    /// Sent as the `chat_id` form field
    pub chat_id: String,
    /// Sent as the `user_id` form field
    pub user_id: String,
}

/// Interface for upload backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload one file and return the endpoint's parsed JSON response
    async fn upload(&self, target: &UploadTarget, upload: &Upload)
        -> Result<Value, InterceptError>;
}

/// Multipart HTTP uploader backed by `reqwest`
#[derive(Debug, Clone, Default)]
pub struct HttpUploader {
    client: HttpClient,
    temp_dir: Option<PathBuf>,
}

impl HttpUploader {
    /// Create an uploader staging files in the system temp directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage files in `dir` instead of the system temp directory
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Write the upload to a fresh temporary file
    fn stage(&self, upload: &Upload) -> Result<NamedTempFile, InterceptError> {
        let suffix = Path::new(&upload.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();

        let mut builder = tempfile::Builder::new();
        builder.prefix("upload-").suffix(&suffix);
        let mut staged = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        staged.write_all(&upload.bytes)?;
        staged.flush()?;
        debug!(
            path = %staged.path().display(),
            size = upload.bytes.len(),
            "Staged upload in temporary file"
        );
        Ok(staged)
    }

    async fn post(
        &self,
        target: &UploadTarget,
        upload: &Upload,
        path: &Path,
    ) -> Result<Value, InterceptError> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();

        let part = match Part::stream_with_length(file, len)
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime_type)
        {
            Ok(part) => part,
            Err(e) => {
                // The rejected part owned the file handle
                warn!(
                    mime_type = %upload.mime_type,
                    fallback = FALLBACK_MIME,
                    error = %e,
                    "Invalid MIME type, uploading as generic binary"
                );
                let file = tokio::fs::File::open(path).await?;
                Part::stream_with_length(file, len)
                    .file_name(upload.file_name.clone())
                    .mime_str(FALLBACK_MIME)?
            }
        };

        let form = Form::new()
            .part("file", part)
            .text("chat_id", upload.chat_id.clone())
            .text("user_id", upload.user_id.clone());

        let mut request = self.client.post(&target.url).multipart(form);
        if let Some(timeout) = target.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(InterceptError::Upstream {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        response
            .json()
            .await
            .map_err(|e| InterceptError::Decode(format!("upload response is not JSON: {e}")))
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(
        &self,
        target: &UploadTarget,
        upload: &Upload,
    ) -> Result<Value, InterceptError> {
        let staged = self.stage(upload)?;
        let result = self.post(target, upload, staged.path()).await;

        let path = staged.path().to_path_buf();
        if let Err(e) = staged.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove temporary upload file");
        }

        result
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        let head: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{head}... (truncated)")
    } else {
        body.to_string()
    }
}
