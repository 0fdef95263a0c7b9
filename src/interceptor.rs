//! Hook surface exposed to the chat-serving host
//!
//! `inlet` scans each request for attachments and forwards them; `outlet`
//! and `pipe` complete the filter contract. Every hook returns the body it
//! was given, untouched, no matter what happened inside.

use crate::config::Valves;
use crate::detector::{self, Extraction, Scan};
use crate::forwarder::{HttpUploader, Upload, UploadTarget, Uploader};
use crate::payload::{self, part_type, Content, MessageView, RequestView};
use arc_swap::ArcSwap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// What a single interception ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Pipeline id outside the configured scope
    OutOfScope,
    /// Newest user message carried nothing usable
    NoAttachment,
    /// Attachments found, forwarding suppressed by `dry_run`
    DryRun {
        /// Number of attachments detected
        detected: usize,
    },
    /// Attachments found and forwarding attempted
    Forwarded {
        /// Uploads that returned 200
        succeeded: usize,
        /// Attachments that failed to decode or upload
        failed: usize,
    },
}

/// Attachment interceptor filter
pub struct Interceptor {
    valves: ArcSwap<Valves>,
    uploader: Arc<dyn Uploader>,
    span: Span,
}

impl Interceptor {
    /// Create an interceptor with an explicit upload backend
    ///
    /// All hook activity is logged inside `span`, so the caller decides
    /// where and how this instance's logs end up.
    #[must_use]
    pub fn new(valves: Valves, uploader: Arc<dyn Uploader>, span: Span) -> Self {
        info!(
            parent: &span,
            name = %valves.pipeline_name,
            priority = valves.priority,
            pipelines = ?valves.pipelines,
            dry_run = valves.dry_run,
            "Interceptor initialized"
        );
        Self {
            valves: ArcSwap::from_pointee(valves),
            uploader,
            span,
        }
    }

    /// Create an interceptor that uploads over HTTP
    #[must_use]
    pub fn with_http(valves: Valves, span: Span) -> Self {
        Self::new(valves, Arc::new(HttpUploader::new()), span)
    }

    /// Current configuration snapshot
    #[must_use]
    pub fn valves(&self) -> Arc<Valves> {
        self.valves.load_full()
    }

    /// Host notification: the filter is starting
    pub async fn on_startup(&self) {
        let valves = self.valves.load();
        info!(parent: &self.span, name = %valves.pipeline_name, "Interceptor started");
    }

    /// Host notification: the filter is shutting down
    pub async fn on_shutdown(&self) {
        let valves = self.valves.load();
        info!(parent: &self.span, name = %valves.pipeline_name, "Interceptor shut down");
    }

    /// Host notification: replace the configuration wholesale
    pub async fn on_valves_updated(&self, valves: Valves) {
        info!(
            parent: &self.span,
            rag_api_url = %valves.rag_api_url,
            dry_run = valves.dry_run,
            pipelines = ?valves.pipelines,
            "Valves updated"
        );
        self.valves.store(Arc::new(valves));
    }

    /// Inlet hook: inspect the request before it goes upstream
    pub async fn inlet(&self, body: Value, user: Option<&Value>) -> Value {
        let span = info_span!(parent: &self.span, "inlet", request_id = %Uuid::new_v4());
        self.intercept(&body, user).instrument(span).await;
        body
    }

    /// Inlet hook for hosts that pass the target pipeline id
    ///
    /// Requests for pipelines outside `valves.pipelines` pass through
    /// without being scanned.
    pub async fn inlet_for(&self, pipeline_id: &str, body: Value, user: Option<&Value>) -> Value {
        let span = info_span!(
            parent: &self.span,
            "inlet",
            request_id = %Uuid::new_v4(),
            pipeline_id = %pipeline_id
        );
        self.intercept_for(pipeline_id, &body, user)
            .instrument(span)
            .await;
        body
    }

    /// Outlet hook: log and return the response unchanged
    pub async fn outlet(&self, body: Value, user: Option<&Value>) -> Value {
        info!(
            parent: &self.span,
            user_id = %payload::user_id(user),
            keys = ?RequestView::new(&body).keys(),
            "Outlet called"
        );
        body
    }

    /// Pipe hook: run detection and forwarding over `messages` and report
    ///
    /// `body` supplies the chat id and the request-level `files` list.
    pub async fn pipe(
        &self,
        user_message: &str,
        model_id: &str,
        messages: &[Value],
        body: &Value,
    ) -> String {
        let span = info_span!(
            parent: &self.span,
            "pipe",
            request_id = %Uuid::new_v4(),
            model_id = %model_id
        );
        async {
            debug!(chars = user_message.len(), "Pipe called");
            let request = RequestView::new(body);
            let mut scan = detector::scan(messages);
            if !scan.found() {
                if let Some(files) = request.files() {
                    detector::scan_request_files(files, &mut scan);
                }
            }
            let chat_id = request.chat_id();
            let valves = self.valves.load_full();
            let outcome = self
                .handle_scan(&valves, scan, &chat_id, payload::UNKNOWN_USER)
                .await;
            describe(outcome)
        }
        .instrument(span)
        .await
    }

    /// Run the interception state machine for one request
    ///
    /// Never fails: every error is logged and folded into the outcome.
    pub async fn intercept(&self, body: &Value, user: Option<&Value>) -> Outcome {
        let valves = self.valves.load_full();
        self.intercept_with(&valves, body, user).await
    }

    /// Like [`Interceptor::intercept`], honouring the pipeline scope
    pub async fn intercept_for(
        &self,
        pipeline_id: &str,
        body: &Value,
        user: Option<&Value>,
    ) -> Outcome {
        // One snapshot for the whole request
        let valves = self.valves.load_full();
        if !valves.applies_to(pipeline_id) {
            debug!(pipeline_id, "Pipeline outside filter scope, passing through");
            return Outcome::OutOfScope;
        }
        self.intercept_with(&valves, body, user).await
    }

    async fn intercept_with(&self, valves: &Valves, body: &Value, user: Option<&Value>) -> Outcome {
        let request = RequestView::new(body);
        let chat_id = request.chat_id();
        let user_id = payload::user_id(user);
        log_structure(&request, &chat_id, &user_id);

        let scan = detector::scan_request(body);
        self.handle_scan(valves, scan, &chat_id, &user_id).await
    }

    async fn handle_scan(
        &self,
        valves: &Valves,
        scan: Scan,
        chat_id: &str,
        user_id: &str,
    ) -> Outcome {
        for skipped in &scan.skipped {
            warn!(
                location = %skipped.location,
                error = %skipped.reason,
                "Skipped attachment candidate"
            );
        }

        if !scan.found() {
            info!(
                message_index = ?scan.message_index,
                "No attachment found in latest user message"
            );
            return Outcome::NoAttachment;
        }

        for attachment in &scan.attachments {
            info!(
                source = %attachment.source,
                name = %attachment.name,
                mime_type = %attachment.mime_type,
                encoded_len = attachment.payload.encoded_len(),
                "Attachment detected"
            );
        }

        if valves.dry_run {
            info!(
                detected = scan.attachments.len(),
                "Dry run enabled, skipping upload"
            );
            return Outcome::DryRun {
                detected: scan.attachments.len(),
            };
        }

        let target = UploadTarget::from_valves(valves);
        let mut succeeded = 0;
        let mut failed = 0;
        for attachment in scan.attachments {
            if self.forward(&target, attachment, chat_id, user_id).await {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }
        Outcome::Forwarded { succeeded, failed }
    }

    async fn forward(
        &self,
        target: &UploadTarget,
        attachment: Extraction,
        chat_id: &str,
        user_id: &str,
    ) -> bool {
        let bytes = match attachment.decode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(name = %attachment.name, error = %e, "Failed to decode attachment");
                return false;
            }
        };

        let upload = Upload {
            bytes,
            file_name: attachment.name,
            mime_type: attachment.mime_type,
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
        };

        info!(
            url = %target.url,
            name = %upload.file_name,
            size = upload.bytes.len(),
            "Forwarding attachment"
        );

        match self.uploader.upload(target, &upload).await {
            Ok(response) => {
                info!(name = %upload.file_name, response = %response, "Upload succeeded");
                true
            }
            Err(e) => {
                error!(
                    url = %target.url,
                    name = %upload.file_name,
                    error = %e,
                    details = ?e,
                    "Upload failed"
                );
                false
            }
        }
    }
}

fn log_structure(request: &RequestView<'_>, chat_id: &str, user_id: &str) {
    let messages = request.messages();
    debug!(
        keys = ?request.keys(),
        message_count = messages.len(),
        chat_id,
        user_id,
        "Inlet called"
    );

    let Some(last) = messages.last().map(MessageView::new) else {
        return;
    };
    debug!(
        role = last.role,
        files = last.files.map_or(0, |f| f.len()),
        keys = ?last.keys(),
        "Last message"
    );
    match last.content {
        Content::Parts(parts) => {
            let types: Vec<&str> = parts.iter().map(part_type).collect();
            debug!(part_types = ?types, "Content is a list");
        }
        Content::Text(text) => debug!(chars = text.len(), "Content is text"),
        Content::Other => debug!("Content is neither text nor a list"),
    }
}

fn describe(outcome: Outcome) -> String {
    match outcome {
        Outcome::OutOfScope => "Pipeline outside filter scope".to_string(),
        Outcome::NoAttachment => "No attachment found in the latest user message".to_string(),
        Outcome::DryRun { detected } => {
            format!("Dry run: detected {detected} attachment(s), upload skipped")
        }
        Outcome::Forwarded { succeeded, failed } => {
            format!("Forwarded {succeeded} attachment(s), {failed} failed")
        }
    }
}
