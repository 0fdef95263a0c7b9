#![deny(missing_docs)]
//! Attachment interceptor library.
//!
//! Chat-pipeline filter that detects file and image attachments in the
//! newest user message and forwards them to an upload endpoint.

/// Configuration management.
pub mod config;
/// Inline payload decoding.
pub mod decoder;
/// Attachment detection.
pub mod detector;
/// Error types.
pub mod error;
/// Temp-file staging and upload.
pub mod forwarder;
/// Host hook surface.
pub mod interceptor;
/// Typed views over request bodies.
pub mod payload;
/// Log redaction.
pub mod redaction;

pub use config::Valves;
pub use error::InterceptError;
pub use interceptor::{Interceptor, Outcome};
