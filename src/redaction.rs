//! Log redaction for inline attachment payloads
//!
//! Request dumps can contain whole files as data URLs. The writer here
//! replaces every base64 body with a size marker before it hits the sink.

use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;

/// Regex patterns for redacting inline payloads
pub struct RedactionPatterns {
    data_url: Regex,
    bytes_field: Regex,
}

impl RedactionPatterns {
    /// Compile all patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            data_url: Regex::new(r"(data:[^;,\s]*;base64,)([A-Za-z0-9+/=]{16,})")?,
            bytes_field: Regex::new(r#"("bytes"\s*:\s*")([A-Za-z0-9+/=]{16,})(")"#)?,
        })
    }

    /// Replace base64 bodies with `[BASE64 <n> chars]`
    #[must_use]
    pub fn redact(&self, input: &str) -> String {
        let output = self.data_url.replace_all(input, |caps: &regex::Captures<'_>| {
            format!("{}[BASE64 {} chars]", &caps[1], caps[2].len())
        });
        self.bytes_field
            .replace_all(&output, |caps: &regex::Captures<'_>| {
                format!("{}[BASE64 {} chars]{}", &caps[1], caps[2].len(), &caps[3])
            })
            .into_owned()
    }
}

/// `Write` adapter that redacts everything passing through it
pub struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    /// Wrap `inner`
    pub const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length; the redacted text is usually shorter
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` producing [`RedactingWriter`]s for a tracing fmt layer
pub struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    /// Wrap a writer factory such as `std::io::stderr`
    pub const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}
