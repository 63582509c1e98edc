// Text extraction module
// Turns raw document bytes into plain text before chunking. Extractors
// are keyed by mime type; the registry resolves untyped inputs from the
// file extension.

#[cfg(test)]
mod tests;

use std::path::Path;

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use tracing::debug;

// `Display`/`Error` are hand-written: thiserror's derive would treat the
// `source` field (a document name, not a cause) as the error source and
// require it to implement `std::error::Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    UnsupportedType { source: String, mime_type: String },

    InvalidEncoding { source: String, detail: String },
}

impl std::fmt::Display for ExtractError {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedType { source, mime_type } => {
                write!(f, "unsupported content type '{mime_type}' for '{source}'")
            }
            Self::InvalidEncoding { source, detail } => {
                write!(f, "'{source}' is not valid UTF-8: {detail}")
            }
        }
    }
}

impl std::error::Error for ExtractError {}

impl ExtractError {
    /// Name of the input that failed, for run error reporting.
    #[inline]
    pub fn source_name(&self) -> &str {
        match self {
            Self::UnsupportedType { source, .. } | Self::InvalidEncoding { source, .. } => source,
        }
    }

    /// Stable description of the failure, without the source name.
    #[inline]
    pub fn reason(&self) -> String {
        match self {
            Self::UnsupportedType { mime_type, .. } => {
                format!("unsupported content type '{mime_type}'")
            }
            Self::InvalidEncoding { detail, .. } => format!("invalid encoding: {detail}"),
        }
    }
}

/// Converts one family of document formats into plain text.
///
/// Empty extracted text is valid output, not an error; the caller
/// produces zero chunks from it.
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this extractor handles `mime_type`.
    fn supports(&self, mime_type: &str) -> bool;

    fn extract(
        &self,
        bytes: &[u8],
        mime_type: &str,
        file_name: &str,
    ) -> Result<String, ExtractError>;
}

/// Passes UTF-8 text through unchanged apart from line-ending
/// normalization.
#[derive(Debug, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    #[inline]
    fn name(&self) -> &'static str {
        "plain-text"
    }

    #[inline]
    fn supports(&self, mime_type: &str) -> bool {
        mime_type.starts_with("text/")
    }

    #[inline]
    fn extract(
        &self,
        bytes: &[u8],
        _mime_type: &str,
        file_name: &str,
    ) -> Result<String, ExtractError> {
        let text = decode_utf8(bytes, file_name)?;
        Ok(text.replace("\r\n", "\n"))
    }
}

/// Flattens Markdown structure into plain text, keeping paragraph
/// breaks for the chunker's boundary search.
#[derive(Debug, Default)]
pub struct MarkdownExtractor;

impl TextExtractor for MarkdownExtractor {
    #[inline]
    fn name(&self) -> &'static str {
        "markdown"
    }

    #[inline]
    fn supports(&self, mime_type: &str) -> bool {
        matches!(mime_type, "text/markdown" | "text/x-markdown")
    }

    #[inline]
    fn extract(
        &self,
        bytes: &[u8],
        _mime_type: &str,
        file_name: &str,
    ) -> Result<String, ExtractError> {
        let markdown = decode_utf8(bytes, file_name)?;
        Ok(markdown_to_text(&markdown))
    }
}

fn decode_utf8(bytes: &[u8], file_name: &str) -> Result<String, ExtractError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|error| ExtractError::InvalidEncoding {
            source: file_name.to_string(),
            detail: error.to_string(),
        })
}

fn markdown_to_text(markdown: &str) -> String {
    let parser = Parser::new(markdown);
    let mut text = String::new();

    for event in parser {
        match event {
            Event::Start(Tag::Item) => text.push_str("- "),
            Event::End(tag_end) => match tag_end {
                TagEnd::Paragraph | TagEnd::Heading(_) => text.push_str("\n\n"),
                TagEnd::CodeBlock => {
                    if !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push('\n');
                }
                TagEnd::Item => {
                    if !text.ends_with('\n') {
                        text.push('\n');
                    }
                }
                TagEnd::List(_) => {
                    if !text.ends_with("\n\n") {
                        text.push('\n');
                    }
                }
                _ => {}
            },
            Event::Text(chunk) => text.push_str(&chunk),
            Event::Code(code) => text.push_str(&code),
            Event::SoftBreak => text.push(' '),
            Event::HardBreak => text.push('\n'),
            _ => {}
        }
    }

    text.trim().to_string()
}

/// Ordered set of extractors; the first one supporting the resolved
/// mime type wins.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    #[inline]
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Registry with the built-in Markdown and plain-text extractors.
    #[inline]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(MarkdownExtractor));
        registry.register(Box::new(PlainTextExtractor));
        registry
    }

    #[inline]
    pub fn register(&mut self, extractor: Box<dyn TextExtractor>) {
        self.extractors.push(extractor);
    }

    /// Extract plain text from `bytes`, dispatching on `mime_type` or,
    /// when it is missing or generic, the file extension.
    #[inline]
    pub fn extract(
        &self,
        bytes: &[u8],
        mime_type: &str,
        file_name: &str,
    ) -> Result<String, ExtractError> {
        let resolved = resolve_mime(mime_type, file_name);

        let extractor = self
            .extractors
            .iter()
            .find(|extractor| extractor.supports(&resolved))
            .ok_or_else(|| ExtractError::UnsupportedType {
                source: file_name.to_string(),
                mime_type: resolved.clone(),
            })?;

        debug!(
            "Extracting '{}' as {} via {}",
            file_name,
            resolved,
            extractor.name()
        );
        extractor.extract(bytes, &resolved, file_name)
    }
}

impl Default for ExtractorRegistry {
    #[inline]
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn resolve_mime(mime_type: &str, file_name: &str) -> String {
    let given = mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if !given.is_empty() && given != "application/octet-stream" {
        return given;
    }

    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("md" | "markdown") => "text/markdown".to_string(),
        Some("txt" | "text" | "log" | "rst") => "text/plain".to_string(),
        _ if given.is_empty() => "application/octet-stream".to_string(),
        _ => given,
    }
}
