/// Text extraction collaborator: raw bytes in, plain text out.
///
/// Format-specific readers (PDF, DOCX, spreadsheets) plug in behind
/// [`TextExtractor`]; the bundled [`PlainTextExtractor`] handles text formats.
use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TextExtractionError {
    #[error("unsupported document type: {0}")]
    UnsupportedMimeType(String),

    #[error("document is not valid UTF-8: {0}")]
    InvalidEncoding(String),
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, TextExtractionError>;
}

const TEXT_MIME_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/x-yaml",
];

/// Extracts UTF-8 text from `text/*` and a few structured text formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, TextExtractionError> {
        // Ignore parameters such as "; charset=utf-8".
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !essence.starts_with("text/") && !TEXT_MIME_TYPES.contains(&essence.as_str()) {
            return Err(TextExtractionError::UnsupportedMimeType(mime_type.to_string()));
        }

        let text = std::str::from_utf8(bytes)
            .map_err(|e| TextExtractionError::InvalidEncoding(e.to_string()))?;
        Ok(text.strip_prefix('\u{feff}').unwrap_or(text).to_string())
    }
}

/// MIME type guessed from a file extension.
#[must_use]
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "text" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/x-yaml",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
