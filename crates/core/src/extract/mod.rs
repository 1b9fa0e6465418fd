//! Plain-text extraction for uploaded rules documents and transaction files.
//!
//! The format is picked from the file extension. A failure only concerns the file it was raised
//! for; callers keep processing the rest of a batch.

mod docx;
mod pdf;
mod text;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to extract text from {file_name}: {cause}")]
pub struct ExtractionError {
    pub file_name: String,
    pub cause: String,
}

impl ExtractionError {
    pub fn new(file_name: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Text,
}

impl DocumentKind {
    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".pdf") {
            Self::Pdf
        } else if lower.ends_with(".docx") {
            Self::Docx
        } else {
            Self::Text
        }
    }
}

/// Extracts the text of `bytes`, named `file_name`.
pub fn extract_text(file_name: &str, bytes: &[u8]) -> Result<String, ExtractionError> {
    let kind = match DocumentKind::from_file_name(file_name) {
        // Unnamed PDFs still carry the magic header.
        DocumentKind::Text if bytes.starts_with(b"%PDF") => DocumentKind::Pdf,
        kind => kind,
    };

    let text = match kind {
        DocumentKind::Pdf => pdf::extract(bytes),
        DocumentKind::Docx => docx::extract(bytes),
        DocumentKind::Text => Ok(text::decode(bytes)),
    }
    .map_err(|cause| ExtractionError::new(file_name, cause))?;

    if text.trim().is_empty() {
        return Err(ExtractionError::new(file_name, "no text content"));
    }

    tracing::debug!(file_name, ?kind, chars = text.len(), "extracted document text");
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_extension_case_insensitively() {
        assert_eq!(DocumentKind::from_file_name("Rules.PDF"), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_file_name("policy.docx"), DocumentKind::Docx);
        assert_eq!(DocumentKind::from_file_name("tx.csv"), DocumentKind::Text);
        assert_eq!(DocumentKind::from_file_name("notes"), DocumentKind::Text);
    }

    #[test]
    fn extracts_plain_csv() {
        let text = extract_text("tx.csv", b"id,amount\nT1,100\n").unwrap();
        assert_eq!(text, "id,amount\nT1,100\n");
    }

    #[test]
    fn empty_file_is_an_extraction_error() {
        let err = extract_text("empty.csv", b"  \n").unwrap_err();
        assert_eq!(err.file_name, "empty.csv");
        assert_eq!(err.cause, "no text content");
    }

    #[test]
    fn broken_pdf_reports_file_name() {
        let err = extract_text("rules.pdf", b"%PDF-1.4 this is not a pdf").unwrap_err();
        assert_eq!(err.file_name, "rules.pdf");
        assert!(!err.cause.is_empty());
    }

    #[test]
    fn broken_docx_reports_file_name() {
        let err = extract_text("rules.docx", b"not a zip").unwrap_err();
        assert_eq!(err.file_name, "rules.docx");
    }
}
