//! Resume text extraction for the supported upload formats.

mod docx;

use thiserror::Error;
use tracing::info;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Below this many characters a PDF is almost certainly scanned images.
const MIN_PDF_TEXT_CHARS: usize = 50;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Failed to extract text: {0}")]
    ExtractionFailed(String),
}

/// Extracts plain text from a resume document.
pub fn extract_text(data: &[u8], content_type: &str) -> Result<String, ExtractionError> {
    let text = match content_type {
        PDF_CONTENT_TYPE => extract_pdf_text(data)?,
        DOCX_CONTENT_TYPE => docx::extract_docx_text(data)
            .map_err(|e| ExtractionError::ExtractionFailed(format!("unreadable DOCX: {e}")))?,
        other => return Err(ExtractionError::UnsupportedFileType(other.to_string())),
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(ExtractionError::ExtractionFailed(
            "document contains no text".to_string(),
        ));
    }
    info!("Extracted {} characters from {}", text.len(), content_type);
    Ok(text)
}

fn extract_pdf_text(data: &[u8]) -> Result<String, ExtractionError> {
    let text = pdf_extract::extract_text_from_mem(data)
        .map_err(|e| ExtractionError::ExtractionFailed(format!("unreadable PDF: {e}")))?;

    if text.trim().chars().count() < MIN_PDF_TEXT_CHARS {
        return Err(ExtractionError::ExtractionFailed(
            "extracted PDF text is too short; try uploading a DOCX instead".to_string(),
        ));
    }
    Ok(text)
}

/// Maps a client-declared content type, falling back to the file extension
/// when the client sent none or a generic one. Returns `None` for anything
/// other than PDF or DOCX.
pub fn resolve_content_type(declared: Option<&str>, file_name: &str) -> Option<&'static str> {
    let declared = declared
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");

    match declared.as_deref() {
        Some(PDF_CONTENT_TYPE) => Some(PDF_CONTENT_TYPE),
        Some(DOCX_CONTENT_TYPE) => Some(DOCX_CONTENT_TYPE),
        Some(_) => None,
        None => {
            let extension = std::path::Path::new(file_name)
                .extension()
                .and_then(|v| v.to_str())
                .map(|v| v.to_ascii_lowercase());
            match extension.as_deref() {
                Some("pdf") => Some(PDF_CONTENT_TYPE),
                Some("docx") => Some(DOCX_CONTENT_TYPE),
                _ => None,
            }
        }
    }
}
