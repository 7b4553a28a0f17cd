//! Text extraction for uploaded contract documents.
//!
//! Only PDFs with an embedded text layer are supported; scanned images yield
//! little or no text and are rejected by the callers' minimum-length check.

use std::path::Path;

use anyhow::Context;

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The file name or content does not look like a PDF.
    #[error("not a PDF document: {0}")]
    NotPdf(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Case-insensitive `.pdf` extension check.
pub fn is_pdf_filename(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Extract the text layer of an in-memory PDF.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(ExtractError::NotPdf("missing %PDF- header".to_string()));
    }
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Read a contract from disk: PDFs are extracted, anything else is read as
/// UTF-8 text.
pub fn read_document(path: &Path) -> anyhow::Result<String> {
    let name = path.to_string_lossy();
    if is_pdf_filename(&name) {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        return extract_pdf_text(&bytes)
            .with_context(|| format!("Failed to extract text from {}", path.display()));
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_filename_detection() {
        assert!(is_pdf_filename("lease.pdf"));
        assert!(is_pdf_filename("LEASE.PDF"));
        assert!(!is_pdf_filename("lease.docx"));
        assert!(!is_pdf_filename("pdf"));
        assert!(!is_pdf_filename("lease.pdf.txt"));
    }

    #[test]
    fn test_non_pdf_bytes_rejected() {
        let err = extract_pdf_text(b"hello world").unwrap_err();
        assert!(matches!(err, ExtractError::NotPdf(_)));
        assert_eq!(err.to_string(), "not a PDF document: missing %PDF- header");
    }

    #[test]
    fn test_read_document_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Vault.sol");
        std::fs::write(&path, "contract Vault {}").unwrap();
        assert_eq!(read_document(&path).unwrap(), "contract Vault {}");
    }
}
