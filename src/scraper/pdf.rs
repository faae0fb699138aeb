//! PDF text extraction. PDFs never yield images.

use anyhow::{Context, Result};
use lopdf::Document;

/// Extract the text of every page. Pages that fail to decode are skipped
/// rather than failing the document.
pub fn extract_text(bytes: &[u8]) -> Result<String> {
    let doc = Document::load_mem(bytes).context("failed to parse PDF")?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();

    let mut out = String::new();
    for page in pages {
        match doc.extract_text(&[page]) {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    if !out.is_empty() {
                        out.push_str("\n\n");
                    }
                    out.push_str(text);
                }
            }
            Err(e) => {
                tracing::debug!("pdf page {page} text extraction failed: {e}");
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_an_error() {
        assert!(extract_text(b"definitely not a pdf").is_err());
    }
}
