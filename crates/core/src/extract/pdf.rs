use lopdf::Document;

/// Per-page text joined with newlines. A page whose content cannot be decoded is logged and
/// left empty; only an unreadable document fails.
pub(super) fn extract(bytes: &[u8]) -> Result<String, String> {
    let doc = Document::load_mem(bytes).map_err(|e| format!("failed to load PDF: {e}"))?;

    let pages = doc.get_pages();
    let mut out = Vec::with_capacity(pages.len());
    for &page_number in pages.keys() {
        match doc.extract_text(&[page_number]) {
            Ok(text) => out.push(text.trim_end().to_string()),
            Err(err) => {
                tracing::warn!(page_number, error = %err, "PDF page text extraction failed; skipping page");
                out.push(String::new());
            }
        }
    }

    Ok(out.join("\n"))
}
