use std::io::{Cursor, Read};

const WORD_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const DOCUMENT_PART: &str = "word/document.xml";

/// Paragraph texts of `word/document.xml`, one paragraph per line.
pub(super) fn extract(bytes: &[u8]) -> Result<String, String> {
    let mut zip =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("open docx archive failed: {e}"))?;

    let mut xml = String::new();
    zip.by_name(DOCUMENT_PART)
        .map_err(|e| format!("{DOCUMENT_PART} missing: {e}"))?
        .read_to_string(&mut xml)
        .map_err(|e| format!("read {DOCUMENT_PART} failed: {e}"))?;

    paragraphs(&xml).map(|p| p.join("\n"))
}

fn paragraphs(xml: &str) -> Result<Vec<String>, String> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| format!("invalid document XML: {e}"))?;

    let is_paragraph = |n: &roxmltree::Node<'_, '_>| n.has_tag_name((WORD_NS, "p"));

    let mut out = Vec::new();
    for p in doc.descendants().filter(is_paragraph) {
        // Text boxes nest paragraphs; their text is already part of the outer one.
        if p.ancestors().skip(1).any(|a| is_paragraph(&a)) {
            continue;
        }

        let mut text = String::new();
        for node in p.descendants() {
            if node.has_tag_name((WORD_NS, "t")) {
                text.push_str(node.text().unwrap_or_default());
            } else if node.has_tag_name((WORD_NS, "tab")) {
                text.push('\t');
            } else if node.has_tag_name((WORD_NS, "br")) {
                text.push('\n');
            }
        }
        out.push(text);
    }
    Ok(out)
}
