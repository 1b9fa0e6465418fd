use crate::aggregate::RiskPolicy;
use crate::domain::analysis::AnalysisDocument;
use crate::domain::contract::parse_analysis;
use crate::error::AuditorError;
use serde_json::Value;
use thiserror::Error;

const OPEN_FENCE: &str = "```json";
const CLOSE_FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    #[error("no JSON block found")]
    NoJsonBlock,

    #[error("malformed JSON: {0}")]
    Malformed(String),
}

/// Interior of the first "```json" fence, trimmed. Later fences are ignored.
pub fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find(OPEN_FENCE)? + OPEN_FENCE.len();
    let rest = &text[start..];
    let end = rest.find(CLOSE_FENCE)?;
    Some(rest[..end].trim())
}

/// Parses the JSON payload of a conversational model reply.
///
/// The fenced interior is parsed as-is first. If that fails, the first balanced object or
/// array is cut out with a bracket-depth scan that also escapes raw line breaks inside string
/// literals (a common model slip), and that is parsed instead.
pub fn extract_json(text: &str) -> Result<Value, FormatError> {
    let block = fenced_block(text).ok_or(FormatError::NoJsonBlock)?;

    let direct_err = match serde_json::from_str::<Value>(block) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    let repaired = balanced_value(block)?;
    serde_json::from_str::<Value>(&repaired).map_err(|e| {
        tracing::debug!(error = %e, direct_error = %direct_err, "repaired JSON block still invalid");
        FormatError::Malformed(direct_err.to_string())
    })
}

/// Parses a model reply all the way to a validated [`AnalysisDocument`], keeping the reply
/// text on failure so the operator can see what the model said.
pub fn parse_analysis_reply(
    text: &str,
    policy: &RiskPolicy,
) -> Result<AnalysisDocument, AuditorError> {
    let value = extract_json(text).map_err(|source| AuditorError::Format {
        source,
        raw_output: text.to_string(),
    })?;
    parse_analysis(value, policy).map_err(|source| AuditorError::Validation {
        source,
        raw_output: Some(text.to_string()),
    })
}

fn balanced_value(block: &str) -> Result<String, FormatError> {
    let start = block
        .find(|c: char| c == '{' || c == '[')
        .ok_or_else(|| FormatError::Malformed("no JSON object in block".to_string()))?;

    let mut out = String::with_capacity(block.len() - start);
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in block[start..].chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
            continue;
        }

        out.push(c);
        match c {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                if closers.pop() != Some(c) {
                    return Err(FormatError::Malformed(format!(
                        "unbalanced '{c}' at offset {}",
                        start + out.len() - 1
                    )));
                }
                if closers.is_empty() {
                    return Ok(out);
                }
            }
            _ => {}
        }
    }

    Err(FormatError::Malformed("unterminated JSON value".to_string()))
}
