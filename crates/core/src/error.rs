use crate::domain::contract::ValidationError;
use crate::extract::ExtractionError;
use crate::llm::error::CompletionError;
use crate::llm::json::FormatError;
use crate::llm::prompt::PromptError;
use thiserror::Error;

/// Every failure a user action can end in. None of them are fatal: callers turn them into
/// messages and leave the session untouched.
#[derive(Debug, Error)]
pub enum AuditorError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("invalid analysis response format: {source}")]
    Format {
        source: FormatError,
        raw_output: String,
    },

    #[error("analysis response failed validation: {source}")]
    Validation {
        source: ValidationError,
        raw_output: Option<String>,
    },

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("{0}")]
    Input(String),
}

impl AuditorError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    /// Short text suitable for showing next to the action that failed.
    pub fn user_message(&self) -> String {
        match self {
            Self::Extraction(e) => format!("Error reading {}: {}", e.file_name, e.cause),
            Self::Completion(e) => format!("Analysis failed: {e}"),
            Self::Format { source, .. } => format!("Invalid analysis response format: {source}"),
            Self::Validation { source, .. } => format!("Error processing API response: {source}"),
            Self::Prompt(e) => format!("Prompt configuration error: {e}"),
            Self::Input(msg) => msg.clone(),
        }
    }

    /// Raw model output to show the operator when the reply could not be used.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::Format { raw_output, .. } => Some(raw_output),
            Self::Validation { raw_output, .. } => raw_output.as_deref(),
            Self::Completion(e) => e.response_body(),
            _ => None,
        }
    }

    /// Whether the failure is on the model/endpoint side rather than the user's input.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Completion(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_errors_keep_raw_output() {
        let err = AuditorError::Format {
            source: FormatError::NoJsonBlock,
            raw_output: "I could not analyse this.".to_string(),
        };
        assert_eq!(err.raw_output(), Some("I could not analyse this."));
        assert!(err.user_message().contains("no JSON block found"));
        assert!(!err.is_upstream());
    }

    #[test]
    fn extraction_message_names_the_file() {
        let err = AuditorError::from(ExtractionError::new("rules.pdf", "bad xref"));
        assert_eq!(err.user_message(), "Error reading rules.pdf: bad xref");
        assert_eq!(err.raw_output(), None);
    }
}
