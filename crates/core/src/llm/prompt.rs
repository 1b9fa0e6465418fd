//! Prompt templates and request assembly.
//!
//! Templates are plain text files read at invocation time, so they can be edited without
//! restarting the service.

use crate::llm::{ChatMessage, CompletionParams, CompletionRequest, ResponseFormat};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const RULES_PROMPT_FILE: &str = "rules_prompt.txt";
pub const PROFILING_PROMPT_FILE: &str = "profiling_prompt.txt";
pub const SYSTEM_PROMPT_FILE: &str = "system_prompt.txt";

pub const DEFAULT_RULES_PROMPT: &str =
    "Please analyze this document and extract all relevant rules and regulations.";

const RULES_PLACEHOLDER: &str = "{rules_documents}";
const TRANSACTIONS_PLACEHOLDER: &str = "{transaction_data}";

#[derive(Debug, Clone, Error)]
#[error("prompt template {} could not be read: {cause}", path.display())]
pub struct PromptError {
    pub path: PathBuf,
    pub cause: String,
}

#[derive(Debug, Clone)]
pub struct PromptTemplates {
    dir: PathBuf,
}

/// Templates needed for one analysis request.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPrompts {
    pub system: String,
    pub user_template: String,
}

/// The rules-generation instruction, plus a warning when the built-in default was used.
#[derive(Debug, Clone, PartialEq)]
pub struct RulesPrompt {
    pub text: String,
    pub warning: Option<String>,
}

impl PromptTemplates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn rules_prompt(&self) -> RulesPrompt {
        match self.read(RULES_PROMPT_FILE) {
            Ok(text) => RulesPrompt {
                text,
                warning: None,
            },
            Err(err) => {
                tracing::warn!(error = %err, "using default rules prompt");
                RulesPrompt {
                    text: DEFAULT_RULES_PROMPT.to_string(),
                    warning: Some(format!(
                        "Using default prompt ({RULES_PROMPT_FILE} not found)"
                    )),
                }
            }
        }
    }

    pub fn analysis_prompts(&self) -> Result<AnalysisPrompts, PromptError> {
        Ok(AnalysisPrompts {
            system: self.read(SYSTEM_PROMPT_FILE)?,
            user_template: self.read(PROFILING_PROMPT_FILE)?,
        })
    }

    fn read(&self, file_name: &str) -> Result<String, PromptError> {
        let path = self.dir.join(file_name);
        std::fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|e| PromptError {
                path,
                cause: e.to_string(),
            })
    }
}

/// Text of one input file, after extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentText {
    pub file_name: String,
    pub text: String,
}

/// Each document under a `=== name ===` banner, separated by blank lines.
pub fn rules_section(documents: &[DocumentText]) -> String {
    documents
        .iter()
        .map(|d| format!("=== {} ===\n{}", d.file_name, d.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Interpolates `template` with the rules documents and transaction data. Templates without
/// placeholders get both sections appended, rules first.
pub fn render_user_prompt(
    template: &str,
    transactions: &DocumentText,
    rules: &[DocumentText],
) -> String {
    let rules = rules_section(rules);
    if template.contains(RULES_PLACEHOLDER) || template.contains(TRANSACTIONS_PLACEHOLDER) {
        return substitute(
            template,
            &[
                (RULES_PLACEHOLDER, rules.as_str()),
                (TRANSACTIONS_PLACEHOLDER, transactions.text.as_str()),
            ],
        );
    }
    format!(
        "{template}\n\nRULES DOCUMENTS:\n{rules}\n\nTRANSACTION DATA:\n{}",
        transactions.text
    )
}

/// Replaces each placeholder in one left-to-right pass over `template`; inserted text is never
/// scanned again.
fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let next = values
            .iter()
            .filter_map(|&(key, value)| rest.find(key).map(|at| (at, key, value)))
            .min_by_key(|&(at, _, _)| at);
        match next {
            Some((at, key, value)) => {
                out.push_str(&rest[..at]);
                out.push_str(value);
                rest = &rest[at + key.len()..];
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

pub fn assemble_analysis_request(
    params: &CompletionParams,
    prompts: &AnalysisPrompts,
    transactions: &DocumentText,
    rules: &[DocumentText],
) -> CompletionRequest {
    let user = render_user_prompt(&prompts.user_template, transactions, rules);
    CompletionRequest {
        model: params.model.clone(),
        messages: vec![
            ChatMessage::system(prompts.system.clone()),
            ChatMessage::user(user).with_file(&transactions.file_name, &transactions.text),
        ],
        temperature: params.temperature,
        max_tokens: params.max_tokens,
        response_format: Some(ResponseFormat::json_object()),
    }
}

pub fn assemble_rules_request(
    params: &CompletionParams,
    prompt: &str,
    document: &DocumentText,
) -> CompletionRequest {
    CompletionRequest {
        model: params.model.clone(),
        messages: vec![ChatMessage::user(prompt).with_file(&document.file_name, &document.text)],
        temperature: params.temperature,
        max_tokens: params.max_tokens,
        response_format: None,
    }
}
