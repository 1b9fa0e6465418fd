//! The two user actions: generating rules from one document, and analysing transactions
//! against the selected rules documents.

use crate::aggregate::{summarize, RiskPolicy, SummaryStats};
use crate::domain::analysis::AnalysisDocument;
use crate::error::AuditorError;
use crate::extract::{extract_text, ExtractionError};
use crate::llm::json::parse_analysis_reply;
use crate::llm::prompt::{
    assemble_analysis_request, assemble_rules_request, DocumentText, PromptTemplates,
};
use crate::llm::{CompletionClient, CompletionParams};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Arc<[u8]>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedRules {
    pub filename: String,
    pub content: String,
    pub usage: Option<serde_json::Value>,
    pub generated_at: DateTime<Utc>,
}

impl GeneratedRules {
    /// Name offered for download.
    pub fn download_name(&self) -> String {
        format!("analysis_{}.md", self.filename)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RulesGenerationOutcome {
    pub result: GeneratedRules,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisInput {
    pub rules_documents: Vec<UploadedFile>,
    pub transactions: Option<UploadedFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisOutcome {
    pub document: AnalysisDocument,
    pub stats: SummaryStats,
    pub rules_documents: Vec<String>,
    pub transaction_file: String,
    /// Rules documents that could not be read and were left out of the request.
    #[serde(skip)]
    pub skipped: Vec<ExtractionError>,
    pub usage: Option<serde_json::Value>,
    pub completed_at: DateTime<Utc>,
}

pub async fn generate_rules(
    client: &dyn CompletionClient,
    params: &CompletionParams,
    templates: &PromptTemplates,
    file: &UploadedFile,
) -> Result<RulesGenerationOutcome, AuditorError> {
    let prompt = templates.rules_prompt();
    let text = extract_blocking(file.clone()).await?;
    let document = DocumentText {
        file_name: file.name.clone(),
        text,
    };

    tracing::info!(file_name = %file.name, endpoint = client.endpoint(), "generating rules");
    let request = assemble_rules_request(params, &prompt.text, &document);
    let response = client.complete(&request).await?;
    let content = response.content().unwrap_or_default().to_string();

    Ok(RulesGenerationOutcome {
        result: GeneratedRules {
            filename: file.name.clone(),
            content,
            usage: response.usage.clone(),
            generated_at: Utc::now(),
        },
        warnings: prompt.warning.into_iter().collect(),
    })
}

pub async fn analyze(
    client: &dyn CompletionClient,
    params: &CompletionParams,
    templates: &PromptTemplates,
    policy: &RiskPolicy,
    input: AnalysisInput,
) -> Result<AnalysisOutcome, AuditorError> {
    if input.rules_documents.is_empty() {
        return Err(AuditorError::input("Please select at least one rules file"));
    }
    let Some(transactions) = input.transactions else {
        return Err(AuditorError::input("Please upload transaction data CSV"));
    };

    let prompts = templates.analysis_prompts()?;

    let transaction_text = DocumentText {
        file_name: transactions.name.clone(),
        text: extract_blocking(transactions.clone()).await?,
    };

    let mut rules = Vec::with_capacity(input.rules_documents.len());
    let mut skipped = Vec::new();
    for file in input.rules_documents {
        match extract_blocking(file.clone()).await {
            Ok(text) => rules.push(DocumentText {
                file_name: file.name,
                text,
            }),
            Err(err) => {
                tracing::warn!(file_name = %err.file_name, cause = %err.cause, "skipping unreadable rules document");
                skipped.push(err);
            }
        }
    }
    if rules.is_empty() {
        let names: Vec<&str> = skipped.iter().map(|e| e.file_name.as_str()).collect();
        return Err(AuditorError::input(format!(
            "None of the selected rules documents could be read: {}",
            names.join(", ")
        )));
    }

    tracing::info!(
        rules_documents = rules.len(),
        skipped = skipped.len(),
        transaction_file = %transaction_text.file_name,
        endpoint = client.endpoint(),
        "sending analysis request"
    );
    let request = assemble_analysis_request(params, &prompts, &transaction_text, &rules);
    let response = client.complete(&request).await?;
    let content = response.content().unwrap_or_default();

    let document = parse_analysis_reply(content, policy)?;
    let stats = summarize(&document, policy);
    tracing::info!(
        total = stats.total,
        flagged = stats.flagged,
        high = stats.high,
        failure_rate = stats.failure_rate,
        "analysis complete"
    );

    Ok(AnalysisOutcome {
        document,
        stats,
        rules_documents: rules.into_iter().map(|d| d.file_name).collect(),
        transaction_file: transaction_text.file_name,
        skipped,
        usage: response.usage.clone(),
        completed_at: Utc::now(),
    })
}

async fn extract_blocking(file: UploadedFile) -> Result<String, ExtractionError> {
    let name = file.name.clone();
    tokio::task::spawn_blocking(move || extract_text(&file.name, &file.bytes))
        .await
        .map_err(|e| ExtractionError::new(name, format!("extraction task failed: {e}")))?
}
