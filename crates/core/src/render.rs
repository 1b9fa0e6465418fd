//! Dashboard view model. Pure data; the API turns it into HTML.

use crate::aggregate::{transaction_rows, RiskBucket, RiskPolicy, SummaryStats, TransactionRow};
use crate::domain::analysis::AnalysisDocument;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const TITLE: &str = "Analysis Results";
pub const PRODUCT_NAME: &str = "Auditor Assist 2.0";
const DOCUMENT_PLACEHOLDER: &str = "rules documents";
const PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub header: Header,
    pub risk_summary: RiskSummary,
    pub transactions: TransactionTable,
    pub flagged: FlaggedTabs,
    pub rules: RulesTable,
    pub exports: Vec<ExportAction>,
    pub footer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    pub title: String,
    pub analysed: String,
    pub against: String,
    /// `YYYY-MM-DD HH:MM`.
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSummary {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub total: usize,
    pub flagged: usize,
    pub failure_rate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionTable {
    pub rows: Vec<TransactionRow>,
    pub entries_caption: String,
    pub median_risk: String,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedTabs {
    pub review_status: Vec<String>,
    pub actions: Vec<FlaggedAction>,
    pub results: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedAction {
    pub transaction_id: String,
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RulesTable {
    pub rows: Vec<RuleRow>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleRow {
    pub rule_id: String,
    pub description: String,
    pub severity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportAction {
    pub label: String,
    pub enabled: bool,
}

pub fn render_dashboard(
    doc: &AnalysisDocument,
    stats: &SummaryStats,
    policy: &RiskPolicy,
    generated_at: DateTime<Utc>,
) -> Dashboard {
    Dashboard {
        header: Header {
            title: TITLE.to_string(),
            analysed: analysed_label(doc),
            against: "against Transaction Data".to_string(),
            timestamp: generated_at.format("%Y-%m-%d %H:%M").to_string(),
        },
        risk_summary: RiskSummary {
            high: stats.high,
            medium: stats.medium,
            low: stats.low,
            total: stats.total,
            flagged: stats.flagged,
            failure_rate: format!("{:.2}%", stats.failure_rate),
        },
        transactions: transaction_table(doc, stats, policy),
        flagged: flagged_tabs(doc),
        rules: rules_table(doc),
        exports: ["EXPORT CSV", "EXPORT PDF"]
            .into_iter()
            .map(|label| ExportAction {
                label: label.to_string(),
                enabled: false,
            })
            .collect(),
        footer: PRODUCT_NAME.to_string(),
    }
}

/// First rule's origin up to the first comma.
fn analysed_label(doc: &AnalysisDocument) -> String {
    doc.rules
        .first()
        .and_then(|r| r.origin.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DOCUMENT_PLACEHOLDER)
        .to_string()
}

fn transaction_table(
    doc: &AnalysisDocument,
    stats: &SummaryStats,
    policy: &RiskPolicy,
) -> TransactionTable {
    let total = stats.total;
    TransactionTable {
        rows: transaction_rows(doc, policy),
        entries_caption: format!("Showing 1 to {} of {total} entries", total.min(PAGE_SIZE)),
        median_risk: format!("{:.2}", stats.median_risk),
        warning: (total == 0).then(|| "No transaction data available".to_string()),
    }
}

fn flagged_tabs(doc: &AnalysisDocument) -> FlaggedTabs {
    let mut review_status: Vec<String> = doc
        .flagged_ids
        .iter()
        .map(|id| format!("{id}: Needs Review"))
        .collect();
    review_status.extend(
        doc.stray_flagged_ids
            .iter()
            .map(|id| format!("{id}: Needs Review (unknown transaction)")),
    );

    let actions = doc
        .flagged_transactions()
        .map(|tx| FlaggedAction {
            transaction_id: tx.transaction_id.clone(),
            remediation: if tx.remediation.is_empty() {
                vec!["None".to_string()]
            } else {
                tx.remediation.clone()
            },
        })
        .collect();

    let results = doc
        .flagged_transactions()
        .map(|tx| format!("{}: Found {} violations", tx.transaction_id, tx.violated_rules.len()))
        .collect();

    FlaggedTabs {
        review_status,
        actions,
        results,
    }
}

fn rules_table(doc: &AnalysisDocument) -> RulesTable {
    RulesTable {
        rows: doc
            .rules
            .iter()
            .map(|r| RuleRow {
                rule_id: r.rule_id.clone(),
                description: r.description.clone(),
                severity: r.severity.to_string(),
            })
            .collect(),
        warning: doc
            .rules
            .is_empty()
            .then(|| "No rules data available".to_string()),
    }
}

/// CSS class suffix for a risk level cell.
pub fn risk_class(bucket: RiskBucket) -> &'static str {
    match bucket {
        RiskBucket::High => "risk-high",
        RiskBucket::Medium => "risk-medium",
        RiskBucket::Low => "risk-low",
    }
}
