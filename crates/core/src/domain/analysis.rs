use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The validated result of one analysis round-trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDocument {
    pub rules: Vec<Rule>,
    pub transactions: Vec<Transaction>,
    /// Flagged ids that reference a transaction, in first-seen order, without duplicates.
    pub flagged_ids: Vec<String>,
    /// Flagged ids the model emitted without a matching transaction.
    pub stray_flagged_ids: Vec<String>,
    pub risk_scoring_definition: Option<String>,
}

impl AnalysisDocument {
    pub fn transaction(&self, transaction_id: &str) -> Option<&Transaction> {
        self.transactions
            .iter()
            .find(|tx| tx.transaction_id == transaction_id)
    }

    pub fn flagged_transactions(&self) -> impl Iterator<Item = &Transaction> + '_ {
        self.flagged_ids.iter().filter_map(|id| self.transaction(id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub description: String,
    pub origin: String,
    pub severity: Severity,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Unspecified,
}

impl Severity {
    /// Case-insensitive; anything unrecognised is `Unspecified`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Unspecified,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Unspecified => "Unspecified",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub violated_rules: Vec<String>,
    pub flag: bool,
    pub risk_score: f64,
    pub explanation: Vec<String>,
    pub remediation: Vec<String>,
    pub remarks: Option<String>,
    pub risk_segments: BTreeMap<String, f64>,
    pub suggestions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_case_insensitive() {
        assert_eq!(Severity::parse_lenient("HIGH"), Severity::High);
        assert_eq!(Severity::parse_lenient(" medium "), Severity::Medium);
        assert_eq!(Severity::parse_lenient("low"), Severity::Low);
        assert_eq!(Severity::parse_lenient("critical"), Severity::Unspecified);
        assert_eq!(Severity::High.to_string(), "High");
    }
}
