//! Summary statistics and table rows derived from an [`AnalysisDocument`].
//!
//! Everything here is a pure function of the document and the [`RiskPolicy`].

use crate::domain::analysis::{AnalysisDocument, Transaction};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scale the producer reports risk scores on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreScale {
    /// 0 to 100.
    #[default]
    Percent,
    /// 0 to 1; multiplied by 100 before bucketing.
    Unit,
}

impl FromStr for ScoreScale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "percent" | "0-100" => Ok(Self::Percent),
            "unit" | "0-1" => Ok(Self::Unit),
            other => Err(format!("unknown score scale {other:?} (expected percent or unit)")),
        }
    }
}

/// Thresholds on the percent scale: `score >= high` is High, `score >= medium` is Medium.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskPolicy {
    pub high: f64,
    pub medium: f64,
    pub scale: ScoreScale,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            high: 70.0,
            medium: 30.0,
            scale: ScoreScale::Percent,
        }
    }
}

impl RiskPolicy {
    /// The alternate producer schema with 40/20 thresholds.
    pub fn legacy() -> Self {
        Self {
            high: 40.0,
            medium: 20.0,
            scale: ScoreScale::Percent,
        }
    }

    pub fn bucket(&self, score: f64) -> RiskBucket {
        let score = match self.scale {
            ScoreScale::Percent => score,
            ScoreScale::Unit => score * 100.0,
        };
        if score >= self.high {
            RiskBucket::High
        } else if score >= self.medium {
            RiskBucket::Medium
        } else {
            RiskBucket::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskBucket {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub total: usize,
    pub flagged: usize,
    /// Percent of transactions flagged, two decimals.
    pub failure_rate: f64,
    pub median_risk: f64,
}

pub fn summarize(doc: &AnalysisDocument, policy: &RiskPolicy) -> SummaryStats {
    let (mut high, mut medium, mut low) = (0, 0, 0);
    for tx in &doc.transactions {
        match policy.bucket(tx.risk_score) {
            RiskBucket::High => high += 1,
            RiskBucket::Medium => medium += 1,
            RiskBucket::Low => low += 1,
        }
    }

    let total = doc.transactions.len();
    let flagged = doc.flagged_ids.len();
    let scores: Vec<f64> = doc.transactions.iter().map(|tx| tx.risk_score).collect();

    SummaryStats {
        high,
        medium,
        low,
        total,
        flagged,
        failure_rate: failure_rate(flagged, total),
        median_risk: median(&scores),
    }
}

pub fn failure_rate(flagged: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(flagged as f64 / total as f64 * 100.0)
}

/// Median of `values`; 0 for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// One line of the transaction table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub transaction_id: String,
    pub risk_level: RiskBucket,
    pub violated_rules: String,
    pub violation_count: usize,
    pub explanation: String,
    pub risk_score: f64,
    pub flagged: bool,
    pub remediation: Vec<String>,
}

impl TransactionRow {
    pub fn from_transaction(tx: &Transaction, policy: &RiskPolicy) -> Self {
        Self {
            transaction_id: tx.transaction_id.clone(),
            risk_level: policy.bucket(tx.risk_score),
            violated_rules: tx.violated_rules.join(", "),
            violation_count: tx.violated_rules.len(),
            explanation: tx.explanation.join("; "),
            risk_score: tx.risk_score,
            flagged: tx.flag,
            remediation: tx.remediation.clone(),
        }
    }
}

pub fn transaction_rows(doc: &AnalysisDocument, policy: &RiskPolicy) -> Vec<TransactionRow> {
    doc.transactions
        .iter()
        .map(|tx| TransactionRow::from_transaction(tx, policy))
        .collect()
}
