//! Wire shape of the analysis JSON the model returns, and its validation into
//! [`AnalysisDocument`].
//!
//! Model output drifts between runs: ids come back as numbers, list fields as single strings,
//! and the historical `voilated_rules_list` / `sugggestions` spellings still appear. The wire
//! types accept all of those; `validate_and_into_document` is where the domain invariants are
//! enforced.

use crate::aggregate::{RiskBucket, RiskPolicy};
use crate::domain::analysis::{AnalysisDocument, Rule, Severity, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl OneOrMany<String> {
    /// Trimmed, non-empty entries. A single string becomes a one-element list.
    pub fn into_vec(self) -> Vec<String> {
        let items = match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        };
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Text(String),
    Number(serde_json::Number),
}

impl IdValue {
    fn into_id(self) -> String {
        match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LenientNumber {
    Number(f64),
    Text(String),
}

impl LenientNumber {
    fn value(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        }
    }
}

/// Flag values as models actually emit them. Anything unrecognised counts as absent, so the
/// flag is derived instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LenientBool {
    Bool(bool),
    Number(f64),
    Text(String),
    Other(Value),
}

impl LenientBool {
    fn value(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Number(n) if *n == 0.0 => Some(false),
            Self::Number(n) if *n == 1.0 => Some(true),
            Self::Number(_) => None,
            Self::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Some(true),
                "false" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmAnalysisDocument {
    #[serde(default)]
    pub rules_list: Option<Vec<LlmRule>>,
    #[serde(default)]
    pub transactions_list: Option<Vec<LlmTransaction>>,
    #[serde(default)]
    pub flagged_list: Option<Vec<IdValue>>,
    #[serde(default)]
    pub risk_scoring_definition: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRule {
    #[serde(default, alias = "rule_id", alias = "id")]
    pub ruleid: Option<IdValue>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmTransaction {
    #[serde(default, alias = "id")]
    pub transaction_id: Option<IdValue>,
    #[serde(
        default,
        rename = "voilated_rules_list",
        alias = "violated_rules_list",
        alias = "violated_rules"
    )]
    pub violated_rules: Option<OneOrMany<IdValue>>,
    #[serde(default)]
    pub flag: Option<LenientBool>,
    #[serde(default)]
    pub risk_score: Option<LenientNumber>,
    #[serde(default)]
    pub explanation: Option<OneOrMany<String>>,
    #[serde(default)]
    pub remediation: Option<OneOrMany<String>>,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub risk_segments: Option<BTreeMap<String, Value>>,
    #[serde(default, alias = "sugggestions")]
    pub suggestions: Option<OneOrMany<String>>,
}

/// Validates the JSON value extracted from a model reply. Some producers wrap the payload in
/// an `analysis_data` object; that wrapper is removed first.
pub fn parse_analysis(
    value: Value,
    policy: &RiskPolicy,
) -> Result<AnalysisDocument, ValidationError> {
    let value = match value {
        Value::Object(mut map) if matches!(map.get("analysis_data"), Some(Value::Object(_))) => {
            map.remove("analysis_data").unwrap_or(Value::Null)
        }
        other => other,
    };

    if !value.is_object() {
        return Err(ValidationError::new(
            "analysis",
            format!("expected a JSON object, got {}", json_type_name(&value)),
        ));
    }

    let parsed = serde_json::from_value::<LlmAnalysisDocument>(value)
        .map_err(|e| ValidationError::new("analysis", e.to_string()))?;
    parsed.validate_and_into_document(policy)
}

impl LlmAnalysisDocument {
    pub fn validate_and_into_document(
        self,
        policy: &RiskPolicy,
    ) -> Result<AnalysisDocument, ValidationError> {
        let mut seen_rules = BTreeSet::<String>::new();
        let mut rules = Vec::new();
        for (i, rule) in self.rules_list.unwrap_or_default().into_iter().enumerate() {
            rules.push(rule.validate_and_into_rule(i, &mut seen_rules)?);
        }

        let mut seen_transactions = HashSet::<String>::new();
        let mut pending = Vec::new();
        for (i, tx) in self
            .transactions_list
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            let (tx, flag) = tx.validate_and_into_transaction(i)?;
            if !seen_transactions.insert(tx.transaction_id.clone()) {
                return Err(ValidationError::new(
                    format!("transactions_list[{i}].transaction_id"),
                    format!("duplicate transaction id {}", tx.transaction_id),
                ));
            }
            pending.push((tx, flag));
        }

        let known: HashSet<&str> = pending
            .iter()
            .map(|(tx, _)| tx.transaction_id.as_str())
            .collect();
        let mut seen_flagged = HashSet::<String>::new();
        let mut flagged_ids = Vec::new();
        let mut stray_flagged_ids = Vec::new();
        for id in self.flagged_list.unwrap_or_default() {
            let id = id.into_id();
            if id.is_empty() || !seen_flagged.insert(id.clone()) {
                continue;
            }
            if known.contains(id.as_str()) {
                flagged_ids.push(id);
            } else {
                stray_flagged_ids.push(id);
            }
        }
        if !stray_flagged_ids.is_empty() {
            tracing::warn!(
                stray = ?stray_flagged_ids,
                "flagged ids without a matching transaction; ignoring them"
            );
        }

        let flagged: HashSet<&str> = flagged_ids.iter().map(String::as_str).collect();
        let transactions = pending
            .into_iter()
            .map(|(mut tx, explicit_flag)| {
                tx.flag = explicit_flag.unwrap_or_else(|| {
                    flagged.contains(tx.transaction_id.as_str())
                        || policy.bucket(tx.risk_score) == RiskBucket::High
                });
                tx
            })
            .collect();

        let risk_scoring_definition = match self.risk_scoring_definition {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Some(other) => Some(other.to_string()),
        };

        Ok(AnalysisDocument {
            rules,
            transactions,
            flagged_ids,
            stray_flagged_ids,
            risk_scoring_definition,
        })
    }
}

impl LlmRule {
    fn validate_and_into_rule(
        self,
        index: usize,
        seen: &mut BTreeSet<String>,
    ) -> Result<Rule, ValidationError> {
        let field = format!("rules_list[{index}]");
        let rule_id = self
            .ruleid
            .map(IdValue::into_id)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ValidationError::new(format!("{field}.ruleid"), "missing rule id"))?;

        if !seen.insert(rule_id.clone()) {
            return Err(ValidationError::new(
                format!("{field}.ruleid"),
                format!("duplicate rule id {rule_id}"),
            ));
        }

        Ok(Rule {
            rule_id,
            description: trimmed_or_empty(self.description),
            origin: trimmed_or_empty(self.origin),
            severity: self
                .severity
                .as_deref()
                .map(Severity::parse_lenient)
                .unwrap_or(Severity::Unspecified),
            remarks: self
                .remarks
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }
}

impl LlmTransaction {
    /// Returns the transaction and the flag the model stated explicitly, if any.
    fn validate_and_into_transaction(
        self,
        index: usize,
    ) -> Result<(Transaction, Option<bool>), ValidationError> {
        let field = format!("transactions_list[{index}]");
        let transaction_id = self
            .transaction_id
            .map(IdValue::into_id)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ValidationError::new(format!("{field}.transaction_id"), "missing transaction id")
            })?;

        let risk_score = match &self.risk_score {
            None => 0.0,
            Some(raw) => raw.value().ok_or_else(|| {
                ValidationError::new(format!("{field}.risk_score"), format!("not a number: {raw:?}"))
            })?,
        };
        if !risk_score.is_finite() || risk_score < 0.0 {
            return Err(ValidationError::new(
                format!("{field}.risk_score"),
                format!("must be a non-negative number (got {risk_score})"),
            ));
        }

        let violated_rules = match self.violated_rules {
            None => Vec::new(),
            Some(OneOrMany::One(id)) => vec![id.into_id()],
            Some(OneOrMany::Many(ids)) => ids.into_iter().map(IdValue::into_id).collect(),
        }
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();

        let risk_segments = self
            .risk_segments
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, v)| v.as_f64().map(|score| (name, score)))
            .collect();

        let tx = Transaction {
            transaction_id,
            violated_rules,
            flag: false,
            risk_score,
            explanation: self.explanation.map(OneOrMany::into_vec).unwrap_or_default(),
            remediation: self.remediation.map(OneOrMany::into_vec).unwrap_or_default(),
            remarks: self
                .remarks
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            risk_segments,
            suggestions: self.suggestions.map(OneOrMany::into_vec).unwrap_or_default(),
        };
        let flag = self.flag.as_ref().and_then(|raw| {
            let flag = raw.value();
            if flag.is_none() {
                tracing::debug!(transaction_id = %tx.transaction_id, ?raw, "unrecognised flag value; deriving it");
            }
            flag
        });
        Ok((tx, flag))
    }
}

fn trimmed_or_empty(s: Option<String>) -> String {
    s.map(|s| s.trim().to_string()).unwrap_or_default()
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
