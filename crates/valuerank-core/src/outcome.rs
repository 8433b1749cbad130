//! Outcome records as read from the probe/transcript store.
//!
//! Decision values are classified once, at ingestion, into numeric or
//! categorical; nothing downstream re-parses strings.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A model's decision for one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawDecision", into = "RawDecision")]
pub enum DecisionValue {
    Numeric(f64),
    Categorical(String),
}

/// Wire form of a decision: a JSON number or a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawDecision {
    Number(f64),
    Text(String),
}

impl From<RawDecision> for DecisionValue {
    fn from(raw: RawDecision) -> Self {
        match raw {
            RawDecision::Number(v) if v.is_finite() => DecisionValue::Numeric(v),
            RawDecision::Number(v) => DecisionValue::Categorical(v.to_string()),
            RawDecision::Text(s) => DecisionValue::parse(&s),
        }
    }
}

impl From<DecisionValue> for RawDecision {
    fn from(value: DecisionValue) -> Self {
        match value {
            DecisionValue::Numeric(v) => RawDecision::Number(v),
            DecisionValue::Categorical(s) => RawDecision::Text(s),
        }
    }
}

impl DecisionValue {
    /// Numeric only if the text parses to a finite number; anything else
    /// (codes like `"A"`, `"inf"`, `"NaN"`, empty strings) is categorical.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && !raw.trim().is_empty() => DecisionValue::Numeric(v),
            _ => DecisionValue::Categorical(raw.to_string()),
        }
    }

    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            DecisionValue::Numeric(v) => Some(*v),
            DecisionValue::Categorical(_) => None,
        }
    }

    /// Exact, order-stable encoding used for content hashing.
    pub(crate) fn canonical(&self) -> String {
        match self {
            DecisionValue::Numeric(v) => format!("n:{:016x}", v.to_bits()),
            DecisionValue::Categorical(s) => format!("c:{s}"),
        }
    }
}

impl fmt::Display for DecisionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionValue::Numeric(v) => write!(f, "{v}"),
            DecisionValue::Categorical(s) => f.write_str(s),
        }
    }
}

/// How a transcript treated one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueStatus {
    Prioritized,
    Deprioritized,
    Neutral,
}

/// One observed result for a (scenario, model) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub scenario_id: String,
    pub model_id: String,
    pub decision_value: DecisionValue,
    pub success: bool,
    pub created_at: String,
    #[serde(default)]
    pub sample_index: u32,
    #[serde(default)]
    pub values: BTreeMap<String, ValueStatus>,
}

impl OutcomeRecord {
    pub fn new(
        scenario_id: impl Into<String>,
        model_id: impl Into<String>,
        decision_value: DecisionValue,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            model_id: model_id.into(),
            decision_value,
            success: true,
            created_at: created_at.into(),
            sample_index: 0,
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, value_id: impl Into<String>, status: ValueStatus) -> Self {
        self.values.insert(value_id.into(), status);
        self
    }

    pub fn with_sample_index(mut self, sample_index: u32) -> Self {
        self.sample_index = sample_index;
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

/// A run's outcomes and raw scenario dimension payloads, as exported by the
/// transcript store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunInput {
    pub run_id: String,
    #[serde(default)]
    pub outcomes: Vec<OutcomeRecord>,
    #[serde(default)]
    pub scenario_dimensions: BTreeMap<String, serde_json::Value>,
}

impl RunInput {
    pub fn load_from_path(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| CoreError::AggregationIo {
            key: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| CoreError::AggregationIo {
            key: path.display().to_string(),
            message: format!("failed to parse run JSON: {e}"),
        })
    }

    /// Distinct model ids in first-seen order.
    pub fn model_ids(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for o in &self.outcomes {
            if !seen.contains(&o.model_id) {
                seen.push(o.model_id.clone());
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_and_categorical() {
        assert_eq!(DecisionValue::parse("3"), DecisionValue::Numeric(3.0));
        assert_eq!(DecisionValue::parse(" 0.25 "), DecisionValue::Numeric(0.25));
        assert_eq!(
            DecisionValue::parse("A"),
            DecisionValue::Categorical("A".into())
        );
        assert_eq!(
            DecisionValue::parse("inf"),
            DecisionValue::Categorical("inf".into())
        );
        assert_eq!(
            DecisionValue::parse("NaN"),
            DecisionValue::Categorical("NaN".into())
        );
        assert_eq!(
            DecisionValue::parse("1e400"),
            DecisionValue::Categorical("1e400".into())
        );
        assert_eq!(DecisionValue::parse(""), DecisionValue::Categorical("".into()));
    }

    #[test]
    fn test_deserialize_outcome_record() {
        let json = r#"{
            "scenario_id": "s1",
            "model_id": "gpt-4",
            "decision_value": "4",
            "success": true,
            "created_at": "2026-01-01T00:00:00Z",
            "values": {"Physical_Safety": "prioritized"}
        }"#;
        let o: OutcomeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(o.decision_value, DecisionValue::Numeric(4.0));
        assert_eq!(o.sample_index, 0);
        assert_eq!(o.values["Physical_Safety"], ValueStatus::Prioritized);

        let categorical: OutcomeRecord = serde_json::from_str(
            r#"{"scenario_id":"s1","model_id":"m","decision_value":"refuse","success":false,"created_at":"t"}"#,
        )
        .unwrap();
        assert_eq!(
            categorical.decision_value,
            DecisionValue::Categorical("refuse".into())
        );
    }

    #[test]
    fn test_numeric_serializes_as_number() {
        let v = serde_json::to_value(DecisionValue::Numeric(2.5)).unwrap();
        assert_eq!(v, serde_json::json!(2.5));
        let c = serde_json::to_value(DecisionValue::Categorical("x".into())).unwrap();
        assert_eq!(c, serde_json::json!("x"));
    }

    #[test]
    fn test_canonical_distinguishes_kinds() {
        let n = DecisionValue::Numeric(1.0).canonical();
        let c = DecisionValue::Categorical("1".into()).canonical();
        assert_ne!(n, c);
    }

    #[test]
    fn test_model_ids_first_seen_order() {
        let input = RunInput {
            run_id: "r".into(),
            outcomes: vec![
                OutcomeRecord::new("s1", "b", DecisionValue::Numeric(1.0), "t"),
                OutcomeRecord::new("s1", "a", DecisionValue::Numeric(1.0), "t"),
                OutcomeRecord::new("s2", "b", DecisionValue::Numeric(1.0), "t"),
            ],
            scenario_dimensions: BTreeMap::new(),
        };
        assert_eq!(input.model_ids(), vec!["b".to_string(), "a".to_string()]);
    }
}
