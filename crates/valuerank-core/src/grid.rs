//! Condition grid: outcomes pooled by two scenario attributes and by model.
//!
//! Architecture:
//! 1. Parse each scenario's dimension payload once into a [`DimensionIndex`]
//! 2. Map every scenario to a [`ConditionKey`] through [`normalize_level`]
//! 3. Group successful outcomes by (condition, model) into [`Cell`]s
//!
//! Missing or malformed dimension data never drops a scenario; it lands
//! under the `"N/A"` level so gaps stay visible in the grid.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use valuerank_stats::{Estimate, mean, sample_std_dev, sem};

use crate::error::CoreError;
use crate::outcome::{DecisionValue, OutcomeRecord};

/// Level used when a scenario has no usable value for an attribute.
pub const NA_LEVEL: &str = "N/A";

/// A scenario's dimension levels, keyed by dimension name.
pub type DimensionValues = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Dimension payloads
// ---------------------------------------------------------------------------

/// Parse a raw dimension payload.
///
/// Scalars become level strings, `null` and blank strings count as absent.
/// Anything that is not a flat JSON object is malformed.
pub fn parse_dimensions(scenario_id: &str, raw: &Value) -> Result<DimensionValues, CoreError> {
    let malformed = |reason: String| CoreError::MalformedDimensionData {
        scenario_id: scenario_id.to_string(),
        reason,
    };
    let obj = match raw {
        Value::Object(obj) => obj,
        Value::Null => return Ok(DimensionValues::new()),
        other => return Err(malformed(format!("expected an object, got {}", json_kind(other)))),
    };
    let mut dims = DimensionValues::new();
    for (name, value) in obj {
        let level = match value {
            Value::Null => continue,
            Value::String(s) if s.trim().is_empty() => continue,
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(malformed(format!(
                    "dimension '{name}' is {}, expected a scalar",
                    json_kind(value)
                )));
            }
        };
        dims.insert(name.clone(), level);
    }
    Ok(dims)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The one place absent dimension values become `"N/A"`.
pub fn normalize_level(dims: Option<&DimensionValues>, attribute: &str) -> String {
    dims.and_then(|d| d.get(attribute))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map_or_else(|| NA_LEVEL.to_string(), str::to_string)
}

/// Parsed dimension values for every known scenario.
#[derive(Debug, Clone, Default)]
pub struct DimensionIndex {
    scenarios: BTreeMap<String, DimensionValues>,
    malformed: BTreeSet<String>,
    warnings: Vec<CoreError>,
}

impl DimensionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw payloads. Malformed payloads are kept as scenarios with
    /// no dimensions and reported through [`DimensionIndex::warnings`].
    pub fn from_raw(raw: &BTreeMap<String, Value>) -> Self {
        let mut index = Self::new();
        for (scenario_id, payload) in raw {
            match parse_dimensions(scenario_id, payload) {
                Ok(dims) => index.insert(scenario_id.clone(), dims),
                Err(err) => {
                    warn!("{err}; scenario bucketed under {NA_LEVEL}");
                    index.scenarios.insert(scenario_id.clone(), DimensionValues::new());
                    index.malformed.insert(scenario_id.clone());
                    index.warnings.push(err);
                }
            }
        }
        index
    }

    pub fn insert(&mut self, scenario_id: impl Into<String>, dims: DimensionValues) {
        self.scenarios.insert(scenario_id.into(), dims);
    }

    pub fn get(&self, scenario_id: &str) -> Option<&DimensionValues> {
        self.scenarios.get(scenario_id)
    }

    pub fn level(&self, scenario_id: &str, attribute: &str) -> String {
        normalize_level(self.get(scenario_id), attribute)
    }

    /// Union of dimension names across all scenarios.
    pub fn dimension_keys(&self) -> BTreeSet<String> {
        self.scenarios
            .values()
            .flat_map(|d| d.keys().cloned())
            .collect()
    }

    /// Scenarios in id order with their parsed levels.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DimensionValues)> {
        self.scenarios.iter().map(|(id, dims)| (id.as_str(), dims))
    }

    pub fn scenario_ids(&self) -> impl Iterator<Item = &str> {
        self.scenarios.keys().map(String::as_str)
    }

    pub fn is_malformed(&self, scenario_id: &str) -> bool {
        self.malformed.contains(scenario_id)
    }

    pub fn malformed_count(&self) -> usize {
        self.malformed.len()
    }

    pub fn warnings(&self) -> &[CoreError] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Conditions and cells
// ---------------------------------------------------------------------------

/// A pair of attribute levels. Scenarios sharing a key are pooled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConditionKey {
    pub attribute_a_level: String,
    pub attribute_b_level: String,
}

impl ConditionKey {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            attribute_a_level: a.into(),
            attribute_b_level: b.into(),
        }
    }
}

impl fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.attribute_a_level, self.attribute_b_level)
    }
}

/// Aggregated outcomes for one (condition, model) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub condition: ConditionKey,
    pub model_id: String,
    /// Number of numeric decisions; categorical ones are not samples of the mean.
    pub sample_count: usize,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    /// Defined only with two or more numeric decisions.
    pub sem: Estimate,
    pub decisions: Vec<DecisionValue>,
    pub categorical_counts: BTreeMap<String, usize>,
}

impl Cell {
    fn from_decisions(condition: ConditionKey, model_id: String, decisions: Vec<DecisionValue>) -> Self {
        let numeric: Vec<f64> = decisions.iter().filter_map(DecisionValue::as_numeric).collect();
        let mut categorical_counts = BTreeMap::new();
        for d in &decisions {
            if let DecisionValue::Categorical(code) = d {
                *categorical_counts.entry(code.clone()).or_insert(0) += 1;
            }
        }
        // Decision values are finite by construction, so only emptiness can fail.
        let (mean, std_dev, sem) = if numeric.is_empty() {
            (None, None, Estimate::Insufficient { n: 0 })
        } else {
            (
                mean(&numeric).ok(),
                sample_std_dev(&numeric).ok().and_then(Estimate::value),
                sem(&numeric).unwrap_or(Estimate::Insufficient { n: numeric.len() }),
            )
        };
        Self {
            condition,
            model_id,
            sample_count: numeric.len(),
            mean,
            std_dev,
            sem,
            decisions,
            categorical_counts,
        }
    }

    pub fn numeric_values(&self) -> Vec<f64> {
        self.decisions
            .iter()
            .filter_map(DecisionValue::as_numeric)
            .collect()
    }
}

/// Cells for every (condition, model) pair with outcomes, plus the full set
/// of conditions realised by known scenarios.
#[derive(Debug, Clone, Serialize)]
pub struct ConditionGrid {
    pub attribute_a: String,
    pub attribute_b: String,
    pub levels_a: BTreeSet<String>,
    pub levels_b: BTreeSet<String>,
    pub conditions: BTreeSet<ConditionKey>,
    /// Sorted by condition, then model.
    pub cells: Vec<Cell>,
    pub excluded_failed: usize,
    #[serde(skip)]
    pub warnings: Vec<CoreError>,
}

impl ConditionGrid {
    pub fn build(
        outcomes: &[OutcomeRecord],
        dimensions: &DimensionIndex,
        attribute_a: &str,
        attribute_b: &str,
    ) -> Self {
        let condition_of = |scenario_id: &str| {
            ConditionKey::new(
                dimensions.level(scenario_id, attribute_a),
                dimensions.level(scenario_id, attribute_b),
            )
        };

        let mut conditions: BTreeSet<ConditionKey> =
            dimensions.scenario_ids().map(condition_of).collect();

        let mut groups: BTreeMap<(ConditionKey, String), Vec<DecisionValue>> = BTreeMap::new();
        let mut excluded_failed = 0;
        for outcome in outcomes {
            if !outcome.success {
                excluded_failed += 1;
                continue;
            }
            let key = condition_of(&outcome.scenario_id);
            conditions.insert(key.clone());
            groups
                .entry((key, outcome.model_id.clone()))
                .or_default()
                .push(outcome.decision_value.clone());
        }

        let cells = groups
            .into_iter()
            .map(|((condition, model_id), decisions)| {
                Cell::from_decisions(condition, model_id, decisions)
            })
            .collect();

        Self {
            attribute_a: attribute_a.to_string(),
            attribute_b: attribute_b.to_string(),
            levels_a: conditions.iter().map(|c| c.attribute_a_level.clone()).collect(),
            levels_b: conditions.iter().map(|c| c.attribute_b_level.clone()).collect(),
            conditions,
            cells,
            excluded_failed,
            warnings: dimensions.warnings().to_vec(),
        }
    }

    /// Binary search over `cells`, which `build` leaves sorted by
    /// (condition, model).
    pub fn cell(&self, condition: &ConditionKey, model_id: &str) -> Option<&Cell> {
        self.cells
            .binary_search_by(|c| (&c.condition, c.model_id.as_str()).cmp(&(condition, model_id)))
            .ok()
            .map(|i| &self.cells[i])
    }

    /// Model ids that have at least one cell.
    pub fn models(&self) -> BTreeSet<String> {
        self.cells.iter().map(|c| c.model_id.clone()).collect()
    }
}
