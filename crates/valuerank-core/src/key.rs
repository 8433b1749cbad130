//! Recompute keys and trigger events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unit of debounced, serialized recomputation.
///
/// Exactly one analysis computation may be in flight per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecomputeKey {
    Definition {
        definition_id: String,
        preamble_version_id: Option<String>,
        definition_version: u32,
    },
    Run {
        run_id: String,
    },
}

impl RecomputeKey {
    pub fn run(run_id: impl Into<String>) -> Self {
        RecomputeKey::Run {
            run_id: run_id.into(),
        }
    }

    pub fn definition(
        definition_id: impl Into<String>,
        preamble_version_id: Option<String>,
        definition_version: u32,
    ) -> Self {
        RecomputeKey::Definition {
            definition_id: definition_id.into(),
            preamble_version_id,
            definition_version,
        }
    }
}

impl fmt::Display for RecomputeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecomputeKey::Definition {
                definition_id,
                preamble_version_id,
                definition_version,
            } => write!(
                f,
                "definition:{definition_id}:{}:v{definition_version}",
                preamble_version_id.as_deref().unwrap_or("none")
            ),
            RecomputeKey::Run { run_id } => write!(f, "run:{run_id}"),
        }
    }
}

/// Why a recompute was requested. Informational only; every reason is
/// handled the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    ProbeCompleted,
    TranscriptSummarized,
    Manual,
    RunStarted,
}

/// A queued trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecomputeEvent {
    pub key: RecomputeKey,
    pub reason: TriggerReason,
}

impl RecomputeEvent {
    pub fn new(key: RecomputeKey, reason: TriggerReason) -> Self {
        Self { key, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(RecomputeKey::run("r1").to_string(), "run:r1");
        assert_eq!(
            RecomputeKey::definition("d1", Some("p3".into()), 2).to_string(),
            "definition:d1:p3:v2"
        );
        assert_eq!(
            RecomputeKey::definition("d1", None, 1).to_string(),
            "definition:d1:none:v1"
        );
    }

    #[test]
    fn test_event_json() {
        let event: RecomputeEvent = serde_json::from_str(
            r#"{"key": {"kind": "run", "run_id": "r9"}, "reason": "probe_completed"}"#,
        )
        .unwrap();
        assert_eq!(event.key, RecomputeKey::run("r9"));
        assert_eq!(event.reason, TriggerReason::ProbeCompleted);
    }
}
