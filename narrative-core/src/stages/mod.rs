//! The turn pipeline's stages.
//!
//! Every stage consults the [`NarratorOracle`](crate::oracle::NarratorOracle)
//! and recovers from oracle failure at its own boundary: it returns a
//! [`StageOutcome::Degraded`] carrying a safe fallback instead of an error.

pub mod director;
pub mod perception;
pub mod performance;
pub mod predictor;
pub mod trigger;

pub use director::{DirectorPlan, ThreadAction};
pub use perception::{PerceptionReport, TensionHint};
pub use performance::Performance;
pub use trigger::TriggerDecision;

use crate::oracle::OracleError;
use crate::state::NarrativeState;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Identifies a stage. Each stage's system prompt starts with its header
/// line, which lets scripted oracles route calls without parsing prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Perception,
    Trigger,
    Director,
    Performance,
    Predictor,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Perception,
        Stage::Trigger,
        Stage::Director,
        Stage::Performance,
        Stage::Predictor,
    ];

    /// The embedded system prompt template.
    pub fn prompt(&self) -> &'static str {
        match self {
            Stage::Perception => include_str!("prompts/perception.txt"),
            Stage::Trigger => include_str!("prompts/trigger.txt"),
            Stage::Director => include_str!("prompts/director.txt"),
            Stage::Performance => include_str!("prompts/performance.txt"),
            Stage::Predictor => include_str!("prompts/predictor.txt"),
        }
    }

    /// First line of the stage's system prompt.
    pub fn header(&self) -> &'static str {
        self.prompt().lines().next().unwrap_or_default()
    }

    /// Which stage a system prompt belongs to.
    pub fn detect(system_prompt: &str) -> Option<Stage> {
        Self::ALL
            .into_iter()
            .find(|stage| system_prompt.starts_with(stage.header()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Perception => "perception",
            Stage::Trigger => "trigger",
            Stage::Director => "director",
            Stage::Performance => "performance",
            Stage::Predictor => "predictor",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The result of running a stage.
///
/// Serialized with a `status` tag so debug payloads mark degraded stages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome<T> {
    /// The oracle answered and the answer was usable.
    Ready(T),
    /// The oracle failed; `fallback` is the stage's safe default.
    Degraded { fallback: T, error: String },
}

impl<T> StageOutcome<T> {
    pub fn degraded(fallback: T, error: impl fmt::Display) -> Self {
        StageOutcome::Degraded {
            fallback,
            error: error.to_string(),
        }
    }

    /// The report to hand downstream, degraded or not.
    pub fn value(&self) -> &T {
        match self {
            StageOutcome::Ready(v) => v,
            StageOutcome::Degraded { fallback, .. } => fallback,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            StageOutcome::Ready(v) => v,
            StageOutcome::Degraded { fallback, .. } => fallback,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, StageOutcome::Degraded { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StageOutcome::Ready(_) => None,
            StageOutcome::Degraded { error, .. } => Some(error),
        }
    }
}

/// Deserialize an oracle JSON reply into a stage report.
pub(crate) fn from_reply<T: DeserializeOwned>(map: Map<String, Value>) -> Result<T, OracleError> {
    serde_json::from_value(Value::Object(map)).map_err(|e| OracleError::Shape(e.to_string()))
}

/// Substitute `{key}` placeholders in a prompt template.
pub(crate) fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// One-line summary of the core axes for prompts.
pub(crate) fn describe_axes(state: &NarrativeState) -> String {
    let axes = &state.axes;
    format!(
        "Tension: {}  Intimacy: {}  Emotion: {} ({})",
        axes.tension, axes.intimacy, axes.emotion.label, axes.emotion.intensity
    )
}

pub(crate) fn describe_momentum(state: &NarrativeState) -> String {
    let m = &state.momentum;
    format!(
        "pace {}, direction {}, streak {}",
        m.pace.name(),
        m.direction.name(),
        m.streak
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_headers_are_distinct() {
        for stage in Stage::ALL {
            assert!(stage.header().starts_with("# Narrative engine:"));
            assert_eq!(Stage::detect(stage.prompt()), Some(stage));
        }
        assert_eq!(Stage::detect("You are a helpful assistant"), None);
    }

    #[test]
    fn test_outcome_accessors() {
        let ready = StageOutcome::Ready(3);
        assert_eq!(*ready.value(), 3);
        assert!(!ready.is_degraded());
        assert!(ready.error().is_none());

        let degraded = StageOutcome::degraded(0, "timeout");
        assert_eq!(*degraded.value(), 0);
        assert_eq!(degraded.error(), Some("timeout"));
        assert_eq!(degraded.into_value(), 0);
    }

    #[test]
    fn test_outcome_serialization_marks_status() {
        #[derive(Serialize)]
        struct Report {
            score: i32,
        }

        let json = serde_json::to_value(StageOutcome::Ready(Report { score: 1 })).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ready", "score": 1}));

        let json = serde_json::to_value(StageOutcome::degraded(Report { score: 0 }, "boom")).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["fallback"]["score"], 0);
    }

    #[test]
    fn test_fill() {
        let text = fill("{name} says {line}; {name} waits", &[("name", "Sable"), ("line", "hi")]);
        assert_eq!(text, "Sable says hi; Sable waits");
    }
}
