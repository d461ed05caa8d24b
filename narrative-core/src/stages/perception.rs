//! Perception: reads the user's message and reports intent, tone and
//! engagement. Read-only.

use super::{describe_axes, describe_momentum, from_reply, Stage, StageOutcome};
use crate::config::Persona;
use crate::history::{self, HistoryEntry};
use crate::oracle::NarratorOracle;
use crate::state::{null_as_default, NarrativeState};
use serde::{Deserialize, Deserializer, Serialize};

/// How the perceiver thinks tension should move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TensionHint {
    Raise,
    #[default]
    Hold,
    Lower,
}

impl TensionHint {
    /// Lenient parse; anything unrecognised holds.
    pub fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "raise" | "increase" | "up" | "higher" => TensionHint::Raise,
            "lower" | "decrease" | "down" | "reduce" => TensionHint::Lower,
            _ => TensionHint::Hold,
        }
    }
}

impl<'de> Deserialize<'de> for TensionHint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        Ok(text.as_deref().map(Self::parse).unwrap_or_default())
    }
}

/// Structured perception of one user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionReport {
    #[serde(default)]
    pub user_intent: String,
    #[serde(default)]
    pub emotional_tone: String,
    #[serde(default = "default_engagement")]
    pub engagement_level: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub key_signals: Vec<String>,
    #[serde(default)]
    pub narrative_opportunity: String,
    #[serde(default)]
    pub tension_hint: TensionHint,
    #[serde(default)]
    pub follow_type: String,
}

fn default_engagement() -> i32 {
    50
}

impl Default for PerceptionReport {
    fn default() -> Self {
        Self {
            user_intent: String::new(),
            emotional_tone: String::new(),
            engagement_level: default_engagement(),
            key_signals: Vec::new(),
            narrative_opportunity: String::new(),
            tension_hint: TensionHint::Hold,
            follow_type: String::new(),
        }
    }
}

/// Analyse `message` against the pre-turn state.
pub async fn analyze(
    oracle: &dyn NarratorOracle,
    persona: &Persona,
    message: &str,
    state: &NarrativeState,
    history: &[HistoryEntry],
) -> StageOutcome<PerceptionReport> {
    let prompt = user_prompt(persona, message, state, history);

    let result = oracle
        .invoke_json(Stage::Perception.prompt(), &prompt)
        .await
        .and_then(from_reply::<PerceptionReport>);

    match result {
        Ok(report) => StageOutcome::Ready(report),
        Err(e) => {
            tracing::warn!(error = %e, "perception degraded");
            StageOutcome::degraded(PerceptionReport::default(), e)
        }
    }
}

fn user_prompt(
    persona: &Persona,
    message: &str,
    state: &NarrativeState,
    history: &[HistoryEntry],
) -> String {
    let history_text = history::render(history, &persona.name, None);
    let history_text = if history_text.is_empty() {
        "(the conversation is just starting)".to_string()
    } else {
        history_text
    };

    format!(
        "## Recent conversation\n{history_text}\n\
         ## Current state\n\
         - {axes}\n\
         - Momentum: {momentum}\n\
         - Active threads: {threads}\n\n\
         ## Latest user message\n\"{message}\"\n\n\
         Produce the perception report JSON.",
        axes = describe_axes(state),
        momentum = describe_momentum(state),
        threads = state.threads.len(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_from_sparse_reply() {
        let report: PerceptionReport =
            serde_json::from_value(json!({"user_intent": "greet", "tension_hint": "increase"}))
                .unwrap();

        assert_eq!(report.user_intent, "greet");
        assert_eq!(report.engagement_level, 50);
        assert_eq!(report.tension_hint, TensionHint::Raise);
        assert!(report.key_signals.is_empty());
    }

    #[test]
    fn test_report_tolerates_null_signals() {
        let report: PerceptionReport =
            serde_json::from_value(json!({"user_intent": "ask about the past", "key_signals": null}))
                .unwrap();
        assert_eq!(report.user_intent, "ask about the past");
        assert!(report.key_signals.is_empty());
    }

    #[test]
    fn test_tension_hint_parse() {
        assert_eq!(TensionHint::parse("Raise"), TensionHint::Raise);
        assert_eq!(TensionHint::parse("lower"), TensionHint::Lower);
        assert_eq!(TensionHint::parse("maintain"), TensionHint::Hold);

        let hint: TensionHint = serde_json::from_value(json!(null)).unwrap();
        assert_eq!(hint, TensionHint::Hold);
    }

    #[test]
    fn test_user_prompt_mentions_message_and_state() {
        let state = NarrativeState::new();
        let history = vec![HistoryEntry::user("hi"), HistoryEntry::assistant("hello")];
        let prompt = user_prompt(&Persona::default(), "who are you?", &state, &history);

        assert!(prompt.contains("\"who are you?\""));
        assert!(prompt.contains("Tension: 50"));
        assert!(prompt.contains("Sable: hello"));
        assert!(prompt.contains("Active threads: 0"));
    }
}
