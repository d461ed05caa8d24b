//! Performance: turns the director's plan into the character's reply.

use super::{fill, DirectorPlan, Stage, StageOutcome};
use crate::config::Persona;
use crate::history::{self, HistoryEntry};
use crate::oracle::{NarratorOracle, OracleError};
use crate::state::NarrativeState;
use serde::{Deserialize, Serialize};

/// Technique named when the director did not pick one.
pub const DEFAULT_TECHNIQUE: &str = "natural flow";

/// Reply shown to the user when the performer cannot be reached.
pub const FALLBACK_RESPONSE: &str = "(system error: unable to generate a reply)";

/// The character's reply for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Performance {
    pub response: String,
    pub directive_applied: String,
    pub technique_used: String,
}

/// Generate the in-character reply.
///
/// `state` is the snapshot taken after the director's patch was applied.
pub async fn perform(
    oracle: &dyn NarratorOracle,
    persona: &Persona,
    plan: &DirectorPlan,
    state: &NarrativeState,
    history: &[HistoryEntry],
) -> StageOutcome<Performance> {
    let technique = plan
        .tension_technique
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_TECHNIQUE);

    let system = system_prompt(persona, plan, technique, state);
    let user = user_prompt(persona, history);

    let result = oracle.invoke(&system, &user).await.and_then(|text| {
        let text = text.trim();
        if text.is_empty() {
            Err(OracleError::EmptyReply)
        } else {
            Ok(text.to_string())
        }
    });

    match result {
        Ok(response) => StageOutcome::Ready(Performance {
            response,
            directive_applied: plan.narrative_directive.clone(),
            technique_used: technique.to_string(),
        }),
        Err(e) => {
            tracing::error!(error = %e, "performance failed, returning fallback reply");
            StageOutcome::degraded(
                Performance {
                    response: FALLBACK_RESPONSE.to_string(),
                    directive_applied: plan.narrative_directive.clone(),
                    technique_used: technique.to_string(),
                },
                e,
            )
        }
    }
}

fn system_prompt(persona: &Persona, plan: &DirectorPlan, technique: &str, state: &NarrativeState) -> String {
    let axes = &state.axes;
    let tension = axes.tension.to_string();
    let intimacy = axes.intimacy.to_string();
    let emotion = format!("{} ({})", axes.emotion.label, axes.emotion.intensity);

    fill(
        Stage::Performance.prompt(),
        &[
            ("name", persona.name.as_str()),
            ("persona", persona.persona.as_str()),
            ("speech_style", persona.speech_style.as_str()),
            ("directive", plan.narrative_directive.as_str()),
            ("technique", technique),
            ("tension", tension.as_str()),
            ("intimacy", intimacy.as_str()),
            ("emotion", emotion.as_str()),
        ],
    )
}

fn user_prompt(persona: &Persona, history: &[HistoryEntry]) -> String {
    let text = history::render(history, &persona.name, None);
    let text = if text.is_empty() {
        "(the conversation is starting)\n".to_string()
    } else {
        text
    };
    format!(
        "## Conversation so far\n{text}\nReply to the last user message as {}.",
        persona.name
    )
}
