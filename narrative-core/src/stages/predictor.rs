//! Event predictor: proposes new macro events for the pending pool.
//!
//! Runs in the background every few turns. It returns candidates only; the
//! caller merges them into the store, which drops duplicates.

use super::Stage;
use crate::config::Persona;
use crate::history::{self, HistoryEntry};
use crate::oracle::{NarratorOracle, OracleError};
use crate::state::{Event, NarrativeState};
use serde_json::Value;

/// Characters of each history line shown to the predictor.
const HISTORY_LINE_CHARS: usize = 60;

/// Ask the oracle for candidate events.
///
/// Elements that do not describe an event are skipped with a warning. A
/// reply without an `events` array is an error.
pub async fn predict(
    oracle: &dyn NarratorOracle,
    persona: &Persona,
    state: &NarrativeState,
    history: &[HistoryEntry],
) -> Result<Vec<Event>, OracleError> {
    let prompt = user_prompt(persona, state, history);
    let mut reply = oracle.invoke_json(Stage::Predictor.prompt(), &prompt).await?;

    let items = match reply.remove("events") {
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(OracleError::Shape(format!(
                "`events` should be an array, got {other}"
            )))
        }
        None => return Err(OracleError::Shape("missing `events` array".to_string())),
    };

    Ok(candidates(items))
}

fn candidates(items: Vec<Value>) -> Vec<Event> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Event>(item) {
            Ok(mut event) if !event.id.trim().is_empty() => {
                event.fired_at_turn = None;
                Some(event)
            }
            Ok(_) => {
                tracing::warn!("predicted event has an empty id, skipping");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed predicted event, skipping");
                None
            }
        })
        .collect()
}

fn user_prompt(persona: &Persona, state: &NarrativeState, history: &[HistoryEntry]) -> String {
    let axes = &state.axes;
    let threads: Vec<String> = state
        .threads
        .iter()
        .map(|t| format!("{} ({}%)", t.name, t.progress))
        .collect();
    let known: Vec<&str> = state
        .event_pool
        .pending
        .iter()
        .chain(&state.event_pool.triggered)
        .map(|e| e.id.as_str())
        .collect();

    format!(
        "## Character\n{name}: {persona_text}\n\n\
         ## Current state (turn {turn})\n\
         - Tension: {tension}  Intimacy: {intimacy}\n\
         - Emotion: {emotion}  Drive: {drive}\n\
         - Hidden information: {hidden}\n\
         - Threads: {threads}\n\
         - Known event ids (do not reuse): {known}\n\n\
         ## Recent conversation\n{history_text}\n\
         Predict the next macro events.",
        name = persona.name,
        persona_text = persona.persona,
        turn = state.meta.turn,
        tension = axes.tension,
        intimacy = axes.intimacy,
        emotion = axes.emotion.label,
        drive = axes.drive,
        hidden = axes.info_veil.hidden.join(", "),
        threads = if threads.is_empty() { "none".to_string() } else { threads.join(", ") },
        known = if known.is_empty() { "none".to_string() } else { known.join(", ") },
        history_text = history::render(history, &persona.name, Some(HISTORY_LINE_CHARS)),
    )
}
