//! Director: the only producer of state patches.
//!
//! Consumes both analysis reports and a snapshot taken after any event
//! firing for this turn, and decides the turn's directive, technique and
//! state patch.

use super::{
    describe_axes, describe_momentum, PerceptionReport, Stage, StageOutcome, TriggerDecision,
};
use crate::config::Persona;
use crate::history::{self, HistoryEntry};
use crate::oracle::NarratorOracle;
use crate::state::{Event, NarrativeState, Patch};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Directive used when the director cannot be consulted.
pub const FALLBACK_DIRECTIVE: &str = "Respond naturally to the user.";

/// Which thread to push this turn, and how.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadAction {
    #[serde(default)]
    pub focus: String,
    #[serde(default)]
    pub action: String,
}

/// The director's decisions for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectorPlan {
    #[serde(default = "fallback_directive")]
    pub narrative_directive: String,
    #[serde(default)]
    pub tension_technique: Option<String>,
    #[serde(default)]
    pub thread_action: Option<ThreadAction>,
    #[serde(default)]
    pub state_patch: Patch,
    #[serde(default)]
    pub trigger_recommendation: Option<String>,
    #[serde(default)]
    pub director_note: Option<String>,
}

fn fallback_directive() -> String {
    FALLBACK_DIRECTIVE.to_string()
}

impl DirectorPlan {
    /// Generic directive, no technique, empty patch.
    pub fn fallback() -> Self {
        Self {
            narrative_directive: fallback_directive(),
            tension_technique: None,
            thread_action: None,
            state_patch: Patch::default(),
            trigger_recommendation: None,
            director_note: None,
        }
    }

    /// Build a plan from the director's JSON reply.
    ///
    /// Every field is read on its own, so one odd value costs only that
    /// value. Explicit nulls in the patch are pruned.
    pub fn from_reply(mut reply: Map<String, Value>) -> Self {
        let mut state_patch = reply
            .remove("state_patch")
            .map(Patch::from_reply)
            .unwrap_or_default();
        state_patch.prune_nulls();

        let thread_action = match reply.remove("thread_action") {
            None | Some(Value::Null) => None,
            Some(raw) => serde_json::from_value(raw)
                .map_err(|e| tracing::warn!(error = %e, "ignoring malformed thread_action"))
                .ok(),
        };

        Self {
            narrative_directive: text(&mut reply, "narrative_directive")
                .unwrap_or_else(fallback_directive),
            tension_technique: text(&mut reply, "tension_technique"),
            thread_action,
            state_patch,
            trigger_recommendation: text(&mut reply, "trigger_recommendation"),
            director_note: text(&mut reply, "director_note"),
        }
    }
}

/// A non-blank string field; anything else reads as missing.
fn text(reply: &mut Map<String, Value>, key: &str) -> Option<String> {
    match reply.remove(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::String(_) | Value::Null => None,
        other => {
            tracing::warn!(field = key, got = %other, "expected a string, ignoring it");
            None
        }
    }
}

/// Everything the director reads.
pub struct DirectorInput<'a> {
    pub perception: &'a StageOutcome<PerceptionReport>,
    pub trigger: &'a StageOutcome<TriggerDecision>,
    /// The event fired this turn, if any.
    pub fired: Option<&'a Event>,
    /// Snapshot taken after firing.
    pub state: &'a NarrativeState,
    pub history: &'a [HistoryEntry],
}

/// Decide this turn's direction.
///
/// The returned patch never carries explicit nulls in `axes` or `momentum`.
/// Only an oracle failure degrades the stage; a reply with a few unusable
/// fields still yields a ready plan built from the rest.
pub async fn direct(
    oracle: &dyn NarratorOracle,
    persona: &Persona,
    input: DirectorInput<'_>,
) -> StageOutcome<DirectorPlan> {
    let prompt = user_prompt(persona, &input);
    match oracle.invoke_json(Stage::Director.prompt(), &prompt).await {
        Ok(reply) => StageOutcome::Ready(DirectorPlan::from_reply(reply)),
        Err(e) => {
            tracing::warn!(error = %e, "director degraded, using empty patch");
            StageOutcome::degraded(DirectorPlan::fallback(), e)
        }
    }
}

fn user_prompt(persona: &Persona, input: &DirectorInput<'_>) -> String {
    let state = input.state;
    let perception = input.perception.value();
    let trigger = input.trigger.value();

    let perception_text = if input.perception.is_degraded() {
        "(perception unavailable this turn)".to_string()
    } else {
        format!(
            "- User intent: {}\n\
             - Tone: {}  Engagement: {}\n\
             - Key signals: {}\n\
             - Opportunity: {}\n\
             - Tension hint: {:?}",
            perception.user_intent,
            perception.emotional_tone,
            perception.engagement_level,
            perception.key_signals.join(", "),
            perception.narrative_opportunity,
            perception.tension_hint,
        )
    };

    let threads_text = if state.threads.is_empty() {
        "  (no active threads)".to_string()
    } else {
        state
            .threads
            .iter()
            .map(|t| format!("  - [{}] {} ({}) {}%", t.status, t.name, t.id, t.progress))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let event_text = match input.fired {
        Some(event) => format!(
            "Event fired this turn: {} - {} (impact: {})",
            event.name, event.description, event.narrative_impact
        ),
        None if trigger.should_trigger => format!(
            "Trigger suggested an event that did not fire: {}",
            trigger.event_name.as_deref().unwrap_or("unknown")
        ),
        None => format!("Pending events: {}", state.event_pool.pending.len()),
    };

    let history_text = history::render(input.history, &persona.name, None);

    format!(
        "## Character\n{name}\n{persona_text}\n\n\
         ## Perception report\n{perception_text}\n\n\
         ## Axes\n- {axes}\n- Drive: {drive}  Energy: {energy}\n\
         - Revealed: {revealed:?}  Hidden: {hidden:?}\n\
         - Momentum: {momentum}\n\n\
         ## Threads\n{threads_text}\n\n\
         ## Macro events\n{event_text}\n\n\
         ## Recent conversation\n{history_text}\n\
         ## Turn\nThis is turn {next}.\n\n\
         Decide this turn's narrative strategy and reply with the director JSON.",
        name = persona.name,
        persona_text = persona.persona,
        axes = describe_axes(state),
        drive = state.axes.drive,
        energy = state.axes.energy,
        revealed = state.axes.info_veil.revealed,
        hidden = state.axes.info_veil.hidden,
        momentum = describe_momentum(state),
        history_text = if history_text.is_empty() {
            "(none yet)\n".to_string()
        } else {
            history_text
        },
        next = state.meta.turn + 1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Pace, PatchField};
    use serde_json::json;

    fn plan(reply: Value) -> DirectorPlan {
        match reply {
            Value::Object(map) => DirectorPlan::from_reply(map),
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_plan_from_reply() {
        let plan = plan(json!({
            "narrative_directive": "Hint at the locket",
            "tension_technique": "information gap",
            "thread_action": {"focus": "trust", "action": "advance"},
            "state_patch": {
                "axes": {"tension": 65, "intimacy": null},
                "momentum": {"pace": "fast", "direction": null},
                "threads_add": [{"id": "t1", "name": "trust", "status": "active", "progress": 10}],
                "patch_summary": "rising tension"
            }
        }));

        assert_eq!(plan.narrative_directive, "Hint at the locket");
        assert_eq!(plan.tension_technique.as_deref(), Some("information gap"));
        assert_eq!(plan.thread_action.as_ref().map(|a| a.action.as_str()), Some("advance"));
        assert_eq!(plan.state_patch.axes.tension, PatchField::Value(65));
        assert!(plan.state_patch.axes.intimacy.is_absent());
        assert!(plan.state_patch.momentum.direction.is_absent());
        assert_eq!(plan.state_patch.momentum.pace, PatchField::Value(Pace::Fast));
        assert_eq!(plan.state_patch.threads_add[0].id, "t1");
    }

    #[test]
    fn test_plan_defaults() {
        let plan = plan(json!({}));
        assert_eq!(plan.narrative_directive, FALLBACK_DIRECTIVE);
        assert!(plan.state_patch.is_empty());
    }

    #[test]
    fn test_plan_survives_odd_patch_values() {
        let replies = [
            json!({"axes": {"tension": 65, "energy": 70.5}}),
            json!({"axes": {"tension": 65}, "momentum": {"pace": "Fast"}}),
            json!({"axes": {"tension": 65}, "threads_add": [{"name": "trust"}]}),
        ];
        for patch in replies {
            let plan = plan(json!({
                "narrative_directive": "Let the silence sit",
                "tension_technique": 7,
                "thread_action": "advance",
                "state_patch": patch
            }));

            assert_eq!(plan.narrative_directive, "Let the silence sit");
            assert_eq!(plan.tension_technique, None);
            assert_eq!(plan.thread_action, None);
            assert_eq!(plan.state_patch.axes.tension, PatchField::Value(65));
            assert!(plan.state_patch.threads_add.is_empty());
        }
    }

    #[tokio::test]
    async fn test_direct_stays_ready_on_odd_field() {
        use crate::testing::{ScriptedOracle, ScriptedReply};

        let oracle = ScriptedOracle::new().on(
            Stage::Director,
            ScriptedReply::json(json!({
                "narrative_directive": "Press on the letter",
                "state_patch": {"axes": {"tension": 65}, "momentum": {"pace": "Fast"}}
            })),
        );
        let state = NarrativeState::new();
        let perception = StageOutcome::Ready(PerceptionReport::default());
        let trigger = StageOutcome::Ready(TriggerDecision::default());
        let input = DirectorInput {
            perception: &perception,
            trigger: &trigger,
            fired: None,
            state: &state,
            history: &[],
        };

        let outcome = direct(&oracle, &Persona::default(), input).await;

        assert!(!outcome.is_degraded());
        assert_eq!(outcome.value().narrative_directive, "Press on the letter");
        assert_eq!(outcome.value().state_patch.momentum.pace, PatchField::Value(Pace::Fast));
    }

    #[test]
    fn test_fallback_is_empty() {
        let plan = DirectorPlan::fallback();
        assert!(plan.tension_technique.is_none());
        assert!(plan.state_patch.is_empty());
        assert!(plan.state_patch.patch_summary.is_empty());
    }

    #[test]
    fn test_prompt_marks_degraded_perception() {
        let state = NarrativeState::new();
        let perception = StageOutcome::degraded(PerceptionReport::default(), "timeout");
        let trigger = StageOutcome::Ready(TriggerDecision::hold("empty", 0));
        let input = DirectorInput {
            perception: &perception,
            trigger: &trigger,
            fired: None,
            state: &state,
            history: &[],
        };
        let prompt = user_prompt(&Persona::default(), &input);

        assert!(prompt.contains("perception unavailable"));
        assert!(prompt.contains("This is turn 1."));
        assert!(prompt.contains("Pending events: 0"));
    }

    #[test]
    fn test_prompt_names_fired_event() {
        let state = NarrativeState::new();
        let perception = StageOutcome::Ready(PerceptionReport::default());
        let trigger = StageOutcome::Ready(TriggerDecision::default());
        let mut event = Event::new("neh_001", "The letter");
        event.narrative_impact = "the past returns".to_string();
        let input = DirectorInput {
            perception: &perception,
            trigger: &trigger,
            fired: Some(&event),
            state: &state,
            history: &[],
        };
        let prompt = user_prompt(&Persona::default(), &input);

        assert!(prompt.contains("Event fired this turn: The letter"));
        assert!(prompt.contains("the past returns"));
    }
}
