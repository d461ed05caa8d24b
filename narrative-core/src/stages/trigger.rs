//! Trigger check: decides whether a pending macro event fires this turn.
//! Read-only; the orchestrator performs the actual firing.

use super::{describe_axes, from_reply, PerceptionReport, Stage, StageOutcome};
use crate::oracle::NarratorOracle;
use crate::state::{null_as_default, Event, NarrativeState};
use serde::{Deserialize, Serialize};

/// Whether to fire an event, and which.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDecision {
    #[serde(default)]
    pub should_trigger: bool,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub trigger_reason: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pending_count: usize,
}

impl TriggerDecision {
    /// A decision not to fire.
    pub fn hold(reason: impl Into<String>, pending_count: usize) -> Self {
        Self {
            should_trigger: false,
            event_id: None,
            event_name: None,
            trigger_reason: reason.into(),
            pending_count,
        }
    }

    /// The event id to fire, if the decision is to fire.
    pub fn target(&self) -> Option<&str> {
        if self.should_trigger {
            self.event_id.as_deref()
        } else {
            None
        }
    }
}

/// Decide whether a pending event should fire on this turn.
///
/// An empty pool short-circuits without consulting the oracle. On oracle
/// failure the decision defaults to not firing.
pub async fn check(
    oracle: &dyn NarratorOracle,
    state: &NarrativeState,
    turn: u32,
    perception: Option<&PerceptionReport>,
) -> StageOutcome<TriggerDecision> {
    let pending = &state.event_pool.pending;
    if pending.is_empty() {
        return StageOutcome::Ready(TriggerDecision::hold("event pool is empty", 0));
    }

    let prompt = user_prompt(state, turn, perception);
    let result = oracle
        .invoke_json(Stage::Trigger.prompt(), &prompt)
        .await
        .and_then(from_reply::<TriggerDecision>);

    match result {
        Ok(decision) => StageOutcome::Ready(constrain(decision, pending)),
        Err(e) => {
            tracing::warn!(error = %e, "trigger check degraded");
            StageOutcome::degraded(
                TriggerDecision::hold("trigger check unavailable", pending.len()),
                e,
            )
        }
    }
}

/// Restrict a decision to events that are actually pending.
fn constrain(mut decision: TriggerDecision, pending: &[Event]) -> TriggerDecision {
    decision.pending_count = pending.len();

    if !decision.should_trigger {
        decision.event_id = None;
        decision.event_name = None;
        return decision;
    }

    let chosen = match decision.event_id.as_deref() {
        Some(id) => pending.iter().find(|e| e.id == id),
        None => decision
            .event_name
            .as_deref()
            .and_then(|name| pending.iter().find(|e| e.name == name)),
    };

    match chosen {
        Some(event) => {
            decision.event_id = Some(event.id.clone());
            decision.event_name = Some(event.name.clone());
        }
        None => {
            tracing::warn!(
                event_id = ?decision.event_id,
                "trigger chose an event that is not pending"
            );
            decision.trigger_reason = format!(
                "{} (chosen event is not pending; holding)",
                decision.trigger_reason
            );
            decision.should_trigger = false;
            decision.event_id = None;
            decision.event_name = None;
        }
    }
    decision
}

fn user_prompt(state: &NarrativeState, turn: u32, perception: Option<&PerceptionReport>) -> String {
    let next = turn + 1;
    let events: Vec<String> = state
        .event_pool
        .pending
        .iter()
        .map(|e| {
            format!(
                "- [{}] {} (priority {}, turns {}-{}, {}, condition: {})",
                e.id,
                e.name,
                e.priority,
                e.trigger_turn_min,
                e.trigger_turn_max,
                if e.in_window(next) { "in window" } else { "outside window" },
                e.trigger_condition
            )
        })
        .collect();

    let engagement = perception.map_or(50, |p| p.engagement_level);
    let opportunity = perception.map_or("", |p| p.narrative_opportunity.as_str());

    format!(
        "## Upcoming turn\nTurn {next}\n\n\
         ## State\n{axes}\n\n\
         ## User engagement\n{engagement}\n\n\
         ## Narrative opportunity this turn\n{opportunity}\n\n\
         ## Pending events\n{events}\n\n\
         Is now the best moment to fire one of these events?",
        axes = describe_axes(state),
        events = events.join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Vec<Event> {
        vec![
            Event::new("neh_001", "The letter").with_window(3, 8),
            Event::new("neh_002", "Flood").with_priority(4),
        ]
    }

    #[test]
    fn test_constrain_keeps_valid_choice() {
        let decision = TriggerDecision {
            should_trigger: true,
            event_id: Some("neh_001".to_string()),
            event_name: None,
            trigger_reason: "fits".to_string(),
            pending_count: 0,
        };
        let decision = constrain(decision, &pending());

        assert_eq!(decision.target(), Some("neh_001"));
        assert_eq!(decision.event_name.as_deref(), Some("The letter"));
        assert_eq!(decision.pending_count, 2);
    }

    #[test]
    fn test_constrain_resolves_by_name() {
        let decision = TriggerDecision {
            should_trigger: true,
            event_name: Some("Flood".to_string()),
            ..Default::default()
        };
        assert_eq!(constrain(decision, &pending()).target(), Some("neh_002"));
    }

    #[test]
    fn test_constrain_rejects_unknown_event() {
        let decision = TriggerDecision {
            should_trigger: true,
            event_id: Some("made_up".to_string()),
            ..Default::default()
        };
        let decision = constrain(decision, &pending());

        assert!(!decision.should_trigger);
        assert!(decision.target().is_none());
    }

    #[test]
    fn test_hold_has_no_target() {
        let mut decision = TriggerDecision::hold("not yet", 3);
        decision.event_id = Some("neh_001".to_string());
        assert!(decision.target().is_none());
    }

    #[test]
    fn test_prompt_lists_pending_events() {
        let mut state = NarrativeState::new();
        state.event_pool.pending = pending();
        let prompt = user_prompt(&state, 4, None);

        assert!(prompt.contains("Turn 5"));
        assert!(prompt.contains("[neh_001] The letter (priority 1, turns 3-8, in window"));
        assert!(prompt.contains("[neh_002] Flood (priority 4, turns 0-999, in window"));

        let late = user_prompt(&state, 8, None);
        assert!(late.contains("turns 3-8, outside window"));
        assert!(prompt.contains("## User engagement\n50"));
    }

    #[test]
    fn test_decision_tolerates_nulls() {
        let decision: TriggerDecision = serde_json::from_value(serde_json::json!({
            "should_trigger": false,
            "trigger_reason": null,
            "pending_count": null
        }))
        .unwrap();

        assert!(!decision.should_trigger);
        assert_eq!(decision.trigger_reason, "");
        assert_eq!(decision.pending_count, 0);
    }

    #[tokio::test]
    async fn test_check_empty_pool_skips_oracle() {
        use crate::testing::ScriptedOracle;

        let oracle = ScriptedOracle::new();
        let outcome = check(&oracle, &NarrativeState::new(), 0, None).await;

        assert!(!outcome.is_degraded());
        assert_eq!(outcome.value().trigger_reason, "event pool is empty");
        assert!(oracle.calls().is_empty());
    }

    #[tokio::test]
    async fn test_check_failure_holds() {
        use crate::testing::{ScriptedOracle, ScriptedReply};

        let oracle = ScriptedOracle::new().on(Stage::Trigger, ScriptedReply::Timeout);
        let mut state = NarrativeState::new();
        state.event_pool.pending = pending();

        let outcome = check(&oracle, &state, 4, None).await;

        assert!(outcome.is_degraded());
        assert!(outcome.value().target().is_none());
        assert_eq!(outcome.value().pending_count, 2);
    }
}
