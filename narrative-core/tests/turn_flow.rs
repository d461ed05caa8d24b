//! End-to-end turn scenarios against a scripted oracle.

use narrative_core::stages::Stage;
use narrative_core::state::{Event, NarrativeState, Pace};
use narrative_core::testing::{
    assert_degraded, assert_fired, assert_pending, assert_ready, assert_turn, ScriptedOracle,
    ScriptedReply, TestHarness,
};
use narrative_core::{EngineConfig, SessionError};
use serde_json::json;

fn fire(id: &str) -> ScriptedReply {
    ScriptedReply::json(json!({
        "should_trigger": true,
        "event_id": id,
        "event_name": "The letter",
        "trigger_reason": "tension is high enough",
        "pending_count": 1
    }))
}

fn state_at_turn(turn: u32, pending: Vec<Event>) -> NarrativeState {
    let mut state = NarrativeState::new();
    state.meta.turn = turn;
    state.event_pool.pending = pending;
    state
}

#[tokio::test]
async fn test_fresh_session_applies_director_patch() {
    let oracle = ScriptedOracle::new().on(
        Stage::Director,
        ScriptedReply::json(json!({
            "narrative_directive": "Lean in, but keep the secret.",
            "tension_technique": "information gap",
            "state_patch": {
                "axes": {"tension": 65},
                "momentum": {"pace": "fast"},
                "threads_add": [{"id": "t1", "name": "trust", "status": "active", "progress": 10}],
                "patch_summary": "rising tension"
            }
        })),
    );
    let harness = TestHarness::with_oracle(oracle, EngineConfig::default()).await;

    let outcome = harness.turn("Why do you keep looking at the door?").await.unwrap();

    assert_eq!(outcome.turn, 1);
    let state = harness.state().await;
    assert_turn(&state, 1);
    assert_eq!(state.axes.tension, 65);
    assert_eq!(state.axes.intimacy, 20);
    assert_eq!(state.momentum.pace, Pace::Fast);
    assert_eq!(state.threads.len(), 1);
    assert_eq!(state.threads[0].id, "t1");
    assert_eq!(state.threads[0].progress, 10);
    assert_eq!(state.meta.last_patch_summary, "rising tension");
    assert_eq!(outcome.debug.performance.value().technique_used, "information gap");
    harness.settle().await;
}

#[tokio::test]
async fn test_pending_event_fires_on_its_turn() {
    let pending = vec![Event::new("neh_001", "The letter").with_window(3, 999)];
    let oracle = ScriptedOracle::new().on(Stage::Trigger, fire("neh_001"));
    let harness =
        TestHarness::from_state(oracle, EngineConfig::default(), state_at_turn(5, pending)).await;

    let outcome = harness.turn("Open it.").await.unwrap();

    let state = harness.state().await;
    assert_pending(&state, &[]);
    assert_fired(&state, "neh_001", 5);
    assert_turn(&state, 6);
    assert_eq!(outcome.debug.fired.as_ref().map(|e| e.id.as_str()), Some("neh_001"));

    // The director saw the event after it fired.
    let prompt = harness.oracle.last_prompt(Stage::Director).unwrap();
    assert!(prompt.contains("Event fired this turn: The letter"));
    harness.settle().await;
}

#[tokio::test]
async fn test_perception_timeout_still_replies() {
    let oracle = ScriptedOracle::new().on(Stage::Perception, ScriptedReply::Timeout);
    let harness = TestHarness::with_oracle(oracle, EngineConfig::default()).await;

    let outcome = harness.turn("hello?").await.unwrap();

    assert!(!outcome.response.is_empty());
    assert_degraded(&outcome.debug.perception);
    assert_ready(&outcome.debug.director);
    assert_ready(&outcome.debug.performance);

    let json = serde_json::to_value(&outcome.debug).unwrap();
    assert_eq!(json["perception"]["status"], "degraded");
    assert!(json["perception"]["error"].as_str().unwrap().contains("timed out"));
    assert_eq!(json["director"]["status"], "ready");
    assert_eq!(json["performance"]["status"], "ready");
    harness.settle().await;
}

#[tokio::test]
async fn test_empty_pool_skips_trigger_oracle() {
    let harness = TestHarness::new().await;

    let outcome = harness.turn("hi").await.unwrap();

    assert_eq!(harness.oracle.calls_for(Stage::Trigger), 0);
    let decision = outcome.debug.trigger.value();
    assert!(!decision.should_trigger);
    assert_eq!(decision.pending_count, 0);
    assert_eq!(decision.trigger_reason, "event pool is empty");
    harness.settle().await;
}

#[tokio::test]
async fn test_trigger_failure_never_fires() {
    let pending = vec![Event::new("neh_001", "The letter")];
    let oracle = ScriptedOracle::new().on(Stage::Trigger, ScriptedReply::fail("connection reset"));
    let harness =
        TestHarness::from_state(oracle, EngineConfig::default(), state_at_turn(2, pending)).await;

    let outcome = harness.turn("hi").await.unwrap();

    assert_degraded(&outcome.debug.trigger);
    assert!(outcome.debug.fired.is_none());
    assert_pending(&harness.state().await, &["neh_001"]);
}

#[tokio::test]
async fn test_trigger_cannot_fire_unknown_event() {
    let pending = vec![Event::new("neh_001", "The letter")];
    let oracle = ScriptedOracle::new().on(Stage::Trigger, fire("neh_404"));
    let harness =
        TestHarness::from_state(oracle, EngineConfig::default(), state_at_turn(2, pending)).await;

    let outcome = harness.turn("hi").await.unwrap();

    assert!(!outcome.debug.trigger.value().should_trigger);
    assert!(outcome.debug.fired.is_none());
    let state = harness.state().await;
    assert_pending(&state, &["neh_001"]);
    assert!(state.event_pool.triggered.is_empty());
}

#[tokio::test]
async fn test_director_failure_only_advances_turn() {
    let oracle = ScriptedOracle::new().on(Stage::Director, ScriptedReply::text("no json here"));
    let harness = TestHarness::with_oracle(oracle, EngineConfig::default()).await;
    let before = harness.state().await;

    let outcome = harness.turn("hi").await.unwrap();

    assert_degraded(&outcome.debug.director);
    assert!(outcome.debug.director.value().state_patch.is_empty());
    let after = harness.state().await;
    assert_turn(&after, 1);
    assert_eq!(after.axes, before.axes);
    assert_eq!(after.momentum, before.momentum);
    assert!(after.threads.is_empty());
    assert_eq!(
        outcome.debug.performance.value().directive_applied,
        "Respond naturally to the user."
    );
    harness.settle().await;
}

#[tokio::test]
async fn test_null_axes_leave_state_unchanged() {
    let oracle = ScriptedOracle::new().on(
        Stage::Director,
        ScriptedReply::json(json!({
            "narrative_directive": "Soften.",
            "state_patch": {
                "axes": {"tension": null, "intimacy": 35, "emotion": {"intensity": 80}},
                "momentum": {"pace": null, "direction": "de-escalating"}
            }
        })),
    );
    let harness = TestHarness::with_oracle(oracle, EngineConfig::default()).await;

    harness.turn("I'm sorry.").await.unwrap();

    let state = harness.state().await;
    assert_eq!(state.axes.tension, 50);
    assert_eq!(state.axes.intimacy, 35);
    assert_eq!(state.axes.emotion.label, "calm");
    assert_eq!(state.axes.emotion.intensity, 80);
    assert_eq!(state.momentum.pace, Pace::Medium);
    assert_eq!(state.momentum.direction.name(), "de-escalating");
    harness.settle().await;
}

#[tokio::test]
async fn test_odd_patch_fields_keep_the_rest_of_the_plan() {
    let oracle = ScriptedOracle::new()
        .on(
            Stage::Director,
            ScriptedReply::json(json!({
                "narrative_directive": "Hold the gaze.",
                "state_patch": {"axes": {"tension": 65, "energy": 70.5}}
            })),
        )
        .on(
            Stage::Director,
            ScriptedReply::json(json!({
                "narrative_directive": "Let it build.",
                "state_patch": {"axes": {"tension": 70}, "momentum": {"pace": "Fast"}}
            })),
        )
        .on(
            Stage::Director,
            ScriptedReply::json(json!({
                "narrative_directive": "Name the thing between you.",
                "state_patch": {
                    "axes": {"intimacy": 45.0},
                    "threads_add": [{"name": "trust"}, {"id": "t1", "name": "debt"}]
                }
            })),
        );
    let harness = TestHarness::with_oracle(oracle, EngineConfig::default()).await;

    let first = harness.turn("You're quiet tonight.").await.unwrap();
    assert_ready(&first.debug.director);
    assert_eq!(first.debug.performance.value().directive_applied, "Hold the gaze.");
    assert_eq!(first.state.axes.tension, 65);
    assert_eq!(first.state.axes.energy, NarrativeState::new().axes.energy);

    let second = harness.turn("Say something.").await.unwrap();
    assert_ready(&second.debug.director);
    assert_eq!(second.state.axes.tension, 70);
    assert_eq!(second.state.momentum.pace, Pace::Fast);

    let third = harness.turn("What do I owe you?").await.unwrap();
    assert_ready(&third.debug.director);
    assert_eq!(third.state.axes.intimacy, 45);
    assert_eq!(third.state.threads.len(), 1);
    assert_eq!(third.state.threads[0].id, "t1");
    harness.settle().await;
}

#[tokio::test]
async fn test_performance_failure_returns_fallback_reply() {
    let oracle = ScriptedOracle::new().on(Stage::Performance, ScriptedReply::fail("overloaded"));
    let harness = TestHarness::with_oracle(oracle, EngineConfig::default()).await;

    let outcome = harness.turn("hi").await.unwrap();

    assert_eq!(outcome.response, "(system error: unable to generate a reply)");
    let session = harness.session().await.unwrap();
    let history = session.history().await;
    assert_eq!(history[1].content, outcome.response);
    harness.settle().await;
}

#[tokio::test]
async fn test_performer_sees_current_message() {
    let harness = TestHarness::new().await;

    harness.turn("Where does the staircase lead?").await.unwrap();

    let prompt = harness.oracle.last_prompt(Stage::Performance).unwrap();
    assert!(prompt.contains("User: Where does the staircase lead?"));
    harness.settle().await;
}

#[tokio::test]
async fn test_fired_event_is_not_predicted_again() {
    let pending = vec![Event::new("neh_001", "The letter")];
    let oracle = ScriptedOracle::new().on(Stage::Trigger, fire("neh_001")).on(
        Stage::Predictor,
        ScriptedReply::json(json!({"events": [
            {"id": "neh_001", "name": "The letter again"},
            {"id": "neh_002", "name": "The flood", "trigger_turn_min": 8, "priority": 3}
        ]})),
    );
    let harness =
        TestHarness::from_state(oracle, EngineConfig::default(), state_at_turn(5, pending)).await;

    let outcome = harness.turn("Read it aloud.").await.unwrap();
    harness.settle().await;

    assert_eq!(outcome.debug.prediction, narrative_core::PredictionStatus::Scheduled);
    let state = harness.state().await;
    assert_pending(&state, &["neh_002"]);
    assert_fired(&state, "neh_001", 5);
}

#[tokio::test]
async fn test_whitespace_message_is_rejected() {
    let harness = TestHarness::new().await;

    let result = harness.turn("  \t ").await;

    assert!(matches!(result, Err(SessionError::EmptyMessage)));
    assert_turn(&harness.state().await, 0);
    assert!(harness.oracle.calls().is_empty());
}
