//! Testing utilities for the narrative engine.
//!
//! This module provides tools for deterministic tests:
//! - `ScriptedOracle`, a [`NarratorOracle`] that answers from per-stage queues
//! - `TestHarness` for driving a session through scripted turns
//! - Assertion helpers for verifying narrative state

use crate::config::EngineConfig;
use crate::oracle::{NarratorOracle, OracleError};
use crate::orchestrator::TurnOutcome;
use crate::session::{Session, SessionError, SessionId, SessionRegistry};
use crate::stages::{Stage, StageOutcome};
use crate::state::{Event, NarrativeState};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Reply text of the default scripted performance.
pub const DEFAULT_PERFORMANCE: &str = "She looks up from the ledger. \"You're late.\"";

/// A scripted oracle reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Raw text, returned as is.
    Text(String),
    /// A JSON value, returned serialized.
    Json(Value),
    /// A transport failure.
    Fail(String),
    /// A call that ran past its deadline.
    Timeout,
    /// Wait, then answer with the inner reply.
    Delay(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }

    pub fn json(value: Value) -> Self {
        ScriptedReply::Json(value)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        ScriptedReply::Fail(message.into())
    }

    /// Delay this reply by `delay`.
    pub fn after(self, delay: Duration) -> Self {
        ScriptedReply::Delay(delay, Box::new(self))
    }
}

/// One recorded oracle call.
#[derive(Debug, Clone)]
pub struct OracleCall {
    /// `None` when the system prompt matched no stage header.
    pub stage: Option<Stage>,
    pub system: String,
    pub user: String,
}

/// An oracle that answers from scripted per-stage queues.
///
/// Stages with an empty queue get a well-formed default reply, so a test
/// only scripts the stages it cares about.
#[derive(Default)]
pub struct ScriptedOracle {
    queues: Mutex<HashMap<Stage, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<OracleCall>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `stage` (builder form).
    pub fn on(self, stage: Stage, reply: ScriptedReply) -> Self {
        self.push(stage, reply);
        self
    }

    /// Queue a reply for `stage`.
    pub fn push(&self, stage: Stage, reply: ScriptedReply) {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(stage).or_default().push_back(reply);
        }
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<OracleCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// How many times `stage` reached the oracle.
    pub fn calls_for(&self, stage: Stage) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.stage == Some(stage))
            .count()
    }

    /// The user prompt of the most recent call for `stage`.
    pub fn last_prompt(&self, stage: Stage) -> Option<String> {
        self.calls()
            .into_iter()
            .rev()
            .find(|c| c.stage == Some(stage))
            .map(|c| c.user)
    }

    /// The well-formed reply a stage gets when nothing is queued.
    pub fn default_reply(stage: Stage) -> ScriptedReply {
        match stage {
            Stage::Perception => ScriptedReply::Json(json!({
                "user_intent": "make conversation",
                "emotional_tone": "curious",
                "engagement_level": 60,
                "key_signals": ["greeting"],
                "narrative_opportunity": "let the character notice something small",
                "tension_hint": "hold",
                "follow_type": "following"
            })),
            Stage::Trigger => ScriptedReply::Json(json!({
                "should_trigger": false,
                "event_id": null,
                "event_name": null,
                "trigger_reason": "no event fits yet",
                "pending_count": 0
            })),
            Stage::Director => ScriptedReply::Json(json!({
                "narrative_directive": "Answer briefly and leave one detail unexplained.",
                "tension_technique": "information gap",
                "state_patch": {"patch_summary": "steady"}
            })),
            Stage::Performance => ScriptedReply::text(DEFAULT_PERFORMANCE),
            Stage::Predictor => ScriptedReply::Json(json!({"events": []})),
        }
    }

    fn next_reply(&self, stage: Stage) -> ScriptedReply {
        self.queues
            .lock()
            .ok()
            .and_then(|mut queues| queues.get_mut(&stage).and_then(VecDeque::pop_front))
            .unwrap_or_else(|| Self::default_reply(stage))
    }
}

#[async_trait]
impl NarratorOracle for ScriptedOracle {
    async fn invoke(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let stage = Stage::detect(system);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(OracleCall {
                stage,
                system: system.to_string(),
                user: user.to_string(),
            });
        }

        let Some(stage) = stage else {
            return Err(OracleError::Api(claude::Error::Config(
                "scripted oracle received an unrecognised prompt".to_string(),
            )));
        };

        let mut reply = self.next_reply(stage);
        loop {
            match reply {
                ScriptedReply::Text(text) => return Ok(text),
                ScriptedReply::Json(value) => return Ok(value.to_string()),
                ScriptedReply::Fail(message) => {
                    return Err(OracleError::Api(claude::Error::Network(message)))
                }
                ScriptedReply::Timeout => return Err(OracleError::Timeout(Duration::from_secs(60))),
                ScriptedReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

/// Test harness for running one session through scripted turns.
pub struct TestHarness {
    pub oracle: Arc<ScriptedOracle>,
    pub registry: SessionRegistry,
    pub session_id: SessionId,
}

impl TestHarness {
    /// A fresh session with default configuration.
    pub async fn new() -> Self {
        Self::with_oracle(ScriptedOracle::new(), EngineConfig::default()).await
    }

    /// A fresh session answered by `oracle`.
    pub async fn with_oracle(oracle: ScriptedOracle, config: EngineConfig) -> Self {
        let oracle = Arc::new(oracle);
        let registry = SessionRegistry::new(oracle.clone(), config);
        let (session_id, _) = registry.create().await;
        Self {
            oracle,
            registry,
            session_id,
        }
    }

    /// A session that starts from `state` instead of the default.
    pub async fn from_state(oracle: ScriptedOracle, config: EngineConfig, state: NarrativeState) -> Self {
        let oracle = Arc::new(oracle);
        let registry = SessionRegistry::new(oracle.clone(), config);
        let session_id = registry.create_from(state).await;
        Self {
            oracle,
            registry,
            session_id,
        }
    }

    /// Queue a reply for `stage`.
    pub fn expect(&self, stage: Stage, reply: ScriptedReply) -> &Self {
        self.oracle.push(stage, reply);
        self
    }

    /// Submit one user message.
    pub async fn turn(&self, message: &str) -> Result<TurnOutcome, SessionError> {
        self.registry.submit_turn(&self.session_id, message).await
    }

    pub async fn session(&self) -> Option<Arc<Session>> {
        self.registry.get(&self.session_id).await
    }

    /// Current state of the session; the default state once it is gone.
    pub async fn state(&self) -> NarrativeState {
        self.registry
            .snapshot(&self.session_id)
            .await
            .unwrap_or_default()
    }

    /// Put events straight into the pending pool.
    pub async fn seed_events(&self, events: Vec<Event>) -> usize {
        match self.session().await {
            Some(session) => session.store().merge_events(events).await,
            None => 0,
        }
    }

    /// Wait for background predictions to finish.
    pub async fn settle(&self) {
        if let Some(session) = self.session().await {
            session.settle_predictions().await;
        }
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the session clock reads `turn`.
#[track_caller]
pub fn assert_turn(state: &NarrativeState, turn: u32) {
    assert_eq!(
        state.meta.turn, turn,
        "Expected turn {turn}, got {}",
        state.meta.turn
    );
}

/// Assert the pending pool holds exactly `ids`, in order.
#[track_caller]
pub fn assert_pending(state: &NarrativeState, ids: &[&str]) {
    let actual: Vec<&str> = state.event_pool.pending.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(actual, ids, "Unexpected pending events");
}

/// Assert `id` fired on `turn`.
#[track_caller]
pub fn assert_fired(state: &NarrativeState, id: &str, turn: u32) {
    let event = state
        .event_pool
        .triggered
        .iter()
        .find(|e| e.id == id)
        .unwrap_or_else(|| panic!("Expected event '{id}' to have fired"));
    assert_eq!(
        event.fired_at_turn,
        Some(turn),
        "Expected '{id}' to fire on turn {turn}"
    );
    assert!(
        !state.event_pool.is_pending(id),
        "Fired event '{id}' is still pending"
    );
}

/// Assert a stage fell back.
#[track_caller]
pub fn assert_degraded<T>(outcome: &StageOutcome<T>) {
    assert!(outcome.is_degraded(), "Expected a degraded stage outcome");
}

/// Assert a stage answered normally.
#[track_caller]
pub fn assert_ready<T>(outcome: &StageOutcome<T>) {
    assert!(
        !outcome.is_degraded(),
        "Expected a ready stage outcome, got error: {:?}",
        outcome.error()
    );
}
