//! The per-turn pipeline.
//!
//! One turn runs these steps in order, holding the session's turn gate
//! throughout:
//!
//! 1. perception and trigger check, concurrently, on the same snapshot
//! 2. join both
//! 3. fire the chosen pending event, if any
//! 4. re-snapshot and direct
//! 5. apply the director's patch (always, advancing the turn)
//! 6. re-snapshot and perform
//! 7. append the exchange to the conversation log
//! 8. on prediction turns, spawn a background prediction
//!
//! Background predictions merge into the store whenever they finish, which
//! may be in the middle of a later turn.

use crate::config::EngineConfig;
use crate::history::{recent, HistoryEntry};
use crate::oracle::NarratorOracle;
use crate::session::Session;
use crate::stages::director::{self, DirectorInput};
use crate::stages::{
    perception, performance, predictor, trigger, DirectorPlan, PerceptionReport, Performance,
    StageOutcome, TriggerDecision,
};
use crate::state::{Event, NarrativeState};
use serde::Serialize;
use std::sync::Arc;

/// What happened to the background prediction on this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    /// A prediction task was spawned.
    Scheduled,
    /// Due, but the session already has the maximum number running.
    SkippedBusy,
    NotDue,
}

/// Per-stage payloads for one turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnDebug {
    pub perception: StageOutcome<PerceptionReport>,
    pub trigger: StageOutcome<TriggerDecision>,
    /// The event fired this turn.
    pub fired: Option<Event>,
    pub director: StageOutcome<DirectorPlan>,
    pub performance: StageOutcome<Performance>,
    pub prediction: PredictionStatus,
}

/// Debug payload tagged with the turn it produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub turn: u32,
    pub debug: TurnDebug,
}

/// Result of one turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub response: String,
    pub state: NarrativeState,
    pub debug: TurnDebug,
    /// The turn counter after this turn.
    pub turn: u32,
}

/// Runs turns against sessions.
pub struct TurnOrchestrator {
    oracle: Arc<dyn NarratorOracle>,
    config: Arc<EngineConfig>,
}

impl TurnOrchestrator {
    pub fn new(oracle: Arc<dyn NarratorOracle>, config: EngineConfig) -> Self {
        Self {
            oracle,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one turn for `session`. Always completes with a reply; stage
    /// failures show up as degraded entries in the debug payload.
    pub async fn run_turn(&self, session: &Arc<Session>, message: &str) -> TurnOutcome {
        let _gate = session.turn_gate.lock().await;

        let oracle = self.oracle.as_ref();
        let config = self.config.as_ref();
        let persona = &config.persona;

        let history = session.history.lock().await.entries().to_vec();
        let before = session.store.snapshot().await;
        let turn = before.turn();
        tracing::debug!(session = %session.id(), turn, "turn started");

        // Steps 1-2
        let (perception, trigger) = tokio::join!(
            perception::analyze(
                oracle,
                persona,
                message,
                &before,
                recent(&history, config.perception_history),
            ),
            trigger::check(oracle, &before, turn, None),
        );

        // Step 3
        let fired = match trigger.value().target() {
            Some(id) => {
                let fired = session.store.fire_event(id).await;
                match &fired {
                    Some(event) => tracing::info!(
                        session = %session.id(),
                        event_id = %event.id,
                        turn,
                        "event fired"
                    ),
                    None => tracing::debug!(event_id = %id, "event no longer pending"),
                }
                fired
            }
            None => None,
        };

        // The director and performer see the current message as the latest
        // line of conversation.
        let mut conversation = history;
        conversation.push(HistoryEntry::user(message));

        // Step 4
        let after_fire = session.store.snapshot().await;
        let plan = director::direct(
            oracle,
            persona,
            DirectorInput {
                perception: &perception,
                trigger: &trigger,
                fired: fired.as_ref(),
                state: &after_fire,
                history: recent(&conversation, config.director_history),
            },
        )
        .await;

        // Step 5
        let new_turn = session.store.apply_patch(&plan.value().state_patch).await;

        // Step 6
        let after_patch = session.store.snapshot().await;
        let performance = performance::perform(
            oracle,
            persona,
            plan.value(),
            &after_patch,
            recent(&conversation, config.performance_history),
        )
        .await;
        let response = performance.value().response.clone();

        // Step 7
        let history = {
            let mut log = session.history.lock().await;
            log.record_exchange(message, response.clone());
            log.entries().to_vec()
        };

        // Step 8 uses the turn number from before the patch.
        let prediction = if config.prediction_due(turn) {
            self.schedule_prediction(session, history).await
        } else {
            PredictionStatus::NotDue
        };

        let turn_debug = TurnDebug {
            perception,
            trigger,
            fired,
            director: plan,
            performance,
            prediction,
        };
        session.debug_log.lock().await.push(TurnRecord {
            turn: new_turn,
            debug: turn_debug.clone(),
        });

        let degraded = turn_debug.degraded_stages();
        tracing::info!(
            session = %session.id(),
            turn = new_turn,
            degraded = ?degraded,
            "turn complete"
        );

        TurnOutcome {
            response,
            state: session.store.snapshot().await,
            debug: turn_debug,
            turn: new_turn,
        }
    }

    async fn schedule_prediction(
        &self,
        session: &Arc<Session>,
        history: Vec<HistoryEntry>,
    ) -> PredictionStatus {
        let permit = match Arc::clone(&session.predictions).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!(session = %session.id(), "prediction already running, skipping");
                return PredictionStatus::SkippedBusy;
            }
        };

        let state = session.store.snapshot().await;
        let oracle = Arc::clone(&self.oracle);
        let config = Arc::clone(&self.config);
        let session = Arc::clone(session);

        tokio::spawn(async move {
            let _permit = permit;
            let window = recent(&history, config.predictor_history);
            match predictor::predict(oracle.as_ref(), &config.persona, &state, window).await {
                Ok(events) => {
                    let proposed = events.len();
                    let added = session.store.merge_events(events).await;
                    tracing::info!(session = %session.id(), proposed, added, "events predicted");
                }
                Err(e) => {
                    tracing::warn!(session = %session.id(), error = %e, "event prediction failed");
                }
            }
        });

        PredictionStatus::Scheduled
    }
}

impl TurnDebug {
    /// Names of the stages that fell back this turn.
    pub fn degraded_stages(&self) -> Vec<&'static str> {
        let mut stages = Vec::new();
        if self.perception.is_degraded() {
            stages.push("perception");
        }
        if self.trigger.is_degraded() {
            stages.push("trigger");
        }
        if self.director.is_degraded() {
            stages.push("director");
        }
        if self.performance.is_degraded() {
            stages.push("performance");
        }
        stages
    }
}
