//! Sessions and the registry that owns them.
//!
//! Each session owns its own state store, conversation log and turn gate, so
//! unrelated sessions never contend on a lock.

use crate::config::EngineConfig;
use crate::history::{ConversationLog, HistoryEntry};
use crate::oracle::{ClaudeOracle, NarratorOracle, OracleError};
use crate::orchestrator::{TurnOrchestrator, TurnOutcome, TurnRecord};
use crate::state::{NarrativeState, StateStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, Semaphore};
use uuid::Uuid;

/// Errors surfaced to callers of the registry.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("message is empty")]
    EmptyMessage,

    #[error("oracle configuration error: {0}")]
    Oracle(#[from] OracleError),
}

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// One running narrative.
pub struct Session {
    id: SessionId,
    pub(crate) store: StateStore,
    pub(crate) history: Mutex<ConversationLog>,
    /// Held for the whole of a turn.
    pub(crate) turn_gate: Mutex<()>,
    pub(crate) predictions: Arc<Semaphore>,
    max_predictions: usize,
    pub(crate) debug_log: Mutex<Vec<TurnRecord>>,
}

impl Session {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self::with_state(config, NarrativeState::new())
    }

    pub(crate) fn with_state(config: &EngineConfig, state: NarrativeState) -> Self {
        let max_predictions = config.max_background_predictions.max(1);
        Self {
            id: SessionId::new(),
            store: StateStore::with_state(state),
            history: Mutex::new(ConversationLog::new()),
            turn_gate: Mutex::new(()),
            predictions: Arc::new(Semaphore::new(max_predictions)),
            max_predictions,
            debug_log: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The session's state store.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub async fn snapshot(&self) -> NarrativeState {
        self.store.snapshot().await
    }

    /// A copy of the conversation so far.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().await.entries().to_vec()
    }

    /// Debug payloads of every completed turn, oldest first.
    pub async fn debug_history(&self) -> Vec<TurnRecord> {
        self.debug_log.lock().await.clone()
    }

    /// Background predictions currently running.
    pub fn predictions_in_flight(&self) -> usize {
        self.max_predictions - self.predictions.available_permits()
    }

    /// Wait until no background prediction is running.
    pub async fn settle_predictions(&self) {
        // Holding every permit at once means nothing else holds one.
        let permits = u32::try_from(self.max_predictions).unwrap_or(u32::MAX);
        if self.predictions.acquire_many(permits).await.is_err() {
            tracing::warn!(session = %self.id, "prediction semaphore closed");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("max_predictions", &self.max_predictions)
            .finish_non_exhaustive()
    }
}

/// All live sessions, keyed by id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    orchestrator: TurnOrchestrator,
}

impl SessionRegistry {
    pub fn new(oracle: Arc<dyn NarratorOracle>, config: EngineConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            orchestrator: TurnOrchestrator::new(oracle, config),
        }
    }

    /// Build a registry backed by the Claude oracle configured from the
    /// environment.
    pub fn from_env(config: EngineConfig) -> Result<Self, SessionError> {
        let oracle = ClaudeOracle::from_env()?;
        tracing::info!(model = %oracle.model(), "using Claude oracle");
        Ok(Self::new(Arc::new(oracle), config))
    }

    pub fn config(&self) -> &EngineConfig {
        self.orchestrator.config()
    }

    /// Start a new session at turn 0.
    pub async fn create(&self) -> (SessionId, NarrativeState) {
        let session = Arc::new(Session::new(self.orchestrator.config()));
        let id = session.id();
        let state = session.snapshot().await;

        self.sessions.write().await.insert(id, session);
        tracing::info!(session = %id, "session created");
        (id, state)
    }

    /// Start a session from an existing state, e.g. one restored by the
    /// caller.
    pub async fn create_from(&self, state: NarrativeState) -> SessionId {
        let session = Arc::new(Session::with_state(self.orchestrator.config(), state));
        let id = session.id();

        self.sessions.write().await.insert(id, session);
        tracing::info!(session = %id, "session restored");
        id
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn require(&self, id: &SessionId) -> Result<Arc<Session>, SessionError> {
        self.get(id)
            .await
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))
    }

    pub async fn snapshot(&self, id: &SessionId) -> Result<NarrativeState, SessionError> {
        Ok(self.require(id).await?.snapshot().await)
    }

    /// Run one turn. The message is trimmed; an empty message is rejected
    /// before any state is touched.
    pub async fn submit_turn(
        &self,
        id: &SessionId,
        message: &str,
    ) -> Result<TurnOutcome, SessionError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let session = self.require(id).await?;
        Ok(self.orchestrator.run_turn(&session, message).await)
    }

    pub async fn debug_history(&self, id: &SessionId) -> Result<Vec<TurnRecord>, SessionError> {
        Ok(self.require(id).await?.debug_history().await)
    }

    /// Evict a session. Background predictions already running still finish.
    pub async fn remove(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            tracing::info!(session = %id, "session removed");
        }
        removed
    }

    /// Wait for every session's background predictions to finish.
    ///
    /// Called on shutdown so no prediction is cut off mid-merge.
    pub async fn settle_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        for session in &sessions {
            session.settle_predictions().await;
        }
        tracing::debug!(sessions = sessions.len(), "background predictions settled");
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
