//! Lock-guarded owner of one session's narrative state.

use super::{Event, NarrativeState, Patch};
use tokio::sync::Mutex;

/// Owns a session's [`NarrativeState`].
///
/// Readers get independent snapshots. The three write operations
/// ([`apply_patch`](Self::apply_patch), [`merge_events`](Self::merge_events)
/// and [`fire_event`](Self::fire_event)) serialize on a single lock, so a
/// background event merge can land at any point of a foreground turn
/// without tearing it.
#[derive(Debug)]
pub struct StateStore {
    state: Mutex<NarrativeState>,
}

impl StateStore {
    /// Create a store holding the default snapshot.
    pub fn new() -> Self {
        Self::with_state(NarrativeState::new())
    }

    /// Create a store seeded with an existing state.
    pub fn with_state(state: NarrativeState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// An independent copy of the current state.
    pub async fn snapshot(&self) -> NarrativeState {
        self.state.lock().await.clone()
    }

    /// The current turn, without copying the whole state.
    pub async fn turn(&self) -> u32 {
        self.state.lock().await.meta.turn
    }

    /// Merge a director patch and advance the turn.
    ///
    /// The turn advances by exactly one even when the patch is empty.
    /// Returns the new turn.
    pub async fn apply_patch(&self, patch: &Patch) -> u32 {
        let mut state = self.state.lock().await;

        patch.axes.merge_into(&mut state.axes);
        patch.momentum.merge_into(&mut state.momentum);

        for thread in &patch.threads_add {
            if state.threads.iter().any(|t| t.id == thread.id) {
                tracing::warn!(thread_id = %thread.id, "patch adds a thread with a duplicate id");
            }
            state.threads.push(thread.clone());
        }

        for update in &patch.threads_update {
            let mut matched = false;
            for thread in state.threads.iter_mut().filter(|t| t.id == update.id) {
                update.merge_into(thread);
                matched = true;
            }
            if !matched {
                tracing::debug!(thread_id = %update.id, "thread update matched no thread");
            }
        }

        state.meta.last_patch_summary = patch.patch_summary.clone();
        state.meta.turn += 1;
        state.meta.turn
    }

    /// Append newly predicted events to the pending pool.
    ///
    /// Events whose id is already pending, already fired, or repeated
    /// earlier in the same batch are skipped. Input order is preserved.
    /// Returns how many events were appended.
    pub async fn merge_events(&self, events: Vec<Event>) -> usize {
        let mut state = self.state.lock().await;
        let pool = &mut state.event_pool;

        let mut added = 0;
        for event in events {
            // Pushed events count as pending, so repeats within the batch
            // are caught here too.
            if pool.contains(&event.id) {
                tracing::debug!(event_id = %event.id, "skipping known event");
                continue;
            }
            pool.pending.push(event);
            added += 1;
        }
        added
    }

    /// Move a pending event to the triggered history.
    ///
    /// Stamps `fired_at_turn` with the current turn. Returns `None` when the
    /// id is not pending. Firing is irreversible.
    pub async fn fire_event(&self, event_id: &str) -> Option<Event> {
        let mut state = self.state.lock().await;
        let turn = state.meta.turn;

        let index = state
            .event_pool
            .pending
            .iter()
            .position(|e| e.id == event_id)?;

        let mut event = state.event_pool.pending.remove(index);
        event.fired_at_turn = Some(turn);
        state.event_pool.triggered.push(event.clone());
        Some(event)
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
