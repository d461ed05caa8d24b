//! Narrative state for one session.
//!
//! The state is a versioned record: six story axes, short-term momentum,
//! tracked sub-plot threads, the macro event pool and bookkeeping metadata.
//! It is owned by a [`StateStore`] and only ever changed through the store's
//! three write operations.

mod event;
mod patch;
mod store;

pub use event::{Event, EventPool};
pub use patch::{
    AxesPatch, EmotionPatch, InfoVeilPatch, MomentumPatch, Patch, PatchField, ThreadUpdate,
};
pub(crate) use patch::null_as_default;
pub use store::StateStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The full narrative state of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeState {
    pub axes: Axes,
    pub momentum: Momentum,
    pub threads: Vec<Thread>,
    pub event_pool: EventPool,
    pub meta: Meta,
}

impl NarrativeState {
    /// The default snapshot every session starts from.
    pub fn new() -> Self {
        Self {
            axes: Axes::default(),
            momentum: Momentum::default(),
            threads: Vec::new(),
            event_pool: EventPool::default(),
            meta: Meta::new(),
        }
    }

    /// The session's logical clock.
    pub fn turn(&self) -> u32 {
        self.meta.turn
    }

    /// Find a thread by id (first match).
    pub fn thread(&self, id: &str) -> Option<&Thread> {
        self.threads.iter().find(|t| t.id == id)
    }
}

impl Default for NarrativeState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Axes
// ============================================================================

/// The six story-intensity dimensions.
///
/// Numeric axes are documented as 0-100 but are stored unclamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    pub tension: i32,
    pub intimacy: i32,
    pub emotion: Emotion,
    pub drive: String,
    pub info_veil: InfoVeil,
    pub energy: i32,
}

impl Default for Axes {
    fn default() -> Self {
        Self {
            tension: 50,
            intimacy: 20,
            emotion: Emotion {
                label: "calm".to_string(),
                intensity: 40,
            },
            drive: "exploration and connection".to_string(),
            info_veil: InfoVeil {
                revealed: Vec::new(),
                hidden: vec!["origin_secret".to_string(), "true_purpose".to_string()],
            },
            energy: 60,
        }
    }
}

/// The emotional axis: a label plus an intensity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emotion {
    pub label: String,
    pub intensity: i32,
}

/// Which story secrets have been revealed and which are still hidden.
///
/// The two tag lists are kept disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoVeil {
    pub revealed: Vec<String>,
    pub hidden: Vec<String>,
}

impl InfoVeil {
    /// Drop hidden tags that have since been revealed.
    pub(crate) fn settle(&mut self) {
        let revealed = &self.revealed;
        self.hidden.retain(|tag| !revealed.contains(tag));
    }
}

// ============================================================================
// Momentum
// ============================================================================

/// Short-term trend of the story.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Momentum {
    pub pace: Pace,
    pub direction: Direction,
    /// Consecutive turns in the same direction.
    pub streak: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pace {
    Slow,
    #[default]
    Medium,
    Fast,
}

impl Pace {
    pub fn name(&self) -> &'static str {
        match self {
            Pace::Slow => "slow",
            Pace::Medium => "medium",
            Pace::Fast => "fast",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Escalating,
    #[default]
    Stable,
    DeEscalating,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Escalating => "escalating",
            Direction::Stable => "stable",
            Direction::DeEscalating => "de-escalating",
        }
    }
}

// ============================================================================
// Threads
// ============================================================================

/// A tracked sub-plot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_thread_status")]
    pub status: String,
    #[serde(default)]
    pub progress: i32,
    #[serde(default)]
    pub hooks: Vec<String>,
}

fn default_thread_status() -> String {
    "active".to_string()
}

impl Thread {
    /// Create an active thread with no progress.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: default_thread_status(),
            progress: 0,
            hooks: Vec::new(),
        }
    }
}

// ============================================================================
// Meta
// ============================================================================

/// Bookkeeping for the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Logical clock; advanced only by patch application.
    pub turn: u32,
    pub last_patch_summary: String,
    /// Set once at session creation.
    pub created_at: DateTime<Utc>,
}

impl Meta {
    fn new() -> Self {
        Self {
            turn: 0,
            last_patch_summary: String::new(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = NarrativeState::new();
        assert_eq!(state.turn(), 0);
        assert_eq!(state.axes.tension, 50);
        assert_eq!(state.axes.intimacy, 20);
        assert_eq!(state.axes.energy, 60);
        assert_eq!(state.axes.emotion.intensity, 40);
        assert_eq!(state.momentum.pace, Pace::Medium);
        assert_eq!(state.momentum.direction, Direction::Stable);
        assert!(state.threads.is_empty());
        assert!(state.event_pool.pending.is_empty());
        assert!(state.event_pool.triggered.is_empty());
    }

    #[test]
    fn test_serialized_shape() {
        let mut state = NarrativeState::new();
        state.momentum.direction = Direction::DeEscalating;
        let json = serde_json::to_value(&state).unwrap();

        assert_eq!(json["axes"]["tension"], 50);
        assert_eq!(json["axes"]["emotion"]["label"], "calm");
        assert_eq!(json["momentum"]["pace"], "medium");
        assert_eq!(json["momentum"]["direction"], "de-escalating");
        assert_eq!(json["meta"]["turn"], 0);
        assert!(json["event_pool"]["pending"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_thread_defaults_from_json() {
        let thread: Thread =
            serde_json::from_value(serde_json::json!({"id": "t1", "name": "trust"})).unwrap();
        assert_eq!(thread.status, "active");
        assert_eq!(thread.progress, 0);
        assert!(thread.hooks.is_empty());
    }

    #[test]
    fn test_info_veil_settle() {
        let mut veil = InfoVeil {
            revealed: vec!["origin_secret".to_string()],
            hidden: vec!["origin_secret".to_string(), "true_purpose".to_string()],
        };
        veil.settle();
        assert_eq!(veil.hidden, vec!["true_purpose".to_string()]);
    }
}
