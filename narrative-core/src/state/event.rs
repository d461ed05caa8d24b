//! Macro story events and the pending/triggered pool.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A macro narrative event predicted for the future.
///
/// Ids are unique across both halves of the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub trigger_condition: String,
    #[serde(default)]
    pub trigger_turn_min: u32,
    #[serde(default = "default_turn_max")]
    pub trigger_turn_max: u32,
    /// Axis requirements such as `{"tension": ">60"}`.
    #[serde(default)]
    pub required_axes: Map<String, Value>,
    /// 1 (lowest) to 5 (highest).
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub narrative_impact: String,
    /// The turn on which the event fired; `None` while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fired_at_turn: Option<u32>,
}

fn default_turn_max() -> u32 {
    999
}

fn default_priority() -> u8 {
    1
}

impl Event {
    /// Create a pending event with default trigger window and priority.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            trigger_condition: String::new(),
            trigger_turn_min: 0,
            trigger_turn_max: default_turn_max(),
            required_axes: Map::new(),
            priority: default_priority(),
            narrative_impact: String::new(),
            fired_at_turn: None,
        }
    }

    pub fn with_window(mut self, min: u32, max: u32) -> Self {
        self.trigger_turn_min = min;
        self.trigger_turn_max = max;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Whether `turn` falls inside the event's trigger window.
    pub fn in_window(&self, turn: u32) -> bool {
        (self.trigger_turn_min..=self.trigger_turn_max).contains(&turn)
    }
}

/// Events that have not happened yet, and the append-only history of
/// those that have.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPool {
    pub pending: Vec<Event>,
    pub triggered: Vec<Event>,
}

impl EventPool {
    pub fn pending_event(&self, id: &str) -> Option<&Event> {
        self.pending.iter().find(|e| e.id == id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending_event(id).is_some()
    }

    pub fn has_fired(&self, id: &str) -> bool {
        self.triggered.iter().any(|e| e.id == id)
    }

    /// Whether `id` is known to either half of the pool.
    pub fn contains(&self, id: &str) -> bool {
        self.is_pending(id) || self.has_fired(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_defaults_from_sparse_json() {
        let event: Event = serde_json::from_value(json!({
            "id": "neh_001",
            "name": "The letter",
            "required_axes": {"tension": ">60"}
        }))
        .unwrap();

        assert_eq!(event.trigger_turn_min, 0);
        assert_eq!(event.trigger_turn_max, 999);
        assert_eq!(event.priority, 1);
        assert_eq!(event.required_axes["tension"], ">60");
        assert!(event.fired_at_turn.is_none());
    }

    #[test]
    fn test_pending_event_not_serialized_with_fired_at() {
        let json = serde_json::to_value(Event::new("e1", "x")).unwrap();
        assert!(json.get("fired_at_turn").is_none());
    }

    #[test]
    fn test_window() {
        let event = Event::new("e1", "x").with_window(3, 6);
        assert!(!event.in_window(2));
        assert!(event.in_window(3));
        assert!(event.in_window(6));
        assert!(!event.in_window(7));
    }

    #[test]
    fn test_pool_lookup() {
        let mut pool = EventPool::default();
        pool.pending.push(Event::new("a", "A"));
        pool.triggered.push(Event::new("b", "B"));

        assert!(pool.is_pending("a"));
        assert!(!pool.is_pending("b"));
        assert!(pool.has_fired("b"));
        assert!(pool.contains("a") && pool.contains("b"));
        assert!(!pool.contains("c"));
    }
}
