//! Director-authored partial state changes.
//!
//! A [`Patch`] names only what changes in one turn. Every field that may be
//! left alone is a [`PatchField`], which keeps "key missing", "explicit null"
//! and "explicit value" apart.

use super::{Axes, Direction, Emotion, InfoVeil, Momentum, Pace, Thread};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A three-state patch value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PatchField<T> {
    /// The key was not supplied.
    #[default]
    Absent,
    /// The key was supplied as `null`.
    Null,
    Value(T),
}

impl<T> PatchField<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, PatchField::Absent)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PatchField::Null)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            PatchField::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Collapse an explicit null into "not supplied".
    pub fn prune_null(&mut self) {
        if self.is_null() {
            *self = PatchField::Absent;
        }
    }
}

impl<T> From<T> for PatchField<T> {
    fn from(value: T) -> Self {
        PatchField::Value(value)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for PatchField<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Only reached when the key is present; missing keys use `Default`.
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(v) => PatchField::Value(v),
            None => PatchField::Null,
        })
    }
}

impl<T: Serialize> Serialize for PatchField<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PatchField::Value(v) => v.serialize(serializer),
            _ => serializer.serialize_none(),
        }
    }
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Lenient reply decoding
// ============================================================================

fn section(map: &mut Map<String, Value>, key: &str) -> Option<Map<String, Value>> {
    match map.remove(key)? {
        Value::Object(inner) => Some(inner),
        Value::Null => None,
        other => {
            tracing::warn!(section = key, got = %other, "patch section is not an object, ignoring it");
            None
        }
    }
}

fn field<T: DeserializeOwned>(
    map: &mut Map<String, Value>,
    key: &str,
    normalize: fn(Value) -> Value,
) -> PatchField<T> {
    match map.remove(key) {
        None => PatchField::Absent,
        Some(Value::Null) => PatchField::Null,
        Some(raw) => match serde_json::from_value(normalize(raw)) {
            Ok(value) => PatchField::Value(value),
            Err(e) => {
                tracing::warn!(field = key, error = %e, "dropping malformed patch field");
                PatchField::Absent
            }
        },
    }
}

fn entries<T: DeserializeOwned>(map: &mut Map<String, Value>, key: &str) -> Vec<T> {
    let items = match map.remove(key) {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) => return Vec::new(),
        Some(other) => {
            tracing::warn!(field = key, got = %other, "expected an array, ignoring it");
            return Vec::new();
        }
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(integral(item)) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(field = key, error = %e, "skipping malformed thread entry");
                None
            }
        })
        .collect()
}

fn keep(value: Value) -> Value {
    value
}

/// Rewrite whole-number floats (`70.0`) as integers, recursively.
fn integral(value: Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() <= i32::MAX as f64 => {
                Value::from(f as i64)
            }
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(integral).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, integral(v))).collect())
        }
        other => other,
    }
}

fn lowercase(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_lowercase()),
        other => other,
    }
}

// ============================================================================
// Patch
// ============================================================================

/// One turn's worth of state changes, produced by the director.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    #[serde(default, deserialize_with = "null_as_default")]
    pub axes: AxesPatch,
    #[serde(default, deserialize_with = "null_as_default")]
    pub momentum: MomentumPatch,
    #[serde(default, deserialize_with = "null_as_default")]
    pub threads_add: Vec<Thread>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub threads_update: Vec<ThreadUpdate>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub patch_summary: String,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.patch_summary = summary.into();
        self
    }

    /// Decode a patch from a model reply one field at a time.
    ///
    /// A field that does not decode is dropped with a warning and the rest
    /// of the patch survives. Integral floats count as integers, and `pace`
    /// and `direction` ignore case. Thread entries that do not decode, such
    /// as ones without an `id`, are skipped individually.
    pub fn from_reply(value: Value) -> Self {
        let mut map = match value {
            Value::Object(map) => map,
            Value::Null => return Self::default(),
            other => {
                tracing::warn!(got = %other, "state_patch is not an object, ignoring it");
                return Self::default();
            }
        };

        let axes = section(&mut map, "axes").map(|mut axes| AxesPatch {
            tension: field(&mut axes, "tension", integral),
            intimacy: field(&mut axes, "intimacy", integral),
            emotion: field(&mut axes, "emotion", integral),
            drive: field(&mut axes, "drive", keep),
            info_veil: field(&mut axes, "info_veil", keep),
            energy: field(&mut axes, "energy", integral),
        });
        let momentum = section(&mut map, "momentum").map(|mut momentum| MomentumPatch {
            pace: field(&mut momentum, "pace", lowercase),
            direction: field(&mut momentum, "direction", lowercase),
            streak: field(&mut momentum, "streak", integral),
        });
        let patch_summary = match map.remove("patch_summary") {
            Some(Value::String(summary)) => summary,
            _ => String::new(),
        };

        Self {
            axes: axes.unwrap_or_default(),
            momentum: momentum.unwrap_or_default(),
            threads_add: entries(&mut map, "threads_add"),
            threads_update: entries(&mut map, "threads_update"),
            patch_summary,
        }
    }

    /// Turn explicit nulls in `axes` and `momentum` into absent entries.
    pub fn prune_nulls(&mut self) {
        self.axes.prune_nulls();
        self.momentum.prune_nulls();
    }

    /// Whether applying this patch would change nothing but the turn counter
    /// and the summary.
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
            && self.momentum.is_empty()
            && self.threads_add.is_empty()
            && self.threads_update.is_empty()
    }
}

/// Partial axes. Aggregate axes merge field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AxesPatch {
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub tension: PatchField<i32>,
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub intimacy: PatchField<i32>,
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub emotion: PatchField<EmotionPatch>,
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub drive: PatchField<String>,
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub info_veil: PatchField<InfoVeilPatch>,
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub energy: PatchField<i32>,
}

impl AxesPatch {
    fn prune_nulls(&mut self) {
        self.tension.prune_null();
        self.intimacy.prune_null();
        self.emotion.prune_null();
        self.drive.prune_null();
        self.info_veil.prune_null();
        self.energy.prune_null();
    }

    pub fn is_empty(&self) -> bool {
        self.tension.value().is_none()
            && self.intimacy.value().is_none()
            && self.emotion.value().is_none()
            && self.drive.value().is_none()
            && self.info_veil.value().is_none()
            && self.energy.value().is_none()
    }

    pub(crate) fn merge_into(&self, axes: &mut Axes) {
        if let Some(v) = self.tension.value() {
            axes.tension = *v;
        }
        if let Some(v) = self.intimacy.value() {
            axes.intimacy = *v;
        }
        if let Some(emotion) = self.emotion.value() {
            emotion.merge_into(&mut axes.emotion);
        }
        if let Some(v) = self.drive.value() {
            axes.drive = v.clone();
        }
        if let Some(veil) = self.info_veil.value() {
            veil.merge_into(&mut axes.info_veil);
        }
        if let Some(v) = self.energy.value() {
            axes.energy = *v;
        }
    }
}

/// Sub-field update for the emotion axis.
///
/// A bare string is accepted as a label-only update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EmotionPatchRepr")]
pub struct EmotionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intensity: Option<i32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmotionPatchRepr {
    Label(String),
    Fields {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        intensity: Option<i32>,
    },
}

impl From<EmotionPatchRepr> for EmotionPatch {
    fn from(repr: EmotionPatchRepr) -> Self {
        match repr {
            EmotionPatchRepr::Label(label) => Self {
                label: Some(label),
                intensity: None,
            },
            EmotionPatchRepr::Fields { label, intensity } => Self { label, intensity },
        }
    }
}

impl EmotionPatch {
    fn merge_into(&self, emotion: &mut Emotion) {
        if let Some(label) = &self.label {
            emotion.label = label.clone();
        }
        if let Some(intensity) = self.intensity {
            emotion.intensity = intensity;
        }
    }
}

/// Sub-field update for the information veil.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoVeilPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revealed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<Vec<String>>,
}

impl InfoVeilPatch {
    fn merge_into(&self, veil: &mut InfoVeil) {
        if let Some(revealed) = &self.revealed {
            veil.revealed = revealed.clone();
        }
        if let Some(hidden) = &self.hidden {
            veil.hidden = hidden.clone();
        }
        veil.settle();
    }
}

/// Partial momentum; a shallow merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MomentumPatch {
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub pace: PatchField<Pace>,
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub direction: PatchField<Direction>,
    #[serde(default, skip_serializing_if = "PatchField::is_absent")]
    pub streak: PatchField<u32>,
}

impl MomentumPatch {
    fn prune_nulls(&mut self) {
        self.pace.prune_null();
        self.direction.prune_null();
        self.streak.prune_null();
    }

    pub fn is_empty(&self) -> bool {
        self.pace.value().is_none() && self.direction.value().is_none() && self.streak.value().is_none()
    }

    pub(crate) fn merge_into(&self, momentum: &mut Momentum) {
        if let Some(pace) = self.pace.value() {
            momentum.pace = *pace;
        }
        if let Some(direction) = self.direction.value() {
            momentum.direction = *direction;
        }
        if let Some(streak) = self.streak.value() {
            momentum.streak = *streak;
        }
    }
}

/// A targeted update to an existing thread, matched by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadUpdate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Vec<String>>,
}

impl ThreadUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub(crate) fn merge_into(&self, thread: &mut Thread) {
        if let Some(name) = &self.name {
            thread.name = name.clone();
        }
        if let Some(status) = &self.status {
            thread.status = status.clone();
        }
        if let Some(progress) = self.progress {
            thread.progress = progress;
        }
        if let Some(hooks) = &self.hooks {
            thread.hooks = hooks.clone();
        }
    }
}
