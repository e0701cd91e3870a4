/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Timeline data model.
//!
//! ```text
//! owner ──Vec<TimelineObject>──►  Conductor  ──resolve_at(t)──►  ResolvedState
//!                                   │                              │ one ResolvedLayer
//!                                   │ "now" fixup (new snapshot)   │ per active layer
//!                                   ▼                              ▼
//!                             SetTimelineTriggerTime        device adapters
//! ```
//!
//! The timeline is owned by the caller and handed to the Conductor by value;
//! the Conductor replaces it wholesale on every update.  The only rewrite the
//! core performs is the "now" fixup, which produces a *new* snapshot instead
//! of mutating objects in place.

pub mod error;
pub mod resolver;

pub use error::ResolveError;
pub use resolver::{BasicResolver, DevelopedTimeline, EventKind, NextEvent, TimelineResolver};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Time;

// ── Triggers ──────────────────────────────────────────────────────────────────

/// Value of an absolute trigger: a concrete time, or `"now"`.
///
/// Serialised as a bare number or the string `"now"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTriggerTime", into = "RawTriggerTime")]
pub enum TriggerTime {
    At(Time),
    Now,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawTriggerTime {
    At(Time),
    Keyword(String),
}

impl TryFrom<RawTriggerTime> for TriggerTime {
    type Error = String;

    fn try_from(raw: RawTriggerTime) -> Result<Self, Self::Error> {
        match raw {
            RawTriggerTime::At(t) => Ok(TriggerTime::At(t)),
            RawTriggerTime::Keyword(k) if k == "now" => Ok(TriggerTime::Now),
            RawTriggerTime::Keyword(k) => Err(format!(
                "invalid absolute trigger value '{}' (expected a number or \"now\")",
                k
            )),
        }
    }
}

impl From<TriggerTime> for RawTriggerTime {
    fn from(t: TriggerTime) -> Self {
        match t {
            TriggerTime::At(t) => RawTriggerTime::At(t),
            TriggerTime::Now => RawTriggerTime::Keyword("now".to_string()),
        }
    }
}

/// When a timeline object starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Trigger {
    /// Fixed time (relative to the enclosing group for nested objects).
    Absolute(TriggerTime),
    /// Expression referring to other objects, e.g. `"#intro.end + 500"`.
    Relative(String),
    /// Class expression: active while the expression holds.
    Logical(String),
}

impl Trigger {
    /// `true` for `Absolute("now")`.
    pub fn is_now(&self) -> bool {
        matches!(self, Trigger::Absolute(TriggerTime::Now))
    }
}

// ── TimelineObject ────────────────────────────────────────────────────────────

/// One timed "what should be on air" entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineObject {
    pub id: String,
    pub trigger: Trigger,

    /// Duration in ms.  `0` means open-ended.
    #[serde(default)]
    pub duration: Time,

    /// Logical layer this object plays on.  Groups may leave it empty.
    #[serde(default)]
    pub layer: String,

    /// Free-form, device-specific content.
    #[serde(default)]
    pub content: Value,

    #[serde(default)]
    pub classes: Vec<String>,

    /// Higher wins when several objects are active on one layer.
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub is_group: bool,

    /// Children of a group; their triggers are relative to the group's start.
    #[serde(default)]
    pub children: Vec<TimelineObject>,
}

impl TimelineObject {
    /// Leaf object on `layer` with an absolute trigger at `start`.
    pub fn new(id: impl Into<String>, layer: impl Into<String>, start: TriggerTime) -> Self {
        Self {
            id: id.into(),
            trigger: Trigger::Absolute(start),
            duration: 0,
            layer: layer.into(),
            content: Value::Null,
            classes: Vec::new(),
            priority: 0,
            is_group: false,
            children: Vec::new(),
        }
    }

    /// Group object containing `children`.
    pub fn group(id: impl Into<String>, start: TriggerTime, children: Vec<TimelineObject>) -> Self {
        Self {
            is_group: true,
            children,
            ..Self::new(id, "", start)
        }
    }

    pub fn with_duration(mut self, duration: Time) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

// ── Resolved state ────────────────────────────────────────────────────────────

/// The winning object on one layer at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLayer {
    /// Id of the winning timeline object.
    pub id: String,
    pub layer: String,
    pub content: Value,
    pub start_time: Time,
    /// `None` for open-ended objects.
    pub end_time: Option<Time>,
    /// Resolved numeric attributes (mixer values and the like).
    #[serde(default)]
    pub mixer: BTreeMap<String, f64>,
    /// Pre-loaded (look-ahead) content rather than on-air content.
    #[serde(default)]
    pub is_background: bool,
    /// For background layers: the layer the content will eventually play on.
    #[serde(default)]
    pub original_layer: Option<String>,
}

impl ResolvedLayer {
    /// `content.type`, when present.
    pub fn content_type(&self) -> Option<&str> {
        self.content.get("type").and_then(Value::as_str)
    }

    /// `content.attributes`, when present.
    pub fn attributes(&self) -> Option<&serde_json::Map<String, Value>> {
        self.content.get("attributes").and_then(Value::as_object)
    }

    /// `content.callback` – name of the owner-side callback to fire at
    /// `start_time`.  `callBack` is accepted as well.
    pub fn callback(&self) -> Option<&str> {
        self.content
            .get("callback")
            .or_else(|| self.content.get("callBack"))
            .and_then(Value::as_str)
    }

    /// `content.callback_data`, or `callBackData`.
    pub fn callback_data(&self) -> Value {
        self.content
            .get("callback_data")
            .or_else(|| self.content.get("callBackData"))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Per-layer state of the whole timeline at `time`.
///
/// `BTreeMap` keeps layer iteration (and therefore diff emission order)
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedState {
    pub time: Time,
    pub layers: BTreeMap<String, ResolvedLayer>,
}

impl ResolvedState {
    /// Empty state at `time`.
    pub fn empty(time: Time) -> Self {
        Self {
            time,
            layers: BTreeMap::new(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_now_round_trips_through_json() {
        let obj: TimelineObject = serde_json::from_value(json!({
            "id": "obj0",
            "trigger": { "type": "absolute", "value": "now" },
            "layer": "L"
        }))
        .unwrap();
        assert!(obj.trigger.is_now());
        assert_eq!(obj.duration, 0);
        assert!(!obj.is_group);

        let back = serde_json::to_value(&obj.trigger).unwrap();
        assert_eq!(back, json!({ "type": "absolute", "value": "now" }));
    }

    #[test]
    fn numeric_absolute_trigger_parses() {
        let t: Trigger = serde_json::from_value(json!({ "type": "absolute", "value": -1000 })).unwrap();
        assert_eq!(t, Trigger::Absolute(TriggerTime::At(-1000)));
        assert!(!t.is_now());
    }

    #[test]
    fn unknown_keyword_is_rejected() {
        let r: Result<Trigger, _> =
            serde_json::from_value(json!({ "type": "absolute", "value": "later" }));
        assert!(r.is_err());
    }

    #[test]
    fn resolved_layer_content_accessors() {
        let layer = ResolvedLayer {
            id: "o".into(),
            layer: "L".into(),
            content: json!({
                "type": "video",
                "attributes": { "file": "AMB" },
                "callback": "onAir",
                "callback_data": { "story": 7 }
            }),
            start_time: 0,
            end_time: None,
            mixer: BTreeMap::new(),
            is_background: false,
            original_layer: None,
        };
        assert_eq!(layer.content_type(), Some("video"));
        assert_eq!(layer.attributes().unwrap()["file"], json!("AMB"));
        assert_eq!(layer.callback(), Some("onAir"));
        assert_eq!(layer.callback_data(), json!({ "story": 7 }));
    }

    #[test]
    fn camel_case_callback_keys_are_accepted() {
        let layer = ResolvedLayer {
            id: "o".into(),
            layer: "L".into(),
            content: json!({ "callBack": "onAir", "callBackData": { "story": 8 } }),
            start_time: 0,
            end_time: None,
            mixer: BTreeMap::new(),
            is_background: false,
            original_layer: None,
        };
        assert_eq!(layer.callback(), Some("onAir"));
        assert_eq!(layer.callback_data(), json!({ "story": 8 }));
    }
}
