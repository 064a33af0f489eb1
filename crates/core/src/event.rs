//! Lifecycle events streamed from a running request to its consumer.
//!
//! Every event is published by the request's single worker and observed by
//! the consumer in publish order. A `log_update` attaches to the earlier
//! `log_start` carrying the same [`StepKey`]; the consumer reconciles them.

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::plan::ActionPlan;

// ── Step keys ─────────────────────────────────────────────────────────────

/// Whether a step is a top-level action or the reasoning between two actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepKind {
    Action,
    Reasoning,
}

/// Identifier correlating a step's start with its completion.
///
/// Actions are numbered by the per-request action counter (ordinal 0 is the
/// planning step). `Reasoning` with ordinal N is the model call that happens
/// after action N and before action N+1. On the wire an action is the
/// integer `N` and a reasoning step is `N + 0.5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepKey {
    pub ordinal: u32,
    pub kind: StepKind,
}

impl StepKey {
    pub const PLANNING: StepKey = StepKey::action(0);

    pub const fn action(ordinal: u32) -> Self {
        Self {
            ordinal,
            kind: StepKind::Action,
        }
    }

    pub const fn reasoning(after_action: u32) -> Self {
        Self {
            ordinal: after_action,
            kind: StepKind::Reasoning,
        }
    }

    pub fn is_reasoning(&self) -> bool {
        self.kind == StepKind::Reasoning
    }

    /// The numeric wire form (`N` or `N + 0.5`).
    pub fn as_f64(&self) -> f64 {
        match self.kind {
            StepKind::Action => f64::from(self.ordinal),
            StepKind::Reasoning => f64::from(self.ordinal) + 0.5,
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StepKind::Action => write!(f, "{}", self.ordinal),
            StepKind::Reasoning => write!(f, "{}.5", self.ordinal),
        }
    }
}

impl Serialize for StepKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.kind {
            StepKind::Action => serializer.serialize_u32(self.ordinal),
            StepKind::Reasoning => serializer.serialize_f64(self.as_f64()),
        }
    }
}

struct StepKeyVisitor;

impl Visitor<'_> for StepKeyVisitor {
    type Value = StepKey;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative integer or an integer plus 0.5")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<StepKey, E> {
        u32::try_from(v)
            .map(StepKey::action)
            .map_err(|_| E::custom(format!("step key {v} out of range")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<StepKey, E> {
        u64::try_from(v)
            .map_err(|_| E::custom(format!("negative step key {v}")))
            .and_then(|v| self.visit_u64(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<StepKey, E> {
        if !v.is_finite() || v < 0.0 || v > f64::from(u32::MAX) {
            return Err(E::custom(format!("step key {v} out of range")));
        }
        let whole = v.trunc();
        let ordinal = whole as u32;
        match v - whole {
            f if f == 0.0 => Ok(StepKey::action(ordinal)),
            f if f == 0.5 => Ok(StepKey::reasoning(ordinal)),
            _ => Err(E::custom(format!("step key {v} is neither N nor N + 0.5"))),
        }
    }
}

impl<'de> Deserialize<'de> for StepKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(StepKeyVisitor)
    }
}

// ── Events ────────────────────────────────────────────────────────────────

/// Lifecycle status carried by step events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

/// Discriminant of an [`Event`], mirroring its `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LogStart,
    LogUpdate,
    Status,
    Done,
    Error,
    Cancelled,
}

impl EventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}

/// Display metadata for a step. Opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDisplay {
    pub icon: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepDisplay {
    pub fn new(icon: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            icon: icon.into(),
            label: label.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Events emitted while a request executes.
///
/// Wire protocol (`type` tag):
/// - `log_start`  a step began
/// - `log_update` a step finished; `duration` in seconds
/// - `status`     free-form progress message
/// - `done`       final answer (terminal)
/// - `error`      run failed (terminal)
/// - `cancelled`  run aborted by its token (terminal)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    LogStart {
        step: StepKey,
        icon: String,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        status: StepStatus,
        start_time: DateTime<Utc>,
    },

    LogUpdate {
        step: StepKey,
        icon: String,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
    },

    Status {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
    },

    Done {
        answer: String,
        steps: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan: Option<ActionPlan>,
    },

    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_step: Option<StepKey>,
    },

    Cancelled {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_step: Option<StepKey>,
    },
}

impl Event {
    pub fn log_start(step: StepKey, display: StepDisplay, start_time: DateTime<Utc>) -> Self {
        Self::LogStart {
            step,
            icon: display.icon,
            label: display.label,
            detail: display.detail,
            status: StepStatus::Started,
            start_time,
        }
    }

    pub fn log_update(
        step: StepKey,
        display: StepDisplay,
        status: StepStatus,
        duration: Option<f64>,
    ) -> Self {
        Self::LogUpdate {
            step,
            icon: display.icon,
            label: display.label,
            detail: display.detail,
            status,
            duration,
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            tool: None,
        }
    }

    pub fn error(message: impl Into<String>, last_step: Option<StepKey>) -> Self {
        Self::Error {
            message: message.into(),
            last_step,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::LogStart { .. } => EventKind::LogStart,
            Self::LogUpdate { .. } => EventKind::LogUpdate,
            Self::Status { .. } => EventKind::Status,
            Self::Done { .. } => EventKind::Done,
            Self::Error { .. } => EventKind::Error,
            Self::Cancelled { .. } => EventKind::Cancelled,
        }
    }

    /// SSE event name for this event.
    pub fn event_type(&self) -> &'static str {
        match self.kind() {
            EventKind::LogStart => "log_start",
            EventKind::LogUpdate => "log_update",
            EventKind::Status => "status",
            EventKind::Done => "done",
            EventKind::Error => "error",
            EventKind::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// The step key of a `log_start` / `log_update`.
    pub fn step(&self) -> Option<StepKey> {
        match self {
            Self::LogStart { step, .. } | Self::LogUpdate { step, .. } => Some(*step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_keys_serialize_as_numbers() {
        assert_eq!(serde_json::to_string(&StepKey::action(2)).unwrap(), "2");
        assert_eq!(serde_json::to_string(&StepKey::reasoning(2)).unwrap(), "2.5");
    }

    #[test]
    fn step_keys_deserialize_from_numbers() {
        let k: StepKey = serde_json::from_str("3").unwrap();
        assert_eq!(k, StepKey::action(3));
        let k: StepKey = serde_json::from_str("3.5").unwrap();
        assert_eq!(k, StepKey::reasoning(3));
        let k: StepKey = serde_json::from_str("4.0").unwrap();
        assert_eq!(k, StepKey::action(4));
    }

    #[test]
    fn step_keys_reject_other_fractions() {
        assert!(serde_json::from_str::<StepKey>("1.25").is_err());
        assert!(serde_json::from_str::<StepKey>("-1").is_err());
    }

    #[test]
    fn reasoning_sorts_between_actions() {
        let mut keys = vec![
            StepKey::action(2),
            StepKey::reasoning(1),
            StepKey::action(1),
            StepKey::reasoning(0),
        ];
        keys.sort();
        let wire: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(wire, ["0.5", "1", "1.5", "2"]);
    }

    #[test]
    fn reasoning_and_action_never_collide() {
        assert_ne!(StepKey::action(1), StepKey::reasoning(1));
        assert!(StepKey::reasoning(1).is_reasoning());
        assert!((StepKey::reasoning(1).as_f64() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn log_start_wire_format() {
        let event = Event::log_start(
            StepKey::action(1),
            StepDisplay::new("🔍", "Checking database").with_detail("gmail"),
            Utc::now(),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "log_start");
        assert_eq!(json["step"], 1);
        assert_eq!(json["status"], "started");
        assert_eq!(json["detail"], "gmail");
        assert!(json["start_time"].is_string());
    }

    #[test]
    fn log_update_omits_missing_duration() {
        let event = Event::log_update(
            StepKey::reasoning(0),
            StepDisplay::new("💭", "Thinking"),
            StepStatus::Failed,
            None,
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"log_update""#));
        assert!(json.contains(r#""step":0.5"#));
        assert!(!json.contains("duration"));
    }

    #[test]
    fn terminal_kinds() {
        assert!(Event::error("boom", None).is_terminal());
        assert!(!Event::status("working").is_terminal());
        assert!(
            Event::Cancelled {
                message: "stop".into(),
                last_step: Some(StepKey::action(1)),
            }
            .is_terminal()
        );
        assert_eq!(Event::status("x").event_type(), "status");
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"log_update","step":2.5,"icon":"💭","label":"Thinking","status":"completed","duration":0.25}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.step(), Some(StepKey::reasoning(2)));
        match event {
            Event::LogUpdate {
                status, duration, ..
            } => {
                assert_eq!(status, StepStatus::Completed);
                assert_eq!(duration, Some(0.25));
            }
            _ => panic!("Wrong variant"),
        }
    }
}
