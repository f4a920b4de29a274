//! Condition management helpers following Kubernetes API conventions
//!
//! A pass starts by resetting the tracked conditions to Unknown, sets them as it
//! learns things, and finishes by restoring transition times of conditions whose
//! status did not actually move and by mirroring the aggregate `Ready` condition.

use chrono::{SecondsFormat, Utc};

use crate::crd::{Condition, Severity};

/// Standard condition types
pub const CONDITION_TYPE_READY: &str = "Ready";
pub const CONDITION_TYPE_INPUT_READY: &str = "InputReady";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";
pub const CONDITION_STATUS_UNKNOWN: &str = "Unknown";

/// Reasons
pub const REASON_READY: &str = "Ready";
pub const REASON_INITIALIZING: &str = "Initializing";
pub const REASON_ERROR: &str = "Error";

pub const READY_INIT_MESSAGE: &str = "Setup started";
pub const READY_MESSAGE: &str = "Setup complete";

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn unknown_condition(type_: &str, reason: &str, message: &str) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: CONDITION_STATUS_UNKNOWN.to_string(),
        severity: None,
        last_transition_time: now(),
        reason: reason.to_string(),
        message: message.to_string(),
    }
}

pub fn true_condition(type_: &str, message: &str) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: CONDITION_STATUS_TRUE.to_string(),
        severity: None,
        last_transition_time: now(),
        reason: REASON_READY.to_string(),
        message: message.to_string(),
    }
}

pub fn false_condition(type_: &str, reason: &str, severity: Severity, message: &str) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: CONDITION_STATUS_FALSE.to_string(),
        severity: Some(severity),
        last_transition_time: now(),
        reason: reason.to_string(),
        message: message.to_string(),
    }
}

/// Ordered condition list. `Ready` always sorts first, the rest by type.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn new(conditions: Vec<Condition>) -> Self {
        let mut list = Self(Vec::new());
        for c in conditions {
            list.set(c);
        }
        list
    }

    /// Reset the listed conditions (and `Ready`) to their initial Unknown state,
    /// dropping anything else.
    pub fn init(&mut self, initial: Vec<Condition>) {
        self.0.clear();
        if !initial.iter().any(|c| c.type_ == CONDITION_TYPE_READY) {
            self.set(unknown_condition(
                CONDITION_TYPE_READY,
                REASON_INITIALIZING,
                READY_INIT_MESSAGE,
            ));
        }
        for c in initial {
            self.set(c);
        }
    }

    /// Upsert a condition. The transition time only moves when status changes.
    pub fn set(&mut self, mut condition: Condition) {
        if let Some(existing) = self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
            return;
        }
        self.0.push(condition);
        self.0.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    }

    pub fn mark_true(&mut self, type_: &str, message: &str) {
        self.set(true_condition(type_, message));
    }

    pub fn mark_false(&mut self, type_: &str, reason: &str, severity: Severity, message: &str) {
        self.set(false_condition(type_, reason, severity, message));
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    pub fn is_unknown(&self, type_: &str) -> bool {
        self.get(type_).map(Condition::is_unknown).unwrap_or(true)
    }

    /// Copy back transition times from `saved` for every condition whose status
    /// is unchanged.
    pub fn restore_last_transition_times(&mut self, saved: &Conditions) {
        for c in &mut self.0 {
            if let Some(old) = saved.get(&c.type_) {
                if old.status == c.status {
                    c.last_transition_time = old.last_transition_time.clone();
                }
            }
        }
    }

    /// Summarize every condition except `type_` into a condition of that type.
    ///
    /// A False condition wins (most severe first), then the first Unknown one.
    /// Returns `None` when there is nothing to summarize.
    pub fn mirror(&self, type_: &str) -> Option<Condition> {
        let others: Vec<&Condition> = self.0.iter().filter(|c| c.type_ != type_).collect();
        if others.is_empty() {
            return None;
        }

        let worst_false = others
            .iter()
            .filter(|c| c.is_false())
            .min_by_key(|c| c.severity.unwrap_or(Severity::Info));
        if let Some(c) = worst_false {
            return Some(false_condition(
                type_,
                &c.reason,
                c.severity.unwrap_or(Severity::Error),
                &c.message,
            ));
        }

        if let Some(c) = others.iter().find(|c| c.is_unknown()) {
            return Some(unknown_condition(type_, &c.reason, &c.message));
        }

        Some(true_condition(type_, READY_MESSAGE))
    }

    pub fn as_slice(&self) -> &[Condition] {
        &self.0
    }
}

fn sort_key(c: &Condition) -> (bool, &str) {
    (c.type_ != CONDITION_TYPE_READY, c.type_.as_str())
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}
