use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The single piece of work a plan decides on for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Replace,
    Delete,
    Noop,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Noop => "noop",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the plan came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    /// Nothing tracked yet.
    FirstProvision,
    /// Tracked, but the live object is gone.
    Vanished,
    /// Live object (or recorded state) differs from the desired config.
    Drift,
    /// Desired config withdrawn.
    Removed,
    InSync,
}

impl Cause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstProvision => "first provision",
            Self::Vanished => "vanished",
            Self::Drift => "drift",
            Self::Removed => "removed",
            Self::InSync => "in sync",
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured before/after for a single field that doesn't match desired state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDrift {
    /// Top-level attribute name, e.g. "size"
    pub field: String,
    /// What we want
    pub expected: Value,
    /// What the backend has (or what was last recorded)
    pub actual: Value,
    /// The backend cannot change this field in place
    pub forces_replacement: bool,
}

impl FieldDrift {
    pub fn mutable(field: impl Into<String>, expected: Value, actual: Value) -> Self {
        Self {
            field: field.into(),
            expected,
            actual,
            forces_replacement: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOptions {
    /// Consult the backend via describe. When off, drift is judged from the
    /// recorded state alone.
    pub refresh: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self { refresh: true }
    }
}

/// Outcome of planning one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub action: Action,
    pub cause: Cause,
    /// Attribute names for reporting. Not authoritative for execution.
    pub changed_attributes: Vec<String>,
    pub drift: Vec<FieldDrift>,
}

impl PlanResult {
    pub(crate) fn bare(action: Action, cause: Cause) -> Self {
        Self {
            action,
            cause,
            changed_attributes: vec![],
            drift: vec![],
        }
    }

    /// Classify a drift list. Any field that forces replacement wins over
    /// in-place changes; an empty list means in sync.
    pub(crate) fn from_drift(drift: Vec<FieldDrift>) -> Self {
        if drift.is_empty() {
            return Self::bare(Action::Noop, Cause::InSync);
        }
        let action = if drift.iter().any(|d| d.forces_replacement) {
            Action::Replace
        } else {
            Action::Update
        };
        Self {
            action,
            cause: Cause::Drift,
            changed_attributes: drift.iter().map(|d| d.field.clone()).collect(),
            drift,
        }
    }
}
