use serde::{Deserialize, Serialize};

/// Recorded state as handed to the engine by the caller, after decoding.
///
/// `Untracked` is the explicit empty blob a delete (or a half-finished
/// replace) leaves behind. It is distinct from `Absent`, which means the
/// caller passed nothing at all.
#[derive(Debug)]
pub enum PriorState<'a, S> {
    Absent,
    Untracked,
    Tracked { state: S, raw: &'a [u8] },
}

impl<'a, S> PriorState<'a, S> {
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Absent)
    }

    pub fn tracked(&self) -> Option<(&S, &'a [u8])> {
        match self {
            Self::Tracked { state, raw } => Some((state, *raw)),
            _ => None,
        }
    }
}

/// State produced by a successful apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewState {
    Tracked(Vec<u8>),
    Untracked,
}

impl NewState {
    pub fn is_untracked(&self) -> bool {
        matches!(self, Self::Untracked)
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Tracked(bytes) => bytes,
            Self::Untracked => &[],
        }
    }

    /// Byte form for durable storage. `Untracked` is the empty blob.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Tracked(bytes) => bytes,
            Self::Untracked => Vec::new(),
        }
    }
}

/// What the caller should store when an apply fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateAfterFailure {
    /// Keep the prior state; it still identifies the live object.
    Unchanged,
    /// Store the empty blob; the prior object was deleted.
    Untracked,
}
