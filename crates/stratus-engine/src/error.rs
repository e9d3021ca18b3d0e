use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::codec::BlobKind;
use crate::handler::Operation;
use crate::plan::Action;
use crate::state::StateAfterFailure;

/// Failure classification a resource handler reports back to the engine.
///
/// Handlers map their backend's errors onto these classes; the engine only
/// ever branches on the class, never on the message.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("remote object not found: {0}")]
    NotFound(String),

    #[error("remote object already exists: {0}")]
    AlreadyExists(String),

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Remote(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Remote(_) | Self::Serialization(_) => ErrorKind::Remote,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Coarse error class surfaced to callers of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Decode,
    NotFound,
    AlreadyExists,
    Timeout,
    Cancelled,
    Remote,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::InvalidRequest => "invalid_request",
            Self::Decode => "decode",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Remote => "remote",
        };
        f.write_str(s)
    }
}

/// Where in a reconciliation an error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Plan,
    Apply(Action),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Plan => f.write_str("plan"),
            Self::Apply(action) => write!(f, "apply ({action})"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("resource type registered twice: {0}")]
    DuplicateResourceType(String),

    #[error("malformed {blob} at `{path}`: {message}")]
    Decode {
        blob: BlobKind,
        path: String,
        message: String,
    },

    #[error("failed to encode {blob}: {source}")]
    Encode {
        blob: BlobKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("{resource_type}: {operation} during {stage} failed: {source}")]
    Handler {
        resource_type: String,
        stage: Stage,
        operation: Operation,
        #[source]
        source: HandlerError,
    },
}

impl EngineError {
    pub fn handler(
        resource_type: &str,
        stage: Stage,
        operation: Operation,
        source: HandlerError,
    ) -> Self {
        Self::Handler {
            resource_type: resource_type.to_string(),
            stage,
            operation,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_)
            | Self::UnknownResourceType(_)
            | Self::DuplicateResourceType(_) => ErrorKind::InvalidRequest,
            Self::Decode { .. } | Self::Encode { .. } => ErrorKind::Decode,
            Self::Handler { source, .. } => source.kind(),
        }
    }

    /// Only bounded waits that ran out of budget are worth retrying as-is.
    /// Everything else needs a fresh plan first.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

/// A failed apply, plus what the caller should record as state afterwards.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ApplyError {
    #[source]
    pub source: EngineError,
    pub state: StateAfterFailure,
}

impl ApplyError {
    /// The prior state still describes reality.
    pub fn unchanged(source: EngineError) -> Self {
        Self {
            source,
            state: StateAfterFailure::Unchanged,
        }
    }

    /// The tracked object is gone and nothing replaced it.
    pub fn untracked(source: EngineError) -> Self {
        Self {
            source,
            state: StateAfterFailure::Untracked,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

impl From<EngineError> for ApplyError {
    fn from(source: EngineError) -> Self {
        Self::unchanged(source)
    }
}

/// Walk the full error chain and join all causes into one string.
///
/// SDK errors often have terse `Display` impls (e.g. "service error")
/// but useful detail in the source chain.
pub fn format_err_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
