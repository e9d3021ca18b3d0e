//! Decoding and encoding of the opaque config/state blobs.
//!
//! Blobs are JSON. Decoding reports the path of the field that failed so a
//! truncated or hand-edited state file points at the offending key.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::EngineError;
use crate::state::PriorState;

/// Which input a blob came from, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    DesiredConfig,
    PriorState,
    NewState,
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::DesiredConfig => "desired config",
            Self::PriorState => "prior state",
            Self::NewState => "new state",
        };
        f.write_str(s)
    }
}

/// Decode a present blob into `T`.
///
/// Missing required fields are an error; nothing is defaulted unless the
/// type itself opts in with `#[serde(default)]`.
pub fn decode<T: DeserializeOwned>(blob: &[u8], kind: BlobKind) -> Result<T, EngineError> {
    let mut de = serde_json::Deserializer::from_slice(blob);
    let value = serde_path_to_error::deserialize(&mut de).map_err(|e| EngineError::Decode {
        blob: kind,
        path: e.path().to_string(),
        message: e.inner().to_string(),
    })?;
    de.end().map_err(|e| EngineError::Decode {
        blob: kind,
        path: ".".to_string(),
        message: e.to_string(),
    })?;
    Ok(value)
}

/// Decode an optional desired config. `None` stays `None` without parsing.
pub fn decode_desired<T: DeserializeOwned>(blob: Option<&[u8]>) -> Result<Option<T>, EngineError> {
    blob.map(|b| decode(b, BlobKind::DesiredConfig)).transpose()
}

/// Decode an optional prior state, recognising the empty untracked marker.
pub fn decode_prior<T: DeserializeOwned>(
    blob: Option<&[u8]>,
) -> Result<PriorState<'_, T>, EngineError> {
    match blob {
        None => Ok(PriorState::Absent),
        Some([]) => Ok(PriorState::Untracked),
        Some(raw) => Ok(PriorState::Tracked {
            state: decode(raw, BlobKind::PriorState)?,
            raw,
        }),
    }
}

pub fn encode<T: Serialize>(value: &T, kind: BlobKind) -> Result<Vec<u8>, EngineError> {
    serde_json::to_vec(value).map_err(|source| EngineError::Encode { blob: kind, source })
}

pub fn to_value<T: Serialize>(value: &T, kind: BlobKind) -> Result<serde_json::Value, EngineError> {
    serde_json::to_value(value).map_err(|source| EngineError::Encode { blob: kind, source })
}
