use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::OpContext;
use crate::diff;
use crate::error::HandlerError;
use crate::plan::FieldDrift;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The primitive a handler was asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Describe,
    Create,
    Adopt,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Describe => "describe",
            Self::Create => "create",
            Self::Adopt => "adopt",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Result of a live read.
#[derive(Debug, Clone, PartialEq)]
pub enum Live<C> {
    /// The object is gone. Not an error.
    Absent,
    /// The object exists and its config could be read back.
    Present(C),
    /// The object exists but its config can't be read back cheaply.
    /// Planning falls back to comparing against the recorded state.
    Opaque,
}

/// One impl per resource type. Each impl holds whatever client it needs.
///
/// `Config` is the desired shape the caller declares; `State` is what gets
/// recorded after apply and must be enough on its own to find and delete
/// the remote object later.
///
/// Methods return boxed futures for dyn compatibility.
pub trait ResourceHandler: Send + Sync + 'static {
    type Config: Serialize + DeserializeOwned + Send + Sync;
    type State: Serialize + DeserializeOwned + Send + Sync;

    /// Registry key, e.g. "s3_bucket".
    fn resource_type(&self) -> &str;

    /// Top-level config fields the backend cannot change in place.
    fn immutable_fields(&self) -> &[&str] {
        &[]
    }

    /// Read the live object identified by `state`.
    fn describe<'a>(
        &'a self,
        ctx: &'a OpContext,
        state: &'a Self::State,
    ) -> BoxFuture<'a, Result<Live<Self::Config>, HandlerError>>;

    /// Create the object. Returns `AlreadyExists` when an object with the
    /// same identity is already there.
    fn create<'a>(
        &'a self,
        ctx: &'a OpContext,
        config: &'a Self::Config,
    ) -> BoxFuture<'a, Result<Self::State, HandlerError>>;

    /// Apply the mutable subset of `config`. Must be safe to call when
    /// nothing actually changed. `NotFound` means the object disappeared.
    fn update<'a>(
        &'a self,
        ctx: &'a OpContext,
        config: &'a Self::Config,
        state: &'a Self::State,
    ) -> BoxFuture<'a, Result<Self::State, HandlerError>>;

    /// Tear the object down. An already-gone object is success.
    fn delete<'a>(
        &'a self,
        ctx: &'a OpContext,
        state: &'a Self::State,
    ) -> BoxFuture<'a, Result<(), HandlerError>>;

    /// Called after `create` reported `AlreadyExists`. Return the state of
    /// the existing object only if it is confirmed to belong to
    /// `ctx.owner()`; `None` surfaces the conflict to the caller.
    fn adopt<'a>(
        &'a self,
        _ctx: &'a OpContext,
        _config: &'a Self::Config,
    ) -> BoxFuture<'a, Result<Option<Self::State>, HandlerError>> {
        Box::pin(async { Ok(None) })
    }

    /// Compare desired against live config. The default walks top-level
    /// fields and consults `immutable_fields`.
    fn diff(
        &self,
        desired: &Self::Config,
        live: &Self::Config,
    ) -> Result<Vec<FieldDrift>, HandlerError> {
        let desired = serde_json::to_value(desired)?;
        let live = serde_json::to_value(live)?;
        Ok(diff::field_diff(&desired, &live, self.immutable_fields()))
    }
}
