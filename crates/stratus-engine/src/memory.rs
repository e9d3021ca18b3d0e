//! In-process backend and a reference handler built on it.
//!
//! `MemoryBackend` stands in for a remote API: objects get backend-assigned
//! ids, take a configurable number of polls to become ready, and every call
//! is recorded so callers can check exactly what was sent. Faults can be
//! queued per operation. `MemoryVolumeHandler` is the smallest complete
//! handler: a volume with an immutable `name` and a mutable `size`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::context::{OpContext, wait_for};
use crate::error::HandlerError;
use crate::handler::{BoxFuture, Live, Operation, ResourceHandler};

/// A call as the backend saw it, keyed by volume id (or name for create
/// and adopt).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Describe(String),
    Create(String),
    Adopt(String),
    Update(String),
    Delete(String),
}

/// Failure to inject into the next call of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Remote(String),
    NotFound,
    /// Never returns.
    Hang,
}

impl Fault {
    async fn trigger(self) -> HandlerError {
        match self {
            Self::Remote(message) => HandlerError::Remote(message),
            Self::NotFound => HandlerError::NotFound("injected".to_string()),
            Self::Hang => std::future::pending().await,
        }
    }
}

#[derive(Debug, Clone)]
struct Volume {
    id: String,
    name: String,
    size: u64,
    owner: String,
    polls_until_ready: u32,
}

#[derive(Debug, Default)]
struct Inner {
    volumes: BTreeMap<String, Volume>,
    calls: Vec<Call>,
    faults: Vec<(Operation, Fault)>,
    settle_polls: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of readiness polls a new volume needs before it settles.
    pub async fn set_settle_polls(&self, polls: u32) {
        self.inner.lock().await.settle_polls = polls;
    }

    pub async fn fail_next(&self, operation: Operation, fault: Fault) {
        self.inner.lock().await.faults.push((operation, fault));
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.inner.lock().await.volumes.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.volumes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drift: someone deleted the volume behind our back.
    pub async fn remove_out_of_band(&self, id: &str) {
        self.inner.lock().await.volumes.remove(id);
    }

    /// Drift: someone resized the volume behind our back.
    pub async fn resize_out_of_band(&self, id: &str, size: u64) {
        if let Some(volume) = self.inner.lock().await.volumes.get_mut(id) {
            volume.size = size;
        }
    }

    /// Seed a ready volume created by `owner`. Returns its id.
    pub async fn insert(&self, name: &str, size: u64, owner: &str) -> String {
        let id = new_volume_id();
        self.inner.lock().await.volumes.insert(
            id.clone(),
            Volume {
                id: id.clone(),
                name: name.to_string(),
                size,
                owner: owner.to_string(),
                polls_until_ready: 0,
            },
        );
        id
    }

    /// Record the call and fail it if a fault is queued for `operation`.
    async fn enter(&self, call: Call, operation: Operation) -> Result<(), HandlerError> {
        let fault = {
            let mut inner = self.inner.lock().await;
            inner.calls.push(call);
            inner
                .faults
                .iter()
                .position(|(op, _)| *op == operation)
                .map(|i| inner.faults.remove(i).1)
        };
        match fault {
            Some(fault) => Err(fault.trigger().await),
            None => Ok(()),
        }
    }

    async fn poll_ready(&self, id: &str) -> Result<Option<()>, HandlerError> {
        let mut inner = self.inner.lock().await;
        let volume = inner
            .volumes
            .get_mut(id)
            .ok_or_else(|| HandlerError::NotFound(id.to_string()))?;
        if volume.polls_until_ready == 0 {
            return Ok(Some(()));
        }
        volume.polls_until_ready -= 1;
        Ok(None)
    }
}

fn new_volume_id() -> String {
    format!("vol-{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeState {
    pub id: String,
    pub name: String,
    pub size: u64,
}

impl From<&Volume> for VolumeState {
    fn from(volume: &Volume) -> Self {
        Self {
            id: volume.id.clone(),
            name: volume.name.clone(),
            size: volume.size,
        }
    }
}

pub struct MemoryVolumeHandler {
    backend: MemoryBackend,
    opaque: bool,
}

impl MemoryVolumeHandler {
    pub const RESOURCE_TYPE: &'static str = "memory_volume";

    pub fn new(backend: MemoryBackend) -> Self {
        Self {
            backend,
            opaque: false,
        }
    }

    /// Report existing volumes as `Live::Opaque`, like a backend whose
    /// config can't be read back.
    pub fn with_opaque_reads(mut self) -> Self {
        self.opaque = true;
        self
    }
}

impl ResourceHandler for MemoryVolumeHandler {
    type Config = VolumeConfig;
    type State = VolumeState;

    fn resource_type(&self) -> &str {
        Self::RESOURCE_TYPE
    }

    fn immutable_fields(&self) -> &[&str] {
        &["name"]
    }

    fn describe<'a>(
        &'a self,
        _ctx: &'a OpContext,
        state: &'a VolumeState,
    ) -> BoxFuture<'a, Result<Live<VolumeConfig>, HandlerError>> {
        Box::pin(async move {
            self.backend
                .enter(Call::Describe(state.id.clone()), Operation::Describe)
                .await?;
            let inner = self.backend.inner.lock().await;
            Ok(match inner.volumes.get(&state.id) {
                Some(_) if self.opaque => Live::Opaque,
                Some(volume) => Live::Present(VolumeConfig {
                    name: volume.name.clone(),
                    size: volume.size,
                }),
                None => Live::Absent,
            })
        })
    }

    fn create<'a>(
        &'a self,
        ctx: &'a OpContext,
        config: &'a VolumeConfig,
    ) -> BoxFuture<'a, Result<VolumeState, HandlerError>> {
        Box::pin(async move {
            self.backend
                .enter(Call::Create(config.name.clone()), Operation::Create)
                .await?;

            let state = {
                let mut inner = self.backend.inner.lock().await;
                if inner.volumes.values().any(|v| v.name == config.name) {
                    return Err(HandlerError::AlreadyExists(config.name.clone()));
                }
                let volume = Volume {
                    id: new_volume_id(),
                    name: config.name.clone(),
                    size: config.size,
                    owner: ctx.owner().to_string(),
                    polls_until_ready: inner.settle_polls,
                };
                let state = VolumeState::from(&volume);
                inner.volumes.insert(volume.id.clone(), volume);
                state
            };

            let backend = &self.backend;
            let id = state.id.as_str();
            wait_for(ctx, "volume ready", move || backend.poll_ready(id)).await?;
            tracing::info!(id = %state.id, name = %state.name, "volume created");
            Ok(state)
        })
    }

    fn adopt<'a>(
        &'a self,
        ctx: &'a OpContext,
        config: &'a VolumeConfig,
    ) -> BoxFuture<'a, Result<Option<VolumeState>, HandlerError>> {
        Box::pin(async move {
            self.backend
                .enter(Call::Adopt(config.name.clone()), Operation::Adopt)
                .await?;
            let inner = self.backend.inner.lock().await;
            Ok(inner
                .volumes
                .values()
                .find(|v| v.name == config.name && v.owner == ctx.owner())
                .map(VolumeState::from))
        })
    }

    fn update<'a>(
        &'a self,
        _ctx: &'a OpContext,
        config: &'a VolumeConfig,
        state: &'a VolumeState,
    ) -> BoxFuture<'a, Result<VolumeState, HandlerError>> {
        Box::pin(async move {
            self.backend
                .enter(Call::Update(state.id.clone()), Operation::Update)
                .await?;
            let mut inner = self.backend.inner.lock().await;
            let volume = inner
                .volumes
                .get_mut(&state.id)
                .ok_or_else(|| HandlerError::NotFound(state.id.clone()))?;
            if volume.size != config.size {
                tracing::info!(id = %volume.id, from = volume.size, to = config.size, "resizing volume");
                volume.size = config.size;
            }
            Ok(VolumeState::from(&*volume))
        })
    }

    fn delete<'a>(
        &'a self,
        _ctx: &'a OpContext,
        state: &'a VolumeState,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            self.backend
                .enter(Call::Delete(state.id.clone()), Operation::Delete)
                .await?;
            match self.backend.inner.lock().await.volumes.remove(&state.id) {
                Some(_) => tracing::info!(id = %state.id, "volume deleted"),
                None => tracing::debug!(id = %state.id, "volume already gone"),
            }
            Ok(())
        })
    }
}
