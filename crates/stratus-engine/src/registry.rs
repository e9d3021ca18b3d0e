use std::collections::HashMap;
use std::fmt;

use crate::codec;
use crate::context::OpContext;
use crate::error::{ApplyError, EngineError};
use crate::executor;
use crate::handler::{BoxFuture, ResourceHandler};
use crate::plan::{PlanOptions, PlanResult};
use crate::planner;
use crate::reconciler::ApplyOutcome;
use crate::state::PriorState;

/// Blob-level view of a handler. Decoding happens here so the planner and
/// executor only ever see typed values.
pub(crate) trait ErasedHandler: Send + Sync {
    fn plan<'a>(
        &'a self,
        ctx: &'a OpContext,
        desired: Option<&'a [u8]>,
        prior: Option<&'a [u8]>,
        options: PlanOptions,
    ) -> BoxFuture<'a, Result<PlanResult, EngineError>>;

    /// Apply `planned` if given, otherwise plan first with a live read.
    fn apply<'a>(
        &'a self,
        ctx: &'a OpContext,
        desired: Option<&'a [u8]>,
        prior: Option<&'a [u8]>,
        planned: Option<&'a PlanResult>,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ApplyError>>;
}

struct Typed<H>(H);

impl<H: ResourceHandler> ErasedHandler for Typed<H> {
    fn plan<'a>(
        &'a self,
        ctx: &'a OpContext,
        desired: Option<&'a [u8]>,
        prior: Option<&'a [u8]>,
        options: PlanOptions,
    ) -> BoxFuture<'a, Result<PlanResult, EngineError>> {
        Box::pin(async move {
            let desired = codec::decode_desired::<H::Config>(desired)?;
            // A withdrawn config plans a delete whatever the prior blob holds,
            // so it is only checked for presence on that path.
            let prior = match (&desired, prior) {
                (None, Some(_)) => PriorState::Untracked,
                (_, prior) => codec::decode_prior::<H::State>(prior)?,
            };
            planner::plan(&self.0, ctx, desired.as_ref(), &prior, options).await
        })
    }

    fn apply<'a>(
        &'a self,
        ctx: &'a OpContext,
        desired: Option<&'a [u8]>,
        prior: Option<&'a [u8]>,
        planned: Option<&'a PlanResult>,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ApplyError>> {
        Box::pin(async move {
            let desired = codec::decode_desired::<H::Config>(desired)?;
            let prior = codec::decode_prior::<H::State>(prior)?;

            let plan = match planned {
                Some(plan) => plan.clone(),
                None => {
                    planner::plan(&self.0, ctx, desired.as_ref(), &prior, PlanOptions::default())
                        .await?
                }
            };

            let new_state =
                executor::execute(&self.0, ctx, plan.action, desired.as_ref(), &prior).await?;

            Ok(ApplyOutcome {
                action: plan.action,
                changed_attributes: plan.changed_attributes,
                new_state,
            })
        })
    }
}

/// Maps resource type names to handlers. Built once at startup, then
/// shared read-only.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: ResourceHandler>(&mut self, handler: H) -> Result<(), EngineError> {
        let resource_type = handler.resource_type().to_string();
        if self.handlers.contains_key(&resource_type) {
            return Err(EngineError::DuplicateResourceType(resource_type));
        }
        tracing::debug!(resource_type = %resource_type, "registered resource handler");
        self.handlers.insert(resource_type, Box::new(Typed(handler)));
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<H: ResourceHandler>(mut self, handler: H) -> Result<Self, EngineError> {
        self.register(handler)?;
        Ok(self)
    }

    pub fn contains(&self, resource_type: &str) -> bool {
        self.handlers.contains_key(resource_type)
    }

    /// Registered type names, sorted.
    pub fn resource_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn get(&self, resource_type: &str) -> Result<&dyn ErasedHandler, EngineError> {
        self.handlers
            .get(resource_type)
            .map(|h| h.as_ref())
            .ok_or_else(|| EngineError::UnknownResourceType(resource_type.to_string()))
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("resource_types", &self.resource_types())
            .finish()
    }
}
