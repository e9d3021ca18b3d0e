use std::sync::Arc;

use crate::context::OpContext;
use crate::error::{ApplyError, EngineError};
use crate::plan::{Action, PlanOptions, PlanResult};
use crate::registry::HandlerRegistry;
use crate::state::NewState;

/// Inputs for one resource, exactly as the caller stores them.
///
/// `desired: None` means the resource should not exist. `prior: None` means
/// nothing was ever recorded; `Some(b"")` is the untracked marker a delete
/// leaves behind.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub resource_type: &'a str,
    pub desired: Option<&'a [u8]>,
    pub prior: Option<&'a [u8]>,
}

impl<'a> Request<'a> {
    pub fn new(resource_type: &'a str, desired: Option<&'a [u8]>, prior: Option<&'a [u8]>) -> Self {
        Self {
            resource_type,
            desired,
            prior,
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.desired.is_none() && self.prior.is_none() {
            return Err(EngineError::InvalidRequest(format!(
                "{}: neither desired config nor prior state was given",
                self.resource_type
            )));
        }
        Ok(())
    }
}

/// Result of a successful apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub action: Action,
    pub changed_attributes: Vec<String>,
    pub new_state: NewState,
}

/// Entry point for callers: resolves the handler and runs plan or apply.
///
/// Stateless between calls. Callers must not run two reconciliations of the
/// same tracked resource at once.
#[derive(Debug, Clone)]
pub struct Reconciler {
    registry: Arc<HandlerRegistry>,
}

impl Reconciler {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Plan with a live read of the backend.
    pub async fn plan(&self, ctx: &OpContext, request: Request<'_>) -> Result<PlanResult, EngineError> {
        self.plan_with(ctx, request, PlanOptions::default()).await
    }

    pub async fn plan_with(
        &self,
        ctx: &OpContext,
        request: Request<'_>,
        options: PlanOptions,
    ) -> Result<PlanResult, EngineError> {
        request.validate()?;
        let handler = self.registry.get(request.resource_type)?;
        handler
            .plan(ctx, request.desired, request.prior, options)
            .await
    }

    /// Plan afresh, then carry out the resulting action.
    pub async fn apply(&self, ctx: &OpContext, request: Request<'_>) -> Result<ApplyOutcome, ApplyError> {
        request.validate()?;
        let handler = self.registry.get(request.resource_type)?;
        let outcome = handler
            .apply(ctx, request.desired, request.prior, None)
            .await?;
        log_outcome(request.resource_type, &outcome);
        Ok(outcome)
    }

    /// Carry out a previously computed plan without re-reading the backend.
    ///
    /// The inputs must be the ones the plan was computed from.
    pub async fn apply_plan(
        &self,
        ctx: &OpContext,
        request: Request<'_>,
        plan: &PlanResult,
    ) -> Result<ApplyOutcome, ApplyError> {
        request.validate()?;
        let handler = self.registry.get(request.resource_type)?;
        let outcome = handler
            .apply(ctx, request.desired, request.prior, Some(plan))
            .await?;
        log_outcome(request.resource_type, &outcome);
        Ok(outcome)
    }
}

fn log_outcome(resource_type: &str, outcome: &ApplyOutcome) {
    tracing::info!(
        resource_type,
        action = %outcome.action,
        untracked = outcome.new_state.is_untracked(),
        "apply complete"
    );
}
