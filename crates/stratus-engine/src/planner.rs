use serde_json::Value;

use crate::codec::{self, BlobKind};
use crate::context::OpContext;
use crate::diff;
use crate::error::{EngineError, Stage};
use crate::handler::{Live, Operation, ResourceHandler};
use crate::plan::{Action, Cause, FieldDrift, PlanOptions, PlanResult};
use crate::state::PriorState;

/// Decide the single action needed to converge one resource.
///
/// Priority: withdrawn config deletes, untracked creates, a vanished object
/// is recreated, then immutable drift replaces before mutable drift updates.
pub async fn plan<H: ResourceHandler>(
    handler: &H,
    ctx: &OpContext,
    desired: Option<&H::Config>,
    prior: &PriorState<'_, H::State>,
    options: PlanOptions,
) -> Result<PlanResult, EngineError> {
    let resource_type = handler.resource_type();

    let Some(desired) = desired else {
        if !prior.is_present() {
            return Err(EngineError::InvalidRequest(
                "neither desired config nor prior state was given".to_string(),
            ));
        }
        tracing::info!(resource_type, "desired config withdrawn, planning delete");
        return Ok(PlanResult::bare(Action::Delete, Cause::Removed));
    };

    let Some((state, raw)) = prior.tracked() else {
        tracing::info!(resource_type, "resource not tracked, planning create");
        return Ok(PlanResult::bare(Action::Create, Cause::FirstProvision));
    };

    let drift = if options.refresh {
        let live = ctx
            .run(handler.describe(ctx, state))
            .await
            .map_err(|e| EngineError::handler(resource_type, Stage::Plan, Operation::Describe, e))?;

        match live {
            Live::Absent => {
                tracing::info!(resource_type, "tracked object is gone, planning create");
                return Ok(PlanResult::bare(Action::Create, Cause::Vanished));
            }
            Live::Present(live) => handler
                .diff(desired, &live)
                .map_err(|e| EngineError::handler(resource_type, Stage::Plan, Operation::Describe, e))?,
            Live::Opaque => {
                tracing::debug!(resource_type, "live config not readable, comparing recorded state");
                recorded_drift(handler, desired, raw)?
            }
        }
    } else {
        recorded_drift(handler, desired, raw)?
    };

    let result = PlanResult::from_drift(drift);
    tracing::info!(
        resource_type,
        action = %result.action,
        changed = ?result.changed_attributes,
        "planned"
    );
    Ok(result)
}

fn recorded_drift<H: ResourceHandler>(
    handler: &H,
    desired: &H::Config,
    raw: &[u8],
) -> Result<Vec<FieldDrift>, EngineError> {
    let desired = codec::to_value(desired, BlobKind::DesiredConfig)?;
    let recorded: Value = codec::decode(raw, BlobKind::PriorState)?;
    Ok(diff::whole_blob_diff(
        &desired,
        &recorded,
        handler.immutable_fields(),
    ))
}
