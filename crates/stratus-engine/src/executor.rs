use serde_json::Value;

use crate::codec::{self, BlobKind};
use crate::context::OpContext;
use crate::error::{ApplyError, EngineError, Stage};
use crate::handler::{Operation, ResourceHandler};
use crate::plan::Action;
use crate::state::{NewState, PriorState};

/// Perform `action` against the backend and produce the state to record.
///
/// Makes exactly the handler calls the action implies. A replace deletes
/// before it creates and never creates if the delete failed.
pub async fn execute<H: ResourceHandler>(
    handler: &H,
    ctx: &OpContext,
    action: Action,
    desired: Option<&H::Config>,
    prior: &PriorState<'_, H::State>,
) -> Result<NewState, ApplyError> {
    let resource_type = handler.resource_type();
    tracing::info!(resource_type, action = %action, "applying");

    match action {
        Action::Noop => Ok(match prior.tracked() {
            Some((_, raw)) => NewState::Tracked(raw.to_vec()),
            None => NewState::Untracked,
        }),

        Action::Create => {
            let config = require_desired(desired, action)?;
            let state = create_or_adopt(handler, ctx, config, action).await?;
            Ok(NewState::Tracked(codec::encode(&state, BlobKind::NewState)?))
        }

        Action::Update => {
            let config = require_desired(desired, action)?;
            let (state, raw) = require_tracked(prior, action)?;
            let updated = ctx
                .run(handler.update(ctx, config, state))
                .await
                .map_err(|e| {
                    if e.is_not_found() {
                        tracing::warn!(resource_type, "tracked object disappeared during update, re-plan required");
                    }
                    EngineError::handler(resource_type, Stage::Apply(action), Operation::Update, e)
                })?;
            Ok(NewState::Tracked(merge_state(raw, &updated)?))
        }

        Action::Replace => {
            let config = require_desired(desired, action)?;
            let (state, _) = require_tracked(prior, action)?;

            delete_tracked(handler, ctx, state, action).await?;
            tracing::info!(resource_type, "old object deleted, creating replacement");

            match create_or_adopt(handler, ctx, config, action).await {
                Ok(state) => Ok(NewState::Tracked(codec::encode(&state, BlobKind::NewState)?)),
                Err(e) => {
                    tracing::error!(
                        resource_type,
                        error = %e,
                        "replacement create failed after delete, resource is now untracked"
                    );
                    Err(ApplyError::untracked(e))
                }
            }
        }

        Action::Delete => {
            match prior {
                PriorState::Tracked { state, .. } => {
                    delete_tracked(handler, ctx, state, action).await?;
                }
                PriorState::Untracked | PriorState::Absent => {
                    tracing::debug!(resource_type, "nothing tracked, delete is a no-op");
                }
            }
            Ok(NewState::Untracked)
        }
    }
}

async fn create_or_adopt<H: ResourceHandler>(
    handler: &H,
    ctx: &OpContext,
    config: &H::Config,
    action: Action,
) -> Result<H::State, EngineError> {
    let resource_type = handler.resource_type();
    let stage = Stage::Apply(action);

    match ctx.run(handler.create(ctx, config)).await {
        Ok(state) => Ok(state),
        Err(e) if e.is_already_exists() => {
            let adopted = ctx
                .run(handler.adopt(ctx, config))
                .await
                .map_err(|e| EngineError::handler(resource_type, stage, Operation::Adopt, e))?;

            match adopted {
                Some(state) => {
                    tracing::info!(resource_type, owner = %ctx.owner(), "object already exists and is ours, adopting");
                    Ok(state)
                }
                None => {
                    tracing::warn!(resource_type, owner = %ctx.owner(), "object already exists, ownership not confirmed");
                    Err(EngineError::handler(resource_type, stage, Operation::Create, e))
                }
            }
        }
        Err(e) => Err(EngineError::handler(resource_type, stage, Operation::Create, e)),
    }
}

/// Delete the tracked object, treating "already gone" as done.
async fn delete_tracked<H: ResourceHandler>(
    handler: &H,
    ctx: &OpContext,
    state: &H::State,
    action: Action,
) -> Result<(), ApplyError> {
    let resource_type = handler.resource_type();
    match ctx.run(handler.delete(ctx, state)).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            tracing::debug!(resource_type, "object already gone");
            Ok(())
        }
        Err(e) => Err(ApplyError::unchanged(EngineError::handler(
            resource_type,
            Stage::Apply(action),
            Operation::Delete,
            e,
        ))),
    }
}

/// Carry forward the prior state's fields, overlaid with whatever the
/// update returned.
fn merge_state<S: serde::Serialize>(prior_raw: &[u8], updated: &S) -> Result<Vec<u8>, EngineError> {
    let updated = codec::to_value(updated, BlobKind::NewState)?;
    let merged = match (codec::decode::<Value>(prior_raw, BlobKind::PriorState)?, updated) {
        (Value::Object(mut prior), Value::Object(updated)) => {
            prior.extend(updated);
            Value::Object(prior)
        }
        (_, updated) => updated,
    };
    codec::encode(&merged, BlobKind::NewState)
}

fn require_desired<C>(desired: Option<&C>, action: Action) -> Result<&C, EngineError> {
    desired.ok_or_else(|| {
        EngineError::InvalidRequest(format!("{action} requires a desired config"))
    })
}

fn require_tracked<'p, 'a, S>(
    prior: &'p PriorState<'a, S>,
    action: Action,
) -> Result<(&'p S, &'a [u8]), EngineError> {
    prior.tracked().ok_or_else(|| {
        EngineError::InvalidRequest(format!("{action} requires a tracked prior state"))
    })
}
