use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use stratus_engine::{
    ApplyOutcome, NewState, OpContext, PlanOptions, PlanResult, Reconciler, Request,
    StateAfterFailure,
};

use crate::persistence::{read_optional, read_required, write_json, write_state};

/// A plan saved by `stratus plan --out`, with the inputs it was computed
/// from so `apply --plan` can refuse to run against anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFile {
    pub resource_type: String,
    pub desired: Option<String>,
    pub prior: Option<String>,
    pub plan: PlanResult,
}

impl PlanFile {
    fn new(resource_type: &str, desired: Option<&[u8]>, prior: Option<&[u8]>, plan: PlanResult) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            desired: desired.map(|b| String::from_utf8_lossy(b).into_owned()),
            prior: prior.map(|b| String::from_utf8_lossy(b).into_owned()),
            plan,
        }
    }

    fn check_inputs(
        &self,
        resource_type: &str,
        desired: Option<&[u8]>,
        prior: Option<&[u8]>,
    ) -> eyre::Result<()> {
        let current = Self::new(resource_type, desired, prior, self.plan.clone());
        if current.resource_type != self.resource_type {
            return Err(eyre::eyre!(
                "saved plan is for {}, not {resource_type}",
                self.resource_type
            ));
        }
        if current.desired != self.desired || current.prior != self.prior {
            return Err(eyre::eyre!(
                "desired config or state changed since the plan was saved; plan again"
            ));
        }
        Ok(())
    }
}

pub async fn plan(
    reconciler: &Reconciler,
    ctx: &OpContext,
    resource_type: &str,
    desired: Option<&Path>,
    state: Option<&Path>,
    options: PlanOptions,
) -> eyre::Result<PlanFile> {
    let desired = desired.map(read_required).transpose()?;
    let prior = match state {
        Some(path) => read_optional(path)?,
        None => None,
    };

    let plan = reconciler
        .plan_with(
            ctx,
            Request::new(resource_type, desired.as_deref(), prior.as_deref()),
            options,
        )
        .await?;
    Ok(PlanFile::new(
        resource_type,
        desired.as_deref(),
        prior.as_deref(),
        plan,
    ))
}

pub fn save_plan(path: &Path, plan: &PlanFile) -> eyre::Result<()> {
    write_json(path, plan)?;
    tracing::info!(path = %path.display(), "plan saved");
    Ok(())
}

/// Apply and record the resulting state at `state`.
///
/// With `saved_plan`, the plan in that file is carried out as-is instead of
/// planning again. On failure the state file is left alone unless the old
/// object is already gone, in which case the untracked marker is recorded
/// before the error is returned.
pub async fn apply(
    reconciler: &Reconciler,
    ctx: &OpContext,
    resource_type: &str,
    desired: Option<&Path>,
    state: &Path,
    saved_plan: Option<&Path>,
) -> eyre::Result<ApplyOutcome> {
    let desired = desired.map(read_required).transpose()?;
    let prior = read_optional(state)?;
    let request = Request::new(resource_type, desired.as_deref(), prior.as_deref());

    let result = match saved_plan {
        Some(path) => {
            let saved: PlanFile = serde_json::from_slice(&read_required(path)?)?;
            saved.check_inputs(resource_type, desired.as_deref(), prior.as_deref())?;
            reconciler.apply_plan(ctx, request, &saved.plan).await
        }
        None => reconciler.apply(ctx, request).await,
    };

    match result {
        Ok(outcome) => {
            write_state(state, &outcome.new_state)?;
            Ok(outcome)
        }
        Err(err) => {
            if err.state == StateAfterFailure::Untracked {
                tracing::warn!(
                    resource_type,
                    path = %state.display(),
                    "old object deleted but replacement failed; recording untracked"
                );
                write_state(state, &NewState::Untracked)?;
            }
            Err(err.into())
        }
    }
}

/// Human-readable plan summary.
pub fn render_plan(resource_type: &str, plan: &PlanResult) -> String {
    let mut out = format!("{resource_type}: {} ({})\n", plan.action, plan.cause);
    for drift in &plan.drift {
        let marker = if drift.forces_replacement { "-/+" } else { "~" };
        let _ = write!(
            out,
            "  {marker} {}: {} => {}",
            drift.field, drift.actual, drift.expected
        );
        if drift.forces_replacement {
            out.push_str(" (forces replacement)");
        }
        out.push('\n');
    }
    out
}
