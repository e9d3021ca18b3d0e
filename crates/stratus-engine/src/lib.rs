//! stratus-engine
//!
//! Reconciliation engine for declaratively managed cloud resources.
//! Transport-agnostic: callers hand in opaque JSON blobs and store what
//! comes back.
//!
//! Public API:
//! - `Reconciler::plan()` - classify the work for one resource into an `Action`
//! - `Reconciler::apply()` - plan, then perform the action and return new state
//! - `Reconciler::apply_plan()` - perform a previously computed plan
//! - `ResourceHandler` - the describe/create/update/delete contract per type
//! - `HandlerRegistry` - type name → handler, built once at startup

pub mod codec;
pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod handler;
pub mod memory;
pub mod plan;
pub mod planner;
pub mod reconciler;
pub mod registry;
pub mod state;

pub use crate::context::{OpContext, WaitPolicy, wait_for};
pub use crate::error::{ApplyError, EngineError, ErrorKind, HandlerError, Stage};
pub use crate::handler::{BoxFuture, Live, Operation, ResourceHandler};
pub use crate::plan::{Action, Cause, FieldDrift, PlanOptions, PlanResult};
pub use crate::reconciler::{ApplyOutcome, Reconciler, Request};
pub use crate::registry::HandlerRegistry;
pub use crate::state::{NewState, PriorState, StateAfterFailure};
