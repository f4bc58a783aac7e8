//! Breakpoint definitions, guard conditions and matching.

mod condition;
mod store;
mod types;

pub use store::{BreakpointStore, MatchOutcome};
pub use types::{
    Breakpoint, BreakpointId, BreakpointKind, BreakpointRequest, BreakpointType, ContextEvent,
    DataBreakpoint, ExceptionBreakpoint, ExecutionContext, LineBreakpoint, LockBreakpoint,
    PlanBreakpoint, QueryBreakpoint, TransactionBreakpoint,
};
