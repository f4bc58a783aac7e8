//! `query-debug` - statement-level debugger and time-travel engine for SQL sessions.
//!
//! The engine never talks to a database itself. Callers hand it a
//! [`StatementRunner`] that executes one statement at a time; the engine drives
//! scripts statement by statement, evaluates breakpoints at every boundary,
//! tracks variables and transaction/lock state, and can undo recorded data
//! changes by running computed inverse SQL.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Breakpoint definitions, guard conditions and matching.
pub mod breakpoints;
/// Runtime configuration for the engine and its sessions.
pub mod config;
/// Statement-by-statement execution and stepping.
pub mod control;
/// Engine facade composing every component.
pub mod engine;
/// Errors returned by the engine and by statement runners.
pub mod error;
/// Typed debugger events and subscription.
pub mod event;
/// Variable scopes, transaction state and deadlock detection.
pub mod inspector;
/// Session identity, configuration and state machine.
pub mod session;
mod slots;
/// Inverse SQL generation for recorded data changes.
pub mod time_travel;
/// SQL values and literal formatting.
pub mod value;

pub use breakpoints::{
    Breakpoint, BreakpointId, BreakpointKind, BreakpointRequest, BreakpointStore, BreakpointType,
    ExecutionContext, MatchOutcome,
};
pub use config::{DebugLevel, EngineConfig, SessionConfig, SessionConfigUpdate};
pub use control::{
    ControlOutcome, DebugOperation, ExecutionController, ExecutionPoint, ExecutionStage,
    PlanNode, QueryResult, Script, ScriptBuilder, Snapshot, StatementRunner, StepKind,
};
pub use engine::{DebugEngine, EngineStats};
pub use error::{DebugError, Result, RunnerError};
pub use event::{DebugEvent, EventBus, EventKind, PauseReason};
pub use inspector::{
    BlockingTree, DeadlockReport, IsolationLevel, LockGranularity, LockInfo, LockMode,
    StateInspector, TransactionLocks, TransactionState, TransactionStatus, Variable,
    VariableScope,
};
pub use session::{
    CallFrame, Session, SessionId, SessionRegistry, SessionState, SessionStats, SessionStatus,
};
pub use time_travel::{
    generate_inverse, generate_inverse_sql, DataOperation, InverseStatement, RowChange,
};
pub use value::{format_sql_value, quote_ident, Row, SqlValue};
