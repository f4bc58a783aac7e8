//! Execution points and control vocabulary.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use time::OffsetDateTime;

use super::script::Statement;

/// Pipeline stage of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStage {
    /// Statement text is being parsed.
    Parse,
    /// Names and types are being resolved.
    Analyze,
    /// Rules and views are being expanded.
    Rewrite,
    /// A plan node is being considered.
    Plan,
    /// The statement is about to run.
    Execute,
    /// The statement (or the whole unit of work) finished.
    Complete,
}

/// Where execution was at one moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// 1-based statement ordinal within the unit of work.
    pub query_id: Option<u32>,
    pub stage: ExecutionStage,
    pub plan_node_id: Option<SmolStr>,
    pub line: Option<u32>,
    pub procedure_id: Option<SmolStr>,
}

impl ExecutionPoint {
    pub(crate) fn at(statement: &Statement, stage: ExecutionStage) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            query_id: Some(statement.query_id),
            stage,
            plan_node_id: None,
            line: Some(statement.line),
            procedure_id: statement.procedure_id().cloned(),
        }
    }

    pub(crate) fn with_plan_node(mut self, node_id: &SmolStr) -> Self {
        self.plan_node_id = Some(node_id.clone());
        self
    }

    pub(crate) fn finished() -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            query_id: None,
            stage: ExecutionStage::Complete,
            plan_node_id: None,
            line: None,
            procedure_id: None,
        }
    }
}

/// Step behavior while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    /// Pause at the next statement, regardless of call depth.
    Into,
    /// Pause at the next statement at the same or a lower call depth.
    Over,
    /// Pause after returning to the caller (lower call depth).
    Out,
}

/// Outcome of applying a control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlOutcome {
    /// The action changed the session.
    Applied,
    /// The action was ignored because it had no effect.
    Ignored,
}
