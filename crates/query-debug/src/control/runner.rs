//! The statement runner seam.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::RunnerError;
use crate::time_travel::RowChange;
use crate::value::{Row, SqlValue};

/// Rows and metadata returned for one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(default)]
    pub rows: Vec<Row>,
    pub row_count: u64,
    #[serde(default)]
    pub fields: Vec<SmolStr>,
    /// Before/after rows of a data-modifying statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<RowChange>,
}

impl QueryResult {
    /// A result without rows.
    #[must_use]
    pub fn affected(row_count: u64) -> Self {
        Self {
            row_count,
            ..Self::default()
        }
    }

    /// A result carrying rows; fields come from the first row.
    #[must_use]
    pub fn with_rows(rows: Vec<Row>) -> Self {
        let fields = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        Self {
            row_count: rows.len() as u64,
            rows,
            fields,
            change: None,
        }
    }

    /// Attach the rows a data-modifying statement changed.
    #[must_use]
    pub fn with_change(mut self, change: RowChange) -> Self {
        if self.row_count == 0 {
            self.row_count = change.old_rows.len().max(change.new_rows.len()) as u64;
        }
        self.change = Some(change);
        self
    }
}

/// One node of a statement's execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNode {
    pub id: SmolStr,
    /// Planner node type (`Seq Scan`, `Hash Join`, ...).
    pub node_type: SmolStr,
    #[serde(default)]
    pub relation: Option<SmolStr>,
    #[serde(default)]
    pub estimated_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    #[must_use]
    pub fn new(id: impl Into<SmolStr>, node_type: impl Into<SmolStr>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            relation: None,
            estimated_cost: None,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_child(mut self, child: PlanNode) -> Self {
        self.children.push(child);
        self
    }

    /// This node and its descendants, parents first.
    pub(crate) fn flatten(&self) -> Vec<&PlanNode> {
        let mut nodes = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            nodes.push(node);
            stack.extend(node.children.iter().rev());
        }
        nodes
    }
}

/// Executes statements against the real database on the engine's behalf.
///
/// Timeouts and cancellation are the runner's business; the engine waits for
/// every call to return.
pub trait StatementRunner: Send + Sync {
    /// Run one statement with the unit of work's parameters.
    fn run(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, RunnerError>;

    /// Plan of a statement, when the runner can produce one.
    fn explain(&self, _sql: &str) -> Option<Vec<PlanNode>> {
        None
    }
}

impl<F> StatementRunner for F
where
    F: Fn(&str, &[SqlValue]) -> Result<QueryResult, RunnerError> + Send + Sync,
{
    fn run(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, RunnerError> {
        self(sql, params)
    }
}
