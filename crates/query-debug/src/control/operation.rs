//! Recorded data changes and the state captured before each one.

#![allow(missing_docs)]

use indexmap::IndexMap;
use serde::Serialize;
use smol_str::SmolStr;
use time::OffsetDateTime;

use crate::inspector::{TransactionState, Variable};
use crate::time_travel::RowChange;

/// A data-modifying statement that ran, with enough row data to undo it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugOperation {
    pub id: u64,
    pub query_id: u32,
    pub sql: String,
    pub change: RowChange,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Variable scopes and active transactions just before an operation ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub operation_id: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub variables: IndexMap<SmolStr, Vec<Variable>>,
    pub transactions: Vec<TransactionState>,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedOperation {
    pub operation: DebugOperation,
    pub snapshot: Snapshot,
    /// Inverse statements an interrupted rewind already applied.
    pub undone: usize,
}
