//! Breakpoint data types.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use time::OffsetDateTime;

use crate::control::{ExecutionStage, PlanNode};
use crate::error::{DebugError, Result, RunnerError};
use crate::inspector::{IsolationLevel, LockEvent, LockGranularity, TransactionEvent};
use crate::session::SessionId;
use crate::time_travel::DataOperation;

/// Breakpoint identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakpointId(pub u64);

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type tag of a breakpoint variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakpointType {
    Line,
    Query,
    Data,
    Transaction,
    Lock,
    Plan,
    Exception,
}

impl BreakpointType {
    pub fn parse(text: &str) -> Result<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(Self::Line),
            "query" => Ok(Self::Query),
            "data" => Ok(Self::Data),
            "transaction" => Ok(Self::Transaction),
            "lock" => Ok(Self::Lock),
            "plan" => Ok(Self::Plan),
            "exception" => Ok(Self::Exception),
            _ => Err(DebugError::validation(format!(
                "unknown breakpoint type '{text}'"
            ))),
        }
    }
}

/// Pause when a statement on this line begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LineBreakpoint {
    /// Procedure the line belongs to; `None` for the top-level script.
    #[serde(default)]
    pub procedure_id: Option<SmolStr>,
    pub line_number: u32,
}

/// Pause before a statement chosen by ordinal and/or text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryBreakpoint {
    #[serde(default)]
    pub query_id: Option<u32>,
    /// Case-insensitive substring of the statement text.
    #[serde(default)]
    pub pattern: Option<SmolStr>,
}

/// Pause after a statement changes rows of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DataBreakpoint {
    pub table: SmolStr,
    #[serde(default)]
    pub operation: Option<DataOperation>,
    #[serde(default)]
    pub column: Option<SmolStr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransactionBreakpoint {
    pub event: TransactionEvent,
    #[serde(default)]
    pub isolation_level: Option<IsolationLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LockBreakpoint {
    pub event: LockEvent,
    #[serde(default)]
    pub granularity: Option<LockGranularity>,
    /// Locked resource name (table or row identifier).
    #[serde(default)]
    pub resource: Option<SmolStr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanBreakpoint {
    #[serde(default)]
    pub node_id: Option<SmolStr>,
    #[serde(default)]
    pub node_type: Option<SmolStr>,
}

/// Pause when the runner reports a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExceptionBreakpoint {
    /// Case-insensitive substring of the error message.
    #[serde(default)]
    pub pattern: Option<SmolStr>,
    #[serde(default)]
    pub sql_state: Option<SmolStr>,
}

/// Variant-specific matching fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BreakpointKind {
    Line(LineBreakpoint),
    Query(QueryBreakpoint),
    Data(DataBreakpoint),
    Transaction(TransactionBreakpoint),
    Lock(LockBreakpoint),
    Plan(PlanBreakpoint),
    Exception(ExceptionBreakpoint),
}

impl BreakpointKind {
    #[must_use]
    pub fn breakpoint_type(&self) -> BreakpointType {
        match self {
            BreakpointKind::Line(_) => BreakpointType::Line,
            BreakpointKind::Query(_) => BreakpointType::Query,
            BreakpointKind::Data(_) => BreakpointType::Data,
            BreakpointKind::Transaction(_) => BreakpointType::Transaction,
            BreakpointKind::Lock(_) => BreakpointType::Lock,
            BreakpointKind::Plan(_) => BreakpointType::Plan,
            BreakpointKind::Exception(_) => BreakpointType::Exception,
        }
    }

    /// Decode variant fields from JSON, rejecting unknown or mistyped fields.
    pub fn from_json(kind: BreakpointType, fields: serde_json::Value) -> Result<Self> {
        fn decode<T: serde::de::DeserializeOwned>(
            kind: BreakpointType,
            fields: serde_json::Value,
        ) -> Result<T> {
            serde_json::from_value(fields).map_err(|err| {
                DebugError::validation(format!("invalid {kind:?} breakpoint fields: {err}"))
            })
        }
        let decoded = match kind {
            BreakpointType::Line => BreakpointKind::Line(decode(kind, fields)?),
            BreakpointType::Query => BreakpointKind::Query(decode(kind, fields)?),
            BreakpointType::Data => BreakpointKind::Data(decode(kind, fields)?),
            BreakpointType::Transaction => BreakpointKind::Transaction(decode(kind, fields)?),
            BreakpointType::Lock => BreakpointKind::Lock(decode(kind, fields)?),
            BreakpointType::Plan => BreakpointKind::Plan(decode(kind, fields)?),
            BreakpointType::Exception => BreakpointKind::Exception(decode(kind, fields)?),
        };
        decoded.validate()?;
        Ok(decoded)
    }

    /// Semantic checks that the field types alone cannot express.
    pub fn validate(&self) -> Result<()> {
        match self {
            BreakpointKind::Line(line) if line.line_number == 0 => {
                Err(DebugError::validation("lineNumber is 1-based"))
            }
            BreakpointKind::Query(query) if query.query_id.is_none() && query.pattern.is_none() => {
                Err(DebugError::validation(
                    "query breakpoint needs queryId or pattern",
                ))
            }
            BreakpointKind::Query(QueryBreakpoint {
                query_id: Some(0), ..
            }) => Err(DebugError::validation("queryId is 1-based")),
            BreakpointKind::Data(data) if data.table.trim().is_empty() => {
                Err(DebugError::validation("data breakpoint needs a table"))
            }
            BreakpointKind::Plan(plan) if plan.node_id.is_none() && plan.node_type.is_none() => {
                Err(DebugError::validation(
                    "plan breakpoint needs nodeId or nodeType",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Whether these fields match what is currently happening.
    #[must_use]
    pub fn matches(&self, context: &ExecutionContext) -> bool {
        match (self, &context.event) {
            (BreakpointKind::Line(line), ContextEvent::Statement) => {
                context.line == Some(line.line_number)
                    && context.procedure_id == line.procedure_id
            }
            (BreakpointKind::Query(query), ContextEvent::Statement) => {
                let id_matches = query
                    .query_id
                    .is_none_or(|id| context.query_id == Some(id));
                let text_matches = query.pattern.as_ref().is_none_or(|pattern| {
                    context
                        .sql
                        .as_deref()
                        .is_some_and(|sql| contains_ignore_case(sql, pattern))
                });
                id_matches && text_matches
            }
            (
                BreakpointKind::Data(data),
                ContextEvent::DataChange {
                    table,
                    operation,
                    columns,
                },
            ) => {
                data.table.eq_ignore_ascii_case(table)
                    && data.operation.as_ref().is_none_or(|op| op == operation)
                    && data.column.as_ref().is_none_or(|column| {
                        columns.iter().any(|name| name.eq_ignore_ascii_case(column))
                    })
            }
            (
                BreakpointKind::Transaction(txn),
                ContextEvent::Transaction {
                    event,
                    isolation_level,
                    ..
                },
            ) => {
                txn.event == *event
                    && txn
                        .isolation_level
                        .is_none_or(|level| *isolation_level == Some(level))
            }
            (
                BreakpointKind::Lock(lock),
                ContextEvent::Lock {
                    event,
                    granularity,
                    resource,
                    ..
                },
            ) => {
                lock.event == *event
                    && lock
                        .granularity
                        .is_none_or(|wanted| *granularity == Some(wanted))
                    && lock.resource.as_ref().is_none_or(|wanted| {
                        resource
                            .as_ref()
                            .is_some_and(|name| name.eq_ignore_ascii_case(wanted))
                    })
            }
            (BreakpointKind::Plan(plan), ContextEvent::Plan { node }) => {
                plan.node_id.as_ref().is_none_or(|id| *id == node.id)
                    && plan
                        .node_type
                        .as_ref()
                        .is_none_or(|kind| kind.eq_ignore_ascii_case(&node.node_type))
            }
            (BreakpointKind::Exception(exception), ContextEvent::Exception { error }) => {
                exception
                    .pattern
                    .as_ref()
                    .is_none_or(|pattern| contains_ignore_case(&error.message, pattern))
                    && exception
                        .sql_state
                        .as_ref()
                        .is_none_or(|code| error.sql_state.as_ref() == Some(code))
            }
            _ => false,
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// A breakpoint: shared envelope plus variant fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub session_id: SessionId,
    pub enabled: bool,
    pub hit_count: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_hit: Option<OffsetDateTime>,
    /// Guard condition source text.
    pub condition: Option<String>,
    /// Logpoint template; a breakpoint with a message logs instead of pausing.
    pub log_message: Option<String>,
    #[serde(flatten)]
    pub kind: BreakpointKind,
}

impl Breakpoint {
    /// Log-only breakpoints never change session state.
    #[must_use]
    pub fn is_logpoint(&self) -> bool {
        self.log_message.is_some()
    }
}

/// Input for creating a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointRequest {
    pub kind: BreakpointKind,
    pub condition: Option<String>,
    pub log_message: Option<String>,
    pub enabled: bool,
}

impl BreakpointRequest {
    #[must_use]
    pub fn new(kind: BreakpointKind) -> Self {
        Self {
            kind,
            condition: None,
            log_message: None,
            enabled: true,
        }
    }

    #[must_use]
    pub fn line(procedure_id: Option<&str>, line_number: u32) -> Self {
        Self::new(BreakpointKind::Line(LineBreakpoint {
            procedure_id: procedure_id.map(SmolStr::new),
            line_number,
        }))
    }

    #[must_use]
    pub fn query(query_id: u32) -> Self {
        Self::new(BreakpointKind::Query(QueryBreakpoint {
            query_id: Some(query_id),
            pattern: None,
        }))
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    #[must_use]
    pub fn with_log_message(mut self, message: impl Into<String>) -> Self {
        self.log_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Build a request from a type tag and a JSON object of fields.
    ///
    /// The envelope keys `condition`, `logMessage` and `enabled` are taken
    /// out first; everything left must be a field of the variant.
    pub fn from_json(type_tag: &str, fields: serde_json::Value) -> Result<Self> {
        let kind = BreakpointType::parse(type_tag)?;
        let mut fields = match fields {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(DebugError::validation(format!(
                    "breakpoint fields must be an object, got {other}"
                )))
            }
        };
        let condition = take_string(&mut fields, "condition")?;
        let log_message = take_string(&mut fields, "logMessage")?;
        let enabled = match fields.remove("enabled") {
            None | Some(serde_json::Value::Null) => true,
            Some(serde_json::Value::Bool(enabled)) => enabled,
            Some(other) => {
                return Err(DebugError::validation(format!(
                    "enabled must be a boolean, got {other}"
                )))
            }
        };
        Ok(Self {
            kind: BreakpointKind::from_json(kind, serde_json::Value::Object(fields))?,
            condition,
            log_message,
            enabled,
        })
    }
}

fn take_string(
    fields: &mut serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<String>> {
    match fields.remove(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(text)) => Ok(Some(text)),
        Some(other) => Err(DebugError::validation(format!(
            "{key} must be a string, got {other}"
        ))),
    }
}

/// What is happening at the moment breakpoints are evaluated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ContextEvent {
    /// A statement is about to begin.
    Statement,
    /// The planner produced this node for the upcoming statement.
    Plan { node: PlanNode },
    /// A statement changed rows.
    DataChange {
        table: SmolStr,
        operation: DataOperation,
        columns: Vec<SmolStr>,
    },
    Transaction {
        event: TransactionEvent,
        isolation_level: Option<IsolationLevel>,
        transaction: Option<SmolStr>,
    },
    Lock {
        event: LockEvent,
        granularity: Option<LockGranularity>,
        resource: Option<SmolStr>,
        transaction: SmolStr,
    },
    /// The runner failed.
    Exception { error: RunnerError },
}

/// Runtime context handed to breakpoint matching.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub session_id: SessionId,
    pub event: ContextEvent,
    pub stage: ExecutionStage,
    pub query_id: Option<u32>,
    pub line: Option<u32>,
    pub procedure_id: Option<SmolStr>,
    pub sql: Option<String>,
}

impl ExecutionContext {
    /// Context outside of any statement (lock and transaction observations).
    #[must_use]
    pub fn detached(session_id: SessionId, event: ContextEvent) -> Self {
        Self {
            session_id,
            event,
            stage: ExecutionStage::Execute,
            query_id: None,
            line: None,
            procedure_id: None,
            sql: None,
        }
    }
}
