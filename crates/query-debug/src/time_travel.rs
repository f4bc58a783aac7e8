//! Inverse SQL for recorded data changes.
//!
//! Everything here is pure: a [`RowChange`] describes what a statement did to
//! one table, and [`generate_inverse`] computes the statements that undo it.
//! Key predicates compare with `=`, except that a `NULL` key value is matched
//! with `IS NULL` so the inverse still finds the row.

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::value::{format_sql_value, quote_ident, Row, SqlValue};

/// Kind of data-modifying statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataOperation {
    Insert,
    Update,
    Delete,
    /// Anything else the runner reports (`MERGE`, `TRUNCATE`, ...).
    Other(SmolStr),
}

impl DataOperation {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            DataOperation::Insert => "INSERT",
            DataOperation::Update => "UPDATE",
            DataOperation::Delete => "DELETE",
            DataOperation::Other(name) => name.as_str(),
        }
    }
}

impl fmt::Display for DataOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataOperation {
    type Err = std::convert::Infallible;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        Ok(match text.to_ascii_uppercase().as_str() {
            "INSERT" => DataOperation::Insert,
            "UPDATE" => DataOperation::Update,
            "DELETE" => DataOperation::Delete,
            other => DataOperation::Other(SmolStr::new(other)),
        })
    }
}

impl From<String> for DataOperation {
    fn from(text: String) -> Self {
        match text.parse() {
            Ok(operation) => operation,
            Err(never) => match never {},
        }
    }
}

impl From<DataOperation> for String {
    fn from(operation: DataOperation) -> Self {
        operation.as_str().to_string()
    }
}

/// Before/after rows of one data-modifying statement on one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowChange {
    #[serde(rename = "type")]
    pub operation: DataOperation,
    pub table: SmolStr,
    /// Primary-key columns; when empty every column of a row is its key.
    #[serde(default)]
    pub pk_fields: Vec<SmolStr>,
    /// Rows before the change (`UPDATE`, `DELETE`).
    #[serde(default)]
    pub old_rows: Vec<Row>,
    /// Rows after the change (`INSERT`, `UPDATE`).
    #[serde(default)]
    pub new_rows: Vec<Row>,
}

impl RowChange {
    pub fn insert(table: impl Into<SmolStr>, pk_fields: &[&str], new_rows: Vec<Row>) -> Self {
        Self::new(DataOperation::Insert, table, pk_fields, Vec::new(), new_rows)
    }

    pub fn update(
        table: impl Into<SmolStr>,
        pk_fields: &[&str],
        old_rows: Vec<Row>,
        new_rows: Vec<Row>,
    ) -> Self {
        Self::new(DataOperation::Update, table, pk_fields, old_rows, new_rows)
    }

    pub fn delete(table: impl Into<SmolStr>, pk_fields: &[&str], old_rows: Vec<Row>) -> Self {
        Self::new(DataOperation::Delete, table, pk_fields, old_rows, Vec::new())
    }

    fn new(
        operation: DataOperation,
        table: impl Into<SmolStr>,
        pk_fields: &[&str],
        old_rows: Vec<Row>,
        new_rows: Vec<Row>,
    ) -> Self {
        Self {
            operation,
            table: table.into(),
            pk_fields: pk_fields.iter().copied().map(SmolStr::new).collect(),
            old_rows,
            new_rows,
        }
    }

    /// Columns touched by the change. For updates this is the set of columns
    /// whose value differs between the old and new row.
    #[must_use]
    pub fn changed_columns(&self) -> Vec<SmolStr> {
        let mut columns: Vec<SmolStr> = Vec::new();
        let mut push = |name: &SmolStr| {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        };
        match self.operation {
            DataOperation::Update if !self.new_rows.is_empty() => {
                for (old, new) in self.old_rows.iter().zip(&self.new_rows) {
                    for (name, value) in new {
                        if old.get(name) != Some(value) {
                            push(name);
                        }
                    }
                }
            }
            _ => {
                for row in self.old_rows.iter().chain(&self.new_rows) {
                    row.keys().for_each(&mut push);
                }
            }
        }
        columns
    }

    fn key_of(&self, row: &Row) -> Vec<(SmolStr, SqlValue)> {
        if self.pk_fields.is_empty() {
            return row
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
        }
        self.pk_fields
            .iter()
            .map(|field| {
                let value = row.get(field).cloned().unwrap_or(SqlValue::Null);
                (field.clone(), value)
            })
            .collect()
    }

    fn is_key(&self, column: &SmolStr) -> bool {
        self.pk_fields.contains(column)
    }
}

/// One statement of an inverse.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InverseStatement {
    /// Undo inserts: delete every row matching one of the key sets.
    Delete {
        table: SmolStr,
        matches: Vec<Vec<(SmolStr, SqlValue)>>,
    },
    /// Undo one updated row.
    Update {
        table: SmolStr,
        assignments: Vec<(SmolStr, SqlValue)>,
        key: Vec<(SmolStr, SqlValue)>,
    },
    /// Undo deletes by re-inserting the rows.
    Insert {
        table: SmolStr,
        columns: Vec<SmolStr>,
        rows: Vec<Vec<SqlValue>>,
    },
    /// Nothing to run.
    Noop { reason: String },
}

impl InverseStatement {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, InverseStatement::Noop { .. })
    }

    /// Render the statement as SQL text.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            InverseStatement::Delete { table, matches } => {
                let grouped = matches.len() > 1;
                let predicate = matches
                    .iter()
                    .map(|key| {
                        let conjunction = key_predicate(key);
                        if grouped {
                            format!("({conjunction})")
                        } else {
                            conjunction
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" OR ");
                format!("DELETE FROM {} WHERE {predicate};", quote_ident(table))
            }
            InverseStatement::Update {
                table,
                assignments,
                key,
            } => {
                let sets = assignments
                    .iter()
                    .map(|(column, value)| {
                        format!("{} = {}", quote_ident(column), format_sql_value(value))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "UPDATE {} SET {sets} WHERE {};",
                    quote_ident(table),
                    key_predicate(key)
                )
            }
            InverseStatement::Insert {
                table,
                columns,
                rows,
            } => {
                let columns = columns
                    .iter()
                    .map(|column| quote_ident(column))
                    .collect::<Vec<_>>()
                    .join(", ");
                let values = rows
                    .iter()
                    .map(|row| {
                        let values = row
                            .iter()
                            .map(format_sql_value)
                            .collect::<Vec<_>>()
                            .join(", ");
                        format!("({values})")
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "INSERT INTO {} ({columns}) VALUES {values};",
                    quote_ident(table)
                )
            }
            InverseStatement::Noop { reason } => format!("-- no-op: {reason}"),
        }
    }
}

impl fmt::Display for InverseStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

fn key_predicate(key: &[(SmolStr, SqlValue)]) -> String {
    key.iter()
        .map(|(column, value)| match value {
            SqlValue::Null => format!("{} IS NULL", quote_ident(column)),
            value => format!("{} = {}", quote_ident(column), format_sql_value(value)),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Statements that undo `change`. Unsupported operations and empty row sets
/// produce a single [`InverseStatement::Noop`].
#[must_use]
pub fn generate_inverse(change: &RowChange) -> Vec<InverseStatement> {
    let table = change.table.clone();
    match change.operation {
        DataOperation::Insert => {
            if change.new_rows.is_empty() {
                return vec![noop(format!("INSERT into {table} affected no rows"))];
            }
            vec![InverseStatement::Delete {
                table,
                matches: change.new_rows.iter().map(|row| change.key_of(row)).collect(),
            }]
        }
        DataOperation::Update => {
            let statements: Vec<InverseStatement> = change
                .old_rows
                .iter()
                .enumerate()
                .filter_map(|(index, old)| inverse_update(change, old, change.new_rows.get(index)))
                .collect();
            if statements.is_empty() {
                return vec![noop(format!("UPDATE of {table} left nothing to restore"))];
            }
            statements
        }
        DataOperation::Delete => {
            let Some(first) = change.old_rows.first() else {
                return vec![noop(format!("DELETE from {table} affected no rows"))];
            };
            let columns: Vec<SmolStr> = first.keys().cloned().collect();
            let rows = change
                .old_rows
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|column| row.get(column).cloned().unwrap_or(SqlValue::Null))
                        .collect()
                })
                .collect();
            vec![InverseStatement::Insert {
                table,
                columns,
                rows,
            }]
        }
        DataOperation::Other(ref name) => vec![noop(format!(
            "unsupported operation type {name} on {table}"
        ))],
    }
}

fn inverse_update(change: &RowChange, old: &Row, new: Option<&Row>) -> Option<InverseStatement> {
    let old_key = change.key_of(old);
    let (key, restore_key) = match new.map(|row| change.key_of(row)) {
        // Without primary keys a row is only identifiable by its new contents.
        Some(new_key) if change.pk_fields.is_empty() => (new_key, true),
        Some(new_key) if new_key != old_key => (new_key, true),
        None if change.pk_fields.is_empty() => return None,
        _ => (old_key, false),
    };
    let assignments: Vec<(SmolStr, SqlValue)> = old
        .iter()
        .filter(|(column, _)| restore_key || !change.is_key(column))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect();
    if assignments.is_empty() {
        return None;
    }
    Some(InverseStatement::Update {
        table: change.table.clone(),
        assignments,
        key,
    })
}

fn noop(reason: String) -> InverseStatement {
    InverseStatement::Noop { reason }
}

/// Inverse SQL text, one statement per line.
#[must_use]
pub fn generate_inverse_sql(change: &RowChange) -> String {
    generate_inverse(change)
        .iter()
        .map(InverseStatement::to_sql)
        .collect::<Vec<_>>()
        .join("\n")
}
