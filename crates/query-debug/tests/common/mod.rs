#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, Once};

use query_debug::{
    generate_inverse, DataOperation, DebugEngine, DebugEvent, InverseStatement, PlanNode,
    QueryResult, Row, RowChange, RunnerError, SqlValue, StatementRunner,
};
use smol_str::SmolStr;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route engine logs to the test writer; `RUST_LOG=query_debug=trace` shows them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn engine() -> DebugEngine {
    init_tracing();
    DebugEngine::default()
}

pub fn row(columns: &[(&str, SqlValue)]) -> Row {
    columns
        .iter()
        .map(|(name, value)| (SmolStr::new(name), value.clone()))
        .collect()
}

pub fn events(rx: &Receiver<DebugEvent>) -> Vec<DebugEvent> {
    rx.try_iter().collect()
}

/// Runner answering from canned results; unknown statements affect no rows.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, Result<QueryResult, RunnerError>>>,
    plans: Mutex<HashMap<String, Vec<PlanNode>>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, sql: &str, result: QueryResult) {
        self.responses
            .lock()
            .unwrap()
            .insert(sql.to_string(), Ok(result));
    }

    pub fn fail(&self, sql: &str, error: RunnerError) {
        self.responses
            .lock()
            .unwrap()
            .insert(sql.to_string(), Err(error));
    }

    pub fn plan(&self, sql: &str, nodes: Vec<PlanNode>) {
        self.plans.lock().unwrap().insert(sql.to_string(), nodes);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn handle(self: &Arc<Self>) -> Option<Arc<dyn StatementRunner>> {
        Some(Arc::clone(self) as Arc<dyn StatementRunner>)
    }
}

impl StatementRunner for ScriptedRunner {
    fn run(&self, sql: &str, _params: &[SqlValue]) -> Result<QueryResult, RunnerError> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(sql)
            .cloned()
            .unwrap_or_else(|| Ok(QueryResult::affected(0)))
    }

    fn explain(&self, sql: &str) -> Option<Vec<PlanNode>> {
        self.plans.lock().unwrap().get(sql).cloned()
    }
}

/// A single in-memory table that applies row changes and their inverses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub rows: Vec<Row>,
    pk_fields: Vec<SmolStr>,
}

impl MemoryTable {
    pub fn new(pk_fields: &[&str], rows: Vec<Row>) -> Self {
        Self {
            rows,
            pk_fields: pk_fields.iter().copied().map(SmolStr::new).collect(),
        }
    }

    fn same_key(&self, left: &Row, right: &Row) -> bool {
        self.pk_fields
            .iter()
            .all(|field| left.get(field) == right.get(field))
    }

    pub fn apply(&mut self, change: &RowChange) {
        match change.operation {
            DataOperation::Insert => self.rows.extend(change.new_rows.iter().cloned()),
            DataOperation::Update => {
                for (old, new) in change.old_rows.iter().zip(&change.new_rows) {
                    let position = self.rows.iter().position(|row| self.same_key(row, old));
                    if let Some(position) = position {
                        for (column, value) in new {
                            self.rows[position].insert(column.clone(), value.clone());
                        }
                    }
                }
            }
            DataOperation::Delete => {
                let removed = change.old_rows.clone();
                let rows = std::mem::take(&mut self.rows);
                self.rows = rows
                    .into_iter()
                    .filter(|row| !removed.iter().any(|old| self.same_key(row, old)))
                    .collect();
            }
            DataOperation::Other(_) => {}
        }
    }

    pub fn undo(&mut self, statement: &InverseStatement) {
        match statement {
            InverseStatement::Delete { matches: keys, .. } => {
                self.rows
                    .retain(|row| !keys.iter().any(|key| key_matches(row, key)));
            }
            InverseStatement::Update {
                assignments, key, ..
            } => {
                for row in self.rows.iter_mut().filter(|row| key_matches(row, key)) {
                    for (column, value) in assignments {
                        row.insert(column.clone(), value.clone());
                    }
                }
            }
            InverseStatement::Insert { columns, rows, .. } => {
                for values in rows {
                    self.rows
                        .push(columns.iter().cloned().zip(values.iter().cloned()).collect());
                }
            }
            InverseStatement::Noop { .. } => {}
        }
    }
}

fn key_matches(row: &Row, key: &[(SmolStr, SqlValue)]) -> bool {
    key.iter()
        .all(|(column, value)| row.get(column) == Some(value))
}

#[derive(Default)]
struct TableState {
    table: MemoryTable,
    forward: HashMap<String, RowChange>,
    inverse: HashMap<String, InverseStatement>,
    failing: HashSet<String>,
    executed: Vec<String>,
}

/// Runner backed by a [`MemoryTable`]. Registered statements apply their
/// change; the inverse SQL of every applied change is understood as well.
#[derive(Default)]
pub struct TableRunner {
    state: Mutex<TableState>,
}

impl TableRunner {
    pub fn new(table: MemoryTable) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TableState {
                table,
                ..TableState::default()
            }),
        })
    }

    pub fn on(&self, sql: &str, change: RowChange) {
        self.state
            .lock()
            .unwrap()
            .forward
            .insert(sql.to_string(), change);
    }

    pub fn fail_on(&self, sql: &str) {
        self.state.lock().unwrap().failing.insert(sql.to_string());
    }

    pub fn heal(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    pub fn rows(&self) -> Vec<Row> {
        self.state.lock().unwrap().table.rows.clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn handle(self: &Arc<Self>) -> Option<Arc<dyn StatementRunner>> {
        Some(Arc::clone(self) as Arc<dyn StatementRunner>)
    }
}

impl StatementRunner for TableRunner {
    fn run(&self, sql: &str, _params: &[SqlValue]) -> Result<QueryResult, RunnerError> {
        let mut state = self.state.lock().unwrap();
        state.executed.push(sql.to_string());
        if state.failing.contains(sql) {
            return Err(RunnerError::new("connection reset").with_sql_state("08006"));
        }
        if let Some(change) = state.forward.get(sql).cloned() {
            state.table.apply(&change);
            for statement in generate_inverse(&change) {
                if !statement.is_noop() {
                    state.inverse.insert(statement.to_sql(), statement);
                }
            }
            return Ok(QueryResult::default().with_change(change));
        }
        if let Some(statement) = state.inverse.get(sql).cloned() {
            state.table.undo(&statement);
            return Ok(QueryResult::affected(1));
        }
        Ok(QueryResult::affected(0))
    }
}
