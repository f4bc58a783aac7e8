//! Variable scopes, transaction state and deadlock detection.
//!
//! Variables are keyed by session and then by scope name; transactions live in
//! their own namespace keyed by transaction id, behind a separate lock, since
//! several sessions may observe the same database transaction.

mod deadlock;
mod transactions;
mod variables;

use std::sync::RwLock;

use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::error::{DebugError, Result};
use crate::session::SessionId;
use crate::slots::SessionSlots;
use crate::value::SqlValue;

pub use deadlock::DeadlockReport;
pub(crate) use deadlock::WaitForGraph;
pub(crate) use transactions::{diff_locks, status_event};
pub use transactions::{
    BlockingTree, IsolationLevel, LockEvent, LockGranularity, LockInfo, LockMode,
    TransactionEvent, TransactionLocks, TransactionState, TransactionStatus,
};
pub use variables::{local_scope_name, Variable, VariableScope};
pub(crate) use variables::{GLOBAL_SCOPE, SESSION_SCOPE};

type Scopes = IndexMap<SmolStr, IndexMap<SmolStr, Variable>>;

/// Owns per-session variable scopes and per-transaction lock state.
#[derive(Debug)]
pub struct StateInspector {
    scopes: SessionSlots<Scopes>,
    transactions: RwLock<IndexMap<SmolStr, TransactionState>>,
}

impl Default for StateInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl StateInspector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: SessionSlots::new("session"),
            transactions: RwLock::new(IndexMap::new()),
        }
    }

    pub fn register_session(&self, session_id: SessionId) {
        self.scopes.insert(session_id, Scopes::new());
    }

    /// Set a variable in a scope of the session. Read-only variables cannot
    /// be overwritten.
    pub fn set_variable(&self, session_id: SessionId, scope: &str, variable: Variable) -> Result<()> {
        self.write_variable(session_id, scope, variable, false)
    }

    /// Set a variable even if an existing one is read-only.
    pub(crate) fn force_variable(&self, session_id: SessionId, scope: &str, variable: Variable) -> Result<()> {
        self.write_variable(session_id, scope, variable, true)
    }

    fn write_variable(
        &self,
        session_id: SessionId,
        scope: &str,
        mut variable: Variable,
        force: bool,
    ) -> Result<()> {
        let scope = scope.trim();
        if scope.is_empty() {
            return Err(DebugError::validation("scope name must not be empty"));
        }
        if variable.name.trim().is_empty() {
            return Err(DebugError::validation("variable name must not be empty"));
        }
        variable.scope = VariableScope::from_scope_name(scope);
        self.scopes.with(session_id, |scopes| {
            let entries = scopes.entry(SmolStr::new(scope)).or_default();
            if let Some(existing) = entries.get(&variable.name) {
                if !existing.mutable && !force {
                    return Err(DebugError::invalid_state(format!(
                        "variable '{}' in scope '{scope}' is read-only",
                        variable.name
                    )));
                }
            }
            entries.insert(variable.name.clone(), variable);
            Ok(())
        })?
    }

    /// Variables of one scope, in definition order.
    pub fn get_variables(&self, session_id: SessionId, scope: &str) -> Result<Vec<Variable>> {
        self.scopes.with(session_id, |scopes| {
            scopes
                .get(scope)
                .map(|entries| entries.values().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Every variable of the session across its scopes; empty for unknown sessions.
    #[must_use]
    pub fn get_session_variables(&self, session_id: SessionId) -> Vec<Variable> {
        self.scopes
            .with(session_id, |scopes| {
                scopes
                    .values()
                    .flat_map(|entries| entries.values().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Scope names defined for the session.
    pub fn scope_names(&self, session_id: SessionId) -> Result<Vec<SmolStr>> {
        self.scopes
            .with(session_id, |scopes| scopes.keys().cloned().collect())
    }

    /// Resolve a (possibly dotted) name in the scopes visible from a frame:
    /// its local scope, then `session`, then `global`.
    #[must_use]
    pub fn lookup(&self, session_id: SessionId, local_scope: &str, name: &str) -> Option<SqlValue> {
        let mut path = name.split('.');
        let head = path.next()?;
        let rest: Vec<&str> = path.collect();
        self.scopes
            .with(session_id, |scopes| {
                [local_scope, SESSION_SCOPE, GLOBAL_SCOPE]
                    .iter()
                    .filter_map(|scope| scopes.get(*scope))
                    .find_map(|entries| {
                        entries
                            .get(head)
                            .and_then(|variable| variable.resolve_path(&rest))
                            .map(|variable| variable.value.clone())
                    })
            })
            .ok()
            .flatten()
    }

    /// Copy of every scope of the session.
    pub(crate) fn capture_scopes(&self, session_id: SessionId) -> Result<IndexMap<SmolStr, Vec<Variable>>> {
        self.scopes.with(session_id, |scopes| {
            scopes
                .iter()
                .map(|(name, entries)| (name.clone(), entries.values().cloned().collect()))
                .collect()
        })
    }

    /// Replace the session's scopes with a captured copy.
    pub(crate) fn restore_scopes(
        &self,
        session_id: SessionId,
        captured: &IndexMap<SmolStr, Vec<Variable>>,
    ) -> Result<()> {
        self.scopes.with(session_id, |scopes| {
            *scopes = captured
                .iter()
                .map(|(name, variables)| {
                    let entries = variables
                        .iter()
                        .map(|variable| (variable.name.clone(), variable.clone()))
                        .collect();
                    (name.clone(), entries)
                })
                .collect();
        })
    }

    /// Drop every scope of the session. Transaction state is untouched.
    pub fn clear_session(&self, session_id: SessionId) -> bool {
        self.scopes.remove(session_id).is_some()
    }

    /// Store a transaction, returning the state it replaced.
    pub fn set_transaction_state(&self, state: TransactionState) -> Option<TransactionState> {
        debug!(transaction = %state.id, status = ?state.status, "transaction state updated");
        let mut transactions = self.transactions.write().expect("transactions poisoned");
        transactions.insert(state.id.clone(), state)
    }

    #[must_use]
    pub fn transaction_state(&self, id: &str) -> Option<TransactionState> {
        let transactions = self.transactions.read().expect("transactions poisoned");
        transactions.get(id).cloned()
    }

    pub fn remove_transaction(&self, id: &str) -> Option<TransactionState> {
        let mut transactions = self.transactions.write().expect("transactions poisoned");
        transactions.shift_remove(id)
    }

    /// Transactions that are neither committed nor aborted.
    #[must_use]
    pub fn active_transactions(&self) -> Vec<TransactionState> {
        let transactions = self.transactions.read().expect("transactions poisoned");
        transactions
            .values()
            .filter(|state| state.is_active())
            .cloned()
            .collect()
    }

    fn with_transaction<R>(&self, id: &str, f: impl FnOnce(&TransactionState) -> R) -> Result<R> {
        let transactions = self.transactions.read().expect("transactions poisoned");
        transactions
            .get(id)
            .map(f)
            .ok_or_else(|| DebugError::not_found("transaction", id))
    }

    pub fn transaction_locks(&self, id: &str) -> Result<TransactionLocks> {
        self.with_transaction(id, |state| TransactionLocks {
            held: state.locks_held.clone(),
            waiting: state.locks_waiting.clone(),
        })
    }

    pub fn is_transaction_blocked(&self, id: &str) -> Result<bool> {
        self.with_transaction(id, |state| !state.locks_waiting.is_empty())
    }

    pub fn blocking_tree(&self, id: &str) -> Result<BlockingTree> {
        self.with_transaction(id, TransactionState::blocking_tree)
    }

    /// Find every wait-for cycle among active transactions.
    #[must_use]
    pub fn detect_deadlocks(&self) -> DeadlockReport {
        let trees: Vec<BlockingTree> = self
            .active_transactions()
            .iter()
            .map(TransactionState::blocking_tree)
            .collect();
        let cycles = WaitForGraph::from_trees(&trees).find_cycles();
        if !cycles.is_empty() {
            warn!(count = cycles.len(), "deadlock detected");
        }
        DeadlockReport {
            count: cycles.len(),
            cycles,
        }
    }

    pub(crate) fn clear(&self) {
        self.scopes.clear();
        self.transactions
            .write()
            .expect("transactions poisoned")
            .clear();
    }
}
