//! The engine facade: one value owning every component, constructed once and
//! shared by reference with request handlers.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::breakpoints::{
    Breakpoint, BreakpointId, BreakpointRequest, BreakpointStore, ContextEvent, ExecutionContext,
};
use crate::config::{EngineConfig, SessionConfigUpdate};
use crate::control::{
    ControlOutcome, DebugOperation, ExecutionController, ExecutionPoint, Script, Snapshot,
    StatementRunner,
};
use crate::error::{DebugError, Result};
use crate::event::{DebugEvent, EventBus, EventKind};
use crate::inspector::{
    diff_locks, status_event, BlockingTree, DeadlockReport, LockEvent, StateInspector,
    TransactionLocks, TransactionState, Variable,
};
use crate::session::{Session, SessionId, SessionRegistry, SessionStats, SessionStatus};
use crate::value::SqlValue;

/// Engine-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Live sessions.
    pub sessions: usize,
    /// Live sessions by status.
    pub running: usize,
    /// Paused sessions.
    pub paused: usize,
    /// Stopped sessions.
    pub stopped: usize,
    /// Sessions in the error state.
    pub errored: usize,
    /// Breakpoints across sessions.
    pub breakpoints: usize,
    /// Statements executed by live sessions.
    pub statements_executed: u64,
    /// Breakpoint hits in live sessions.
    pub breakpoint_hits: u64,
    /// Tracked transactions that are neither committed nor aborted.
    pub active_transactions: usize,
    /// Retained execution points across sessions.
    pub history_points: usize,
}

/// Debugger engine.
///
/// Construct one per process with [`DebugEngine::new`] and share it (for
/// example behind an `Arc`) with every request handler.
#[derive(Debug)]
pub struct DebugEngine {
    config: EngineConfig,
    running: AtomicBool,
    events: Arc<EventBus>,
    registry: Arc<SessionRegistry>,
    breakpoints: Arc<BreakpointStore>,
    inspector: Arc<StateInspector>,
    controller: ExecutionController,
}

impl Default for DebugEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl DebugEngine {
    /// Create a started engine.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let events = Arc::new(EventBus::new(config.event_buffer));
        let registry = Arc::new(SessionRegistry::new(
            config.session.clone(),
            Arc::clone(&events),
        ));
        let breakpoints = Arc::new(BreakpointStore::new(Arc::clone(&events)));
        let inspector = Arc::new(StateInspector::new());
        let controller = ExecutionController::new(
            Arc::clone(&registry),
            Arc::clone(&breakpoints),
            Arc::clone(&inspector),
            Arc::clone(&events),
        );
        info!(
            database = %config.session.database,
            event_buffer = config.event_buffer,
            "debug engine started"
        );
        Self {
            config,
            running: AtomicBool::new(true),
            events,
            registry,
            breakpoints,
            inspector,
            controller,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop every live session and release all state. Later calls fail with
    /// `InvalidState`.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        for session in self.registry.all() {
            if !session.state.status.is_terminal() {
                if let Err(err) = self.controller.stop(session.id) {
                    warn!(session = %session.id, %err, "failed to stop session on shutdown");
                }
            }
        }
        self.controller.clear();
        self.breakpoints.clear();
        self.inspector.clear();
        self.registry.clear();
        self.events.clear();
        info!("debug engine shut down");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(DebugError::invalid_state("engine is shut down"))
        }
    }

    fn ensure_session(&self, session: SessionId) -> Result<()> {
        self.ensure_running()?;
        if self.registry.contains(session) {
            Ok(())
        } else {
            Err(DebugError::not_found("session", session))
        }
    }

    // Sessions

    /// Create a running session for `user_id` on `connection_id`.
    pub fn create_session(
        &self,
        user_id: &str,
        connection_id: &str,
        overrides: Option<SessionConfigUpdate>,
    ) -> Result<Session> {
        self.ensure_running()?;
        let session = self.registry.create(user_id, connection_id, overrides)?;
        self.breakpoints.register_session(session.id);
        self.controller.register_session(session.id);
        self.inspector.register_session(session.id);
        Ok(session)
    }

    #[must_use]
    pub fn get_session(&self, session: SessionId) -> Option<Session> {
        self.registry.get(session)
    }

    #[must_use]
    pub fn get_user_sessions(&self, user_id: &str) -> Vec<Session> {
        self.registry.user_sessions(user_id)
    }

    /// Delete a session and everything keyed by it. Returns whether the
    /// session existed.
    pub fn delete_session(&self, session: SessionId) -> bool {
        let removed = self.registry.remove(session);
        let breakpoints = self.breakpoints.clear_session(session);
        self.controller.clear_session(session);
        self.inspector.clear_session(session);
        if removed {
            debug!(session = %session, breakpoints, "session state released");
        }
        removed
    }

    // Breakpoints

    pub fn create_breakpoint(
        &self,
        session: SessionId,
        request: BreakpointRequest,
    ) -> Result<Breakpoint> {
        self.ensure_session(session)?;
        let breakpoint = self.breakpoints.create(session, request)?;
        self.registry.attach_breakpoint(session, breakpoint.id)?;
        Ok(breakpoint)
    }

    /// Create a breakpoint from a type tag (`line`, `query`, `data`,
    /// `transaction`, `lock`, `plan`, `exception`) and a JSON object of
    /// camelCase fields.
    pub fn create_breakpoint_from_json(
        &self,
        session: SessionId,
        type_tag: &str,
        fields: serde_json::Value,
    ) -> Result<Breakpoint> {
        let request = BreakpointRequest::from_json(type_tag, fields)?;
        self.create_breakpoint(session, request)
    }

    pub fn remove_breakpoint(&self, id: BreakpointId) -> Result<Breakpoint> {
        self.ensure_running()?;
        let breakpoint = self.breakpoints.remove(id)?;
        if self.registry.contains(breakpoint.session_id) {
            self.registry
                .detach_breakpoint(breakpoint.session_id, id)?;
        }
        Ok(breakpoint)
    }

    pub fn set_breakpoint_enabled(&self, id: BreakpointId, enabled: bool) -> Result<Breakpoint> {
        self.ensure_running()?;
        self.breakpoints.set_enabled(id, enabled)
    }

    #[must_use]
    pub fn get_breakpoint(&self, id: BreakpointId) -> Option<Breakpoint> {
        self.breakpoints.get(id)
    }

    #[must_use]
    pub fn get_breakpoints_for_session(&self, session: SessionId) -> Vec<Breakpoint> {
        self.breakpoints.for_session(session)
    }

    // Execution

    /// Run `script` through `runner`, pausing at breakpoints.
    ///
    /// Returns the session status once the call stops making progress:
    /// `Paused` at a breakpoint or entry stop, `Stopped` when the script ran
    /// to completion.
    pub fn execute_query(
        &self,
        session: SessionId,
        script: impl Into<Script>,
        params: Vec<SqlValue>,
        runner: Option<Arc<dyn StatementRunner>>,
    ) -> Result<SessionStatus> {
        self.ensure_running()?;
        self.controller
            .execute_query(session, script, params, runner)
    }

    pub fn pause(&self, session: SessionId) -> Result<ControlOutcome> {
        self.ensure_running()?;
        self.controller.pause(session)
    }

    pub fn resume(&self, session: SessionId) -> Result<SessionStatus> {
        self.ensure_running()?;
        self.controller.resume(session)
    }

    pub fn step_over(&self, session: SessionId) -> Result<SessionStatus> {
        self.ensure_running()?;
        self.controller.step_over(session)
    }

    pub fn step_into(&self, session: SessionId) -> Result<SessionStatus> {
        self.ensure_running()?;
        self.controller.step_into(session)
    }

    pub fn step_out(&self, session: SessionId) -> Result<SessionStatus> {
        self.ensure_running()?;
        self.controller.step_out(session)
    }

    pub fn stop(&self, session: SessionId) -> Result<ControlOutcome> {
        self.ensure_running()?;
        self.controller.stop(session)
    }

    /// Undo the most recent recorded data change of the session.
    pub fn rewind(
        &self,
        session: SessionId,
        runner: Option<Arc<dyn StatementRunner>>,
    ) -> Result<DebugOperation> {
        self.ensure_running()?;
        self.controller.rewind(session, runner)
    }

    pub fn get_execution_history(&self, session: SessionId) -> Result<Vec<ExecutionPoint>> {
        self.ensure_running()?;
        self.controller.get_execution_history(session)
    }

    pub fn get_operations(&self, session: SessionId) -> Result<Vec<DebugOperation>> {
        self.ensure_running()?;
        self.controller.operations(session)
    }

    pub fn get_snapshots(&self, session: SessionId) -> Result<Vec<Snapshot>> {
        self.ensure_running()?;
        self.controller.snapshots(session)
    }

    // Variables

    pub fn set_variable(&self, session: SessionId, scope: &str, variable: Variable) -> Result<()> {
        self.ensure_session(session)?;
        self.inspector.set_variable(session, scope, variable)
    }

    pub fn get_variables(&self, session: SessionId, scope: &str) -> Result<Vec<Variable>> {
        self.ensure_running()?;
        self.inspector.get_variables(session, scope)
    }

    #[must_use]
    pub fn get_session_variables(&self, session: SessionId) -> Vec<Variable> {
        self.inspector.get_session_variables(session)
    }

    // Transactions

    /// Store a transaction observed outside any session.
    pub fn set_transaction_state(&self, state: TransactionState) -> Result<Option<TransactionState>> {
        self.update_transaction(None, state)
    }

    /// Store a transaction as observed by `observer`.
    ///
    /// Status changes and lock changes relative to the previous state are
    /// raised as transaction and lock events against the observer's
    /// breakpoints. Returns the state that was replaced.
    pub fn update_transaction(
        &self,
        observer: Option<SessionId>,
        state: TransactionState,
    ) -> Result<Option<TransactionState>> {
        self.ensure_running()?;
        if let Some(session) = observer {
            self.ensure_session(session)?;
        }
        let previous = self.inspector.set_transaction_state(state.clone());
        self.events.publish(DebugEvent::TransactionUpdated {
            transaction: state.id.clone(),
            status: state.status,
        });
        let Some(session) = observer else {
            return Ok(previous);
        };
        let mut contexts = Vec::new();
        if let Some(event) = status_event(previous.as_ref().map(|prev| prev.status), state.status) {
            contexts.push(ContextEvent::Transaction {
                event,
                isolation_level: Some(state.isolation_level),
                transaction: Some(state.id.clone()),
            });
        }
        for change in diff_locks(previous.as_ref(), &state) {
            contexts.push(ContextEvent::Lock {
                event: change.event,
                granularity: Some(change.lock.granularity),
                resource: Some(change.lock.resource),
                transaction: state.id.clone(),
            });
        }
        for event in contexts {
            self.controller
                .observe(&ExecutionContext::detached(session, event))?;
        }
        Ok(previous)
    }

    #[must_use]
    pub fn get_transaction_state(&self, id: &str) -> Option<TransactionState> {
        self.inspector.transaction_state(id)
    }

    #[must_use]
    pub fn get_active_transactions(&self) -> Vec<TransactionState> {
        self.inspector.active_transactions()
    }

    pub fn get_transaction_locks(&self, id: &str) -> Result<TransactionLocks> {
        self.inspector.transaction_locks(id)
    }

    pub fn is_transaction_blocked(&self, id: &str) -> Result<bool> {
        self.inspector.is_transaction_blocked(id)
    }

    pub fn get_blocking_tree(&self, id: &str) -> Result<BlockingTree> {
        self.inspector.blocking_tree(id)
    }

    pub fn remove_transaction(&self, id: &str) -> Option<TransactionState> {
        self.inspector.remove_transaction(id)
    }

    /// Find wait-for cycles among active transactions.
    pub fn detect_deadlocks(&self) -> DeadlockReport {
        let report = self.inspector.detect_deadlocks();
        if report.count > 0 {
            self.events.publish(DebugEvent::DeadlockDetected {
                report: report.clone(),
            });
        }
        report
    }

    /// Detect deadlocks and raise one `deadlock` lock event per cycle against
    /// the session's breakpoints.
    pub fn detect_deadlocks_for(&self, session: SessionId) -> Result<DeadlockReport> {
        self.ensure_session(session)?;
        let report = self.detect_deadlocks();
        for cycle in &report.cycles {
            let Some(transaction) = cycle.first() else {
                continue;
            };
            let event = ContextEvent::Lock {
                event: LockEvent::Deadlock,
                granularity: None,
                resource: None,
                transaction: transaction.clone(),
            };
            self.controller
                .observe(&ExecutionContext::detached(session, event))?;
        }
        Ok(report)
    }

    // Statistics and events

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let mut stats = EngineStats {
            breakpoints: self.breakpoints.count(),
            active_transactions: self.inspector.active_transactions().len(),
            history_points: self.controller.history_len(),
            ..EngineStats::default()
        };
        for session in self.registry.all() {
            stats.sessions += 1;
            match session.state.status {
                SessionStatus::Running => stats.running += 1,
                SessionStatus::Paused => stats.paused += 1,
                SessionStatus::Stopped => stats.stopped += 1,
                SessionStatus::Error => stats.errored += 1,
            }
            stats.statements_executed += session.stats.statements_executed;
            stats.breakpoint_hits += session.stats.breakpoint_hits;
        }
        stats
    }

    pub fn session_stats(&self, session: SessionId) -> Result<SessionStats> {
        self.registry.stats(session)
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<DebugEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Receiver<DebugEvent> {
        self.events.subscribe_to(kinds)
    }

    /// Events buffered while nobody was subscribed.
    #[must_use]
    pub fn drain_events(&self) -> Vec<DebugEvent> {
        self.events.drain()
    }
}
