//! Statement-by-statement execution, stepping and rewind.
//!
//! Pausing never blocks a thread. A unit of work queued by
//! [`ExecutionController::execute_query`] is driven until it pauses, fails or
//! runs out of statements; the remainder stays queued with its runner and is
//! picked up again by a later `resume` or `step_*` call.

mod operation;
mod point;
mod runner;
mod script;
mod tokens;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use smol_str::SmolStr;
use time::OffsetDateTime;
use tracing::{debug, trace, warn};

use crate::breakpoints::{
    BreakpointId, BreakpointStore, BreakpointType, ContextEvent, ExecutionContext, MatchOutcome,
};
use crate::config::{DebugLevel, SessionConfig};
use crate::error::{DebugError, Result};
use crate::event::{DebugEvent, EventBus, PauseReason};
use crate::inspector::{
    local_scope_name, IsolationLevel, StateInspector, TransactionEvent, TransactionState,
    Variable, GLOBAL_SCOPE, SESSION_SCOPE,
};
use crate::session::{CallFrame, SessionId, SessionRegistry, SessionStatus};
use crate::slots::SessionSlots;
use crate::time_travel::{generate_inverse, generate_inverse_sql, RowChange};
use crate::value::SqlValue;

use operation::RecordedOperation;

pub use operation::{DebugOperation, Snapshot};
pub use point::{ControlOutcome, ExecutionPoint, ExecutionStage, StepKind};
pub use runner::{PlanNode, QueryResult, StatementRunner};
pub use script::{Script, ScriptBuilder, Statement};

#[derive(Debug, Clone, Copy)]
struct StepState {
    kind: StepKind,
    target_depth: u32,
    started: bool,
}

struct PendingWork {
    script: Script,
    params: Vec<SqlValue>,
    runner: Arc<dyn StatementRunner>,
    config: SessionConfig,
    cursor: usize,
    /// Breakpoints at `cursor` were already evaluated; resuming runs it directly.
    boundary_evaluated: bool,
    depth: u32,
    step: Option<StepState>,
}

impl fmt::Debug for PendingWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingWork")
            .field("statements", &self.script.len())
            .field("cursor", &self.cursor)
            .field("boundary_evaluated", &self.boundary_evaluated)
            .field("depth", &self.depth)
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct ControlState {
    history: VecDeque<ExecutionPoint>,
    operations: VecDeque<RecordedOperation>,
    pending: Option<PendingWork>,
}

enum Executed {
    Continue,
    Pause(PauseReason, ExecutionPoint),
    Failed(DebugError),
}

type Captured = (IndexMap<SmolStr, Vec<Variable>>, Vec<TransactionState>);

/// Drives units of work for every session.
#[derive(Debug)]
pub struct ExecutionController {
    registry: Arc<SessionRegistry>,
    breakpoints: Arc<BreakpointStore>,
    inspector: Arc<StateInspector>,
    events: Arc<EventBus>,
    sessions: SessionSlots<ControlState>,
    next_operation: AtomicU64,
}

impl ExecutionController {
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        breakpoints: Arc<BreakpointStore>,
        inspector: Arc<StateInspector>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            breakpoints,
            inspector,
            events,
            sessions: SessionSlots::new("session"),
            next_operation: AtomicU64::new(1),
        }
    }

    pub fn register_session(&self, session: SessionId) {
        self.sessions.insert(session, ControlState::default());
    }

    /// Drop history, recorded operations and queued work of the session.
    pub fn clear_session(&self, session: SessionId) -> bool {
        self.sessions.remove(session).is_some()
    }

    /// Queue a unit of work and drive it until it pauses, fails or finishes.
    ///
    /// Parameters are bound as read-only variables `$1..$n` in the `local`
    /// scope and passed to the runner with every statement. Returns the
    /// session status once the call stops making progress.
    pub fn execute_query(
        &self,
        session: SessionId,
        script: impl Into<Script>,
        params: Vec<SqlValue>,
        runner: Option<Arc<dyn StatementRunner>>,
    ) -> Result<SessionStatus> {
        let runner = runner.ok_or(DebugError::MissingDependency("statement runner"))?;
        let script = script.into();
        let slot = self.sessions.get(session)?;
        let mut state = slot.lock().expect("control state poisoned");
        let status = self.registry.status(session)?;
        if status.is_terminal() {
            return Err(DebugError::invalid_state(format!(
                "session {session} is {status:?}; create a new session"
            )));
        }
        if state.pending.is_some() {
            return Err(DebugError::invalid_state(format!(
                "session {session} already has queued work"
            )));
        }
        if script.is_empty() {
            return Err(DebugError::validation("script has no statements"));
        }
        let config = self.registry.config(session)?;
        let local = local_scope_name(None);
        for (position, value) in (1_u32..).zip(&params) {
            let variable = Variable::new(format!("${position}"), value.clone()).read_only();
            self.inspector.force_variable(session, &local, variable)?;
        }
        debug!(session = %session, statements = script.len(), "unit of work queued");
        state.pending = Some(PendingWork {
            script,
            params,
            runner,
            config,
            cursor: 0,
            boundary_evaluated: false,
            depth: 0,
            step: None,
        });
        self.drive(session, &mut state)
    }

    /// Mark the session paused at its current point. Work in flight on
    /// another thread stops at its next statement boundary.
    pub fn pause(&self, session: SessionId) -> Result<ControlOutcome> {
        match self.registry.status(session)? {
            SessionStatus::Paused => Ok(ControlOutcome::Ignored),
            SessionStatus::Running => {
                if !self.registry.transition(
                    session,
                    SessionStatus::Paused,
                    Some(PauseReason::Pause),
                )? {
                    return Ok(ControlOutcome::Ignored);
                }
                let point = self
                    .registry
                    .get(session)
                    .and_then(|current| current.state.current_point);
                debug!(session = %session, "pause requested");
                self.events.publish(DebugEvent::Paused {
                    session,
                    reason: PauseReason::Pause,
                    point,
                });
                Ok(ControlOutcome::Applied)
            }
            status => Err(DebugError::invalid_state(format!(
                "cannot pause session {session} while it is {status:?}"
            ))),
        }
    }

    /// Continue a paused session until the next pause or the end of its work.
    pub fn resume(&self, session: SessionId) -> Result<SessionStatus> {
        let slot = self.sessions.get(session)?;
        let mut state = slot.lock().expect("control state poisoned");
        self.require_paused(session, "resume")?;
        if let Some(work) = state.pending.as_mut() {
            work.step = None;
        }
        self.registry
            .transition(session, SessionStatus::Running, None)?;
        debug!(session = %session, "resumed");
        self.events.publish(DebugEvent::Resumed { session });
        self.drive(session, &mut state)
    }

    pub fn step_over(&self, session: SessionId) -> Result<SessionStatus> {
        self.step(session, StepKind::Over)
    }

    pub fn step_into(&self, session: SessionId) -> Result<SessionStatus> {
        self.step(session, StepKind::Into)
    }

    pub fn step_out(&self, session: SessionId) -> Result<SessionStatus> {
        self.step(session, StepKind::Out)
    }

    fn step(&self, session: SessionId, kind: StepKind) -> Result<SessionStatus> {
        let slot = self.sessions.get(session)?;
        let mut state = slot.lock().expect("control state poisoned");
        self.require_paused(session, "step")?;
        let Some(work) = state.pending.as_mut() else {
            self.registry
                .transition(session, SessionStatus::Stopped, None)?;
            debug!(session = %session, ?kind, "step with nothing queued; stopped");
            self.events.publish(DebugEvent::Stepped { session, kind });
            return Ok(SessionStatus::Stopped);
        };
        let target_depth = match kind {
            StepKind::Into | StepKind::Over => work.depth,
            StepKind::Out => work.depth.saturating_sub(1),
        };
        work.step = Some(StepState {
            kind,
            target_depth,
            started: false,
        });
        self.registry
            .transition(session, SessionStatus::Running, None)?;
        debug!(session = %session, ?kind, target_depth, "step");
        self.events.publish(DebugEvent::Stepped { session, kind });
        self.drive(session, &mut state)
    }

    /// Stop the session and drop its queued work.
    pub fn stop(&self, session: SessionId) -> Result<ControlOutcome> {
        let slot = self.sessions.get(session)?;
        let mut state = slot.lock().expect("control state poisoned");
        match self.registry.status(session)? {
            SessionStatus::Stopped => Ok(ControlOutcome::Ignored),
            SessionStatus::Error => Err(DebugError::invalid_state(format!(
                "session {session} already failed"
            ))),
            SessionStatus::Running | SessionStatus::Paused => {
                state.pending = None;
                self.registry
                    .transition(session, SessionStatus::Stopped, None)?;
                debug!(session = %session, "stopped");
                Ok(ControlOutcome::Applied)
            }
        }
    }

    /// Undo the most recent recorded operation by running its inverse.
    ///
    /// On success the operation leaves the log and the variable scopes
    /// captured before it ran are restored. If the runner fails part way
    /// through a multi-statement inverse, the statements that already ran
    /// stay applied and the operation stays in the log; the next rewind
    /// resumes at the statement that failed.
    pub fn rewind(
        &self,
        session: SessionId,
        runner: Option<Arc<dyn StatementRunner>>,
    ) -> Result<DebugOperation> {
        let runner = runner.ok_or(DebugError::MissingDependency("statement runner"))?;
        let slot = self.sessions.get(session)?;
        let mut state = slot.lock().expect("control state poisoned");
        let Some(mut recorded) = state.operations.pop_back() else {
            return Err(DebugError::invalid_state("nothing to rewind"));
        };
        let inverse = generate_inverse(&recorded.operation.change);
        for (index, statement) in inverse.iter().enumerate().skip(recorded.undone) {
            if statement.is_noop() {
                trace!(session = %session, %statement, "skipping inverse");
                continue;
            }
            let sql = statement.to_sql();
            if let Err(error) = runner.run(&sql, &[]) {
                warn!(
                    session = %session,
                    operation = recorded.operation.id,
                    applied = index,
                    %error,
                    "rewind failed"
                );
                recorded.undone = index;
                state.operations.push_back(recorded);
                self.events.publish(DebugEvent::QueryFailed {
                    session,
                    query_id: 0,
                    error: error.clone(),
                });
                return Err(DebugError::ExecutionFailure { query: 0, error });
            }
        }
        let operation = &recorded.operation;
        self.inspector
            .restore_scopes(session, &recorded.snapshot.variables)?;
        let sql = generate_inverse_sql(&operation.change);
        debug!(session = %session, operation = operation.id, query = operation.query_id, "rewound");
        self.events.publish(DebugEvent::Rewound {
            session,
            operation: operation.id,
            sql,
        });
        Ok(recorded.operation)
    }

    /// Execution points recorded for the session, oldest first.
    pub fn get_execution_history(&self, session: SessionId) -> Result<Vec<ExecutionPoint>> {
        self.sessions
            .with(session, |state| state.history.iter().cloned().collect())
    }

    /// Recorded data-modifying operations, oldest first.
    pub fn operations(&self, session: SessionId) -> Result<Vec<DebugOperation>> {
        self.sessions.with(session, |state| {
            state
                .operations
                .iter()
                .map(|recorded| recorded.operation.clone())
                .collect()
        })
    }

    pub fn snapshots(&self, session: SessionId) -> Result<Vec<Snapshot>> {
        self.sessions.with(session, |state| {
            state
                .operations
                .iter()
                .map(|recorded| recorded.snapshot.clone())
                .collect()
        })
    }

    /// Total retained execution points across sessions.
    pub(crate) fn history_len(&self) -> usize {
        self.sessions
            .filter_map(|state| Some(state.history.len()))
            .into_iter()
            .sum()
    }

    /// Evaluate breakpoints for an event observed outside the statement loop
    /// (lock and transaction updates). A pausing match pauses a running session.
    pub(crate) fn observe(&self, context: &ExecutionContext) -> Result<Option<BreakpointId>> {
        let session = context.session_id;
        let local = local_scope_name(None);
        let Some(id) = self.evaluate(context, &local)? else {
            return Ok(None);
        };
        let reason = PauseReason::Breakpoint { id };
        if self.registry.status(session)? == SessionStatus::Running
            && self
                .registry
                .transition(session, SessionStatus::Paused, Some(reason))?
        {
            let point = self
                .registry
                .get(session)
                .and_then(|current| current.state.current_point);
            debug!(session = %session, breakpoint = %id, "paused by observed event");
            self.events.publish(DebugEvent::Paused {
                session,
                reason,
                point,
            });
        }
        Ok(Some(id))
    }

    pub(crate) fn clear(&self) {
        self.sessions.clear();
    }

    fn require_paused(&self, session: SessionId, action: &str) -> Result<()> {
        match self.registry.status(session)? {
            SessionStatus::Paused => Ok(()),
            status => Err(DebugError::invalid_state(format!(
                "cannot {action} session {session} while it is {status:?}"
            ))),
        }
    }

    fn drive(&self, session: SessionId, state: &mut ControlState) -> Result<SessionStatus> {
        while let Some(mut work) = state.pending.take() {
            let status = self.registry.status(session)?;
            let statement = work.script.statements().get(work.cursor).cloned();
            match status {
                SessionStatus::Running => {}
                SessionStatus::Paused => {
                    if let Some(statement) = statement.filter(|_| !work.boundary_evaluated) {
                        work.boundary_evaluated = true;
                        let point = self.enter_statement(session, state, &mut work, &statement)?;
                        if work.cursor == 0 {
                            debug!(session = %session, query = statement.query_id, "paused at entry");
                            self.events.publish(DebugEvent::Paused {
                                session,
                                reason: PauseReason::Entry,
                                point: Some(point),
                            });
                        } else {
                            // Whoever paused the session already announced it.
                            debug!(session = %session, query = statement.query_id, "pause reached boundary");
                        }
                    }
                    state.pending = Some(work);
                    return Ok(SessionStatus::Paused);
                }
                SessionStatus::Stopped | SessionStatus::Error => {
                    debug!(session = %session, ?status, "dropping queued work");
                    return Ok(status);
                }
            }
            let Some(statement) = statement else {
                return self.finish(session, state, &work.config);
            };

            if !work.boundary_evaluated {
                work.boundary_evaluated = true;
                if let Some((reason, point)) =
                    self.evaluate_boundary(session, state, &mut work, &statement)?
                {
                    work.step = None;
                    self.suspend(session, reason, point, &statement)?;
                    state.pending = Some(work);
                    return Ok(SessionStatus::Paused);
                }
            }

            match self.run_statement(session, state, &work, &statement)? {
                Executed::Continue => {
                    work.cursor += 1;
                    work.boundary_evaluated = false;
                    if let Some(step) = work.step.as_mut() {
                        step.started = true;
                    }
                    state.pending = Some(work);
                }
                Executed::Pause(reason, point) => {
                    work.cursor += 1;
                    work.boundary_evaluated = false;
                    work.step = None;
                    self.suspend(session, reason, point, &statement)?;
                    state.pending = Some(work);
                    return Ok(SessionStatus::Paused);
                }
                Executed::Failed(error) => {
                    if work.config.auto_break_on_error {
                        self.registry
                            .transition(session, SessionStatus::Error, None)?;
                    }
                    return Err(error);
                }
            }
        }
        self.registry.status(session)
    }

    /// Record the boundary point of `statement` and move the session there.
    fn enter_statement(
        &self,
        session: SessionId,
        state: &mut ControlState,
        work: &mut PendingWork,
        statement: &Statement,
    ) -> Result<ExecutionPoint> {
        let point = ExecutionPoint::at(statement, ExecutionStage::Execute);
        push_point(&mut state.history, point.clone(), &work.config);
        work.depth = statement.depth();
        self.registry
            .set_position(session, Some(point.clone()), call_stack(statement))?;
        trace!(session = %session, query = statement.query_id, line = statement.line, depth = work.depth, "statement boundary");
        Ok(point)
    }

    /// Evaluate every breakpoint that can fire before `statement` runs, then
    /// the pending step. All matches count hits; the first one pauses.
    fn evaluate_boundary(
        &self,
        session: SessionId,
        state: &mut ControlState,
        work: &mut PendingWork,
        statement: &Statement,
    ) -> Result<Option<(PauseReason, ExecutionPoint)>> {
        let point = self.enter_statement(session, state, work, statement)?;
        let local = local_scope_name(statement.procedure_id().map(SmolStr::as_str));
        let mut pause: Option<(BreakpointId, ExecutionPoint)> = None;

        let mut contexts = vec![statement_context(session, statement, ContextEvent::Statement)];
        if let Some((event, isolation_level)) = transaction_event(&statement.sql) {
            contexts.push(statement_context(
                session,
                statement,
                ContextEvent::Transaction {
                    event,
                    isolation_level,
                    transaction: None,
                },
            ));
        }
        let mut matched = Vec::new();
        for context in &contexts {
            let outcome = self.evaluate_outcome(context, &local)?;
            matched.extend(outcome.hits.iter().map(|breakpoint| breakpoint.id));
            if let Some(breakpoint) = outcome.pause {
                pause.get_or_insert_with(|| (breakpoint.id, point.clone()));
            }
        }

        let detailed = work.config.level >= DebugLevel::Detailed;
        if detailed || self.breakpoints.has_enabled(session, BreakpointType::Plan) {
            let plan = work.runner.explain(&statement.sql).unwrap_or_default();
            if detailed && !plan.is_empty() {
                trace!(session = %session, query = statement.query_id, nodes = plan.len(), "plan captured");
                self.events.publish(DebugEvent::PlanCaptured {
                    session,
                    query_id: statement.query_id,
                    plan: plan.clone(),
                });
            }
            for node in plan.iter().flat_map(PlanNode::flatten) {
                let mut context = statement_context(
                    session,
                    statement,
                    ContextEvent::Plan { node: node.clone() },
                );
                context.stage = ExecutionStage::Plan;
                let outcome = self.evaluate_outcome(&context, &local)?;
                matched.extend(outcome.hits.iter().map(|breakpoint| breakpoint.id));
                if let Some(breakpoint) = outcome.pause {
                    if pause.is_none() {
                        let plan_point = ExecutionPoint::at(statement, ExecutionStage::Plan)
                            .with_plan_node(&node.id);
                        push_point(&mut state.history, plan_point.clone(), &work.config);
                        pause = Some((breakpoint.id, plan_point));
                    }
                }
            }
        }

        if work.config.level == DebugLevel::Verbose {
            let paused_by = pause.as_ref().map(|(id, _)| *id);
            trace!(session = %session, query = statement.query_id, matched = matched.len(), ?paused_by, "boundary evaluated");
            self.events.publish(DebugEvent::BoundaryEvaluated {
                session,
                query_id: statement.query_id,
                matched,
                paused_by,
            });
        }

        if let Some((id, point)) = pause {
            return Ok(Some((PauseReason::Breakpoint { id }, point)));
        }
        let step_due = work.step.is_some_and(|step| {
            step.started
                && match step.kind {
                    StepKind::Into => true,
                    StepKind::Over | StepKind::Out => statement.depth() <= step.target_depth,
                }
        });
        Ok(step_due.then_some((PauseReason::Step, point)))
    }

    fn run_statement(
        &self,
        session: SessionId,
        state: &mut ControlState,
        work: &PendingWork,
        statement: &Statement,
    ) -> Result<Executed> {
        let captured = if work.config.time_travel_enabled {
            Some(self.capture(session)?)
        } else {
            None
        };
        let local = local_scope_name(statement.procedure_id().map(SmolStr::as_str));
        debug!(session = %session, query = statement.query_id, line = statement.line, "statement started");
        self.events.publish(DebugEvent::QueryStarted {
            session,
            point: ExecutionPoint::at(statement, ExecutionStage::Execute),
            sql: statement.sql.clone(),
        });

        let started = Instant::now();
        let result = work.runner.run(&statement.sql, &work.params);
        let elapsed = started.elapsed();
        self.registry.record_statement(session, elapsed)?;

        let result = match result {
            Ok(result) => result,
            Err(error) => {
                warn!(session = %session, query = statement.query_id, %error, "statement failed");
                self.events.publish(DebugEvent::QueryFailed {
                    session,
                    query_id: statement.query_id,
                    error: error.clone(),
                });
                let context = statement_context(
                    session,
                    statement,
                    ContextEvent::Exception {
                        error: error.clone(),
                    },
                );
                if let Some(id) = self.evaluate(&context, &local)? {
                    let point = ExecutionPoint::at(statement, ExecutionStage::Complete);
                    push_point(&mut state.history, point.clone(), &work.config);
                    return Ok(Executed::Pause(PauseReason::Exception { id }, point));
                }
                return Ok(Executed::Failed(DebugError::ExecutionFailure {
                    query: statement.query_id,
                    error,
                }));
            }
        };

        let row_count = i64::try_from(result.row_count).unwrap_or(i64::MAX);
        self.inspector.force_variable(
            session,
            SESSION_SCOPE,
            Variable::new("ROW_COUNT", row_count).read_only(),
        )?;
        self.inspector.force_variable(
            session,
            SESSION_SCOPE,
            Variable::new("LAST_QUERY_ID", i64::from(statement.query_id)).read_only(),
        )?;
        debug!(session = %session, query = statement.query_id, rows = result.row_count, ?elapsed, "statement completed");
        self.events.publish(DebugEvent::QueryCompleted {
            session,
            query_id: statement.query_id,
            row_count: result.row_count,
            elapsed,
        });

        let Some(change) = result.change else {
            return Ok(Executed::Continue);
        };
        if work.config.level >= DebugLevel::Detailed {
            self.events.publish(DebugEvent::DataChanged {
                session,
                query_id: statement.query_id,
                change: change.clone(),
            });
        }
        let mut context = statement_context(
            session,
            statement,
            ContextEvent::DataChange {
                table: change.table.clone(),
                operation: change.operation.clone(),
                columns: change.changed_columns(),
            },
        );
        context.stage = ExecutionStage::Complete;
        if let Some(captured) = captured {
            self.record_operation(&mut state.operations, work, statement, change, captured);
        }
        if let Some(id) = self.evaluate(&context, &local)? {
            let point = ExecutionPoint::at(statement, ExecutionStage::Complete);
            push_point(&mut state.history, point.clone(), &work.config);
            return Ok(Executed::Pause(PauseReason::Breakpoint { id }, point));
        }
        Ok(Executed::Continue)
    }

    fn capture(&self, session: SessionId) -> Result<Captured> {
        Ok((
            self.inspector.capture_scopes(session)?,
            self.inspector.active_transactions(),
        ))
    }

    fn record_operation(
        &self,
        operations: &mut VecDeque<RecordedOperation>,
        work: &PendingWork,
        statement: &Statement,
        change: RowChange,
        (variables, transactions): Captured,
    ) {
        let id = self.next_operation.fetch_add(1, Ordering::Relaxed);
        let timestamp = OffsetDateTime::now_utc();
        trace!(operation = id, query = statement.query_id, table = %change.table, "operation recorded");
        operations.push_back(RecordedOperation {
            operation: DebugOperation {
                id,
                query_id: statement.query_id,
                sql: statement.sql.clone(),
                change,
                timestamp,
            },
            snapshot: Snapshot {
                operation_id: id,
                timestamp,
                variables,
                transactions,
            },
            undone: 0,
        });
        while operations.len() > work.config.max_history_size {
            operations.pop_front();
        }
    }

    fn evaluate(&self, context: &ExecutionContext, local_scope: &str) -> Result<Option<BreakpointId>> {
        let outcome = self.evaluate_outcome(context, local_scope)?;
        Ok(outcome.pause.map(|breakpoint| breakpoint.id))
    }

    /// Match breakpoints against `context` and count their hits.
    fn evaluate_outcome(&self, context: &ExecutionContext, local_scope: &str) -> Result<MatchOutcome> {
        let session = context.session_id;
        let lookup = |name: &str| self.inspector.lookup(session, local_scope, name);
        let outcome = self.breakpoints.evaluate(context, &lookup)?;
        if !outcome.hits.is_empty() {
            self.registry
                .record_breakpoint_hits(session, outcome.hits.len() as u64)?;
        }
        Ok(outcome)
    }

    fn suspend(
        &self,
        session: SessionId,
        reason: PauseReason,
        point: ExecutionPoint,
        statement: &Statement,
    ) -> Result<()> {
        self.registry
            .set_position(session, Some(point.clone()), call_stack(statement))?;
        if !self
            .registry
            .transition(session, SessionStatus::Paused, Some(reason))?
        {
            debug!(session = %session, query = statement.query_id, ?reason, "already paused");
            return Ok(());
        }
        debug!(session = %session, query = statement.query_id, ?reason, "paused");
        self.events.publish(DebugEvent::Paused {
            session,
            reason,
            point: Some(point),
        });
        Ok(())
    }

    fn finish(
        &self,
        session: SessionId,
        state: &mut ControlState,
        config: &SessionConfig,
    ) -> Result<SessionStatus> {
        let point = ExecutionPoint::finished();
        push_point(&mut state.history, point.clone(), config);
        self.registry.set_position(session, Some(point), Vec::new())?;
        self.registry
            .transition(session, SessionStatus::Stopped, None)?;
        debug!(session = %session, "unit of work finished");
        Ok(SessionStatus::Stopped)
    }
}

fn push_point(history: &mut VecDeque<ExecutionPoint>, point: ExecutionPoint, config: &SessionConfig) {
    history.push_back(point);
    while history.len() > config.max_history_size {
        history.pop_front();
    }
}

fn statement_context(
    session: SessionId,
    statement: &Statement,
    event: ContextEvent,
) -> ExecutionContext {
    ExecutionContext {
        session_id: session,
        event,
        stage: ExecutionStage::Execute,
        query_id: Some(statement.query_id),
        line: Some(statement.line),
        procedure_id: statement.procedure_id().cloned(),
        sql: Some(statement.sql.clone()),
    }
}

/// Frames visible at `statement`, innermost first.
fn call_stack(statement: &Statement) -> Vec<CallFrame> {
    let frame = |procedure_id: Option<&SmolStr>, depth: u32| CallFrame {
        procedure_id: procedure_id.cloned(),
        depth,
        scopes: vec![
            local_scope_name(procedure_id.map(SmolStr::as_str)),
            SmolStr::new(SESSION_SCOPE),
            SmolStr::new(GLOBAL_SCOPE),
        ],
    };
    let mut frames = vec![frame(None, 0)];
    frames.extend(
        statement
            .call_path
            .iter()
            .zip(1_u32..)
            .map(|(procedure, depth)| frame(Some(procedure), depth)),
    );
    frames.reverse();
    frames
}

/// Classify transaction-control statements by their leading keywords.
fn transaction_event(sql: &str) -> Option<(TransactionEvent, Option<IsolationLevel>)> {
    let upper = sql.to_ascii_uppercase();
    let words: Vec<&str> = upper
        .split(|c: char| c.is_whitespace() || c == ';')
        .filter(|word| !word.is_empty())
        .collect();
    let event = match words.as_slice() {
        ["BEGIN", ..] | ["START", "TRANSACTION", ..] => TransactionEvent::Begin,
        ["COMMIT", ..] | ["END", ..] => TransactionEvent::Commit,
        ["SAVEPOINT", ..] | ["ROLLBACK", "TO", ..] => TransactionEvent::Savepoint,
        ["ROLLBACK", ..] | ["ABORT", ..] => TransactionEvent::Rollback,
        ["PREPARE", "TRANSACTION", ..] => TransactionEvent::Prepare,
        _ => return None,
    };
    let isolation = upper
        .find("ISOLATION LEVEL")
        .and_then(|at| IsolationLevel::from_sql(&upper[at + "ISOLATION LEVEL".len()..]));
    Some((event, isolation))
}
