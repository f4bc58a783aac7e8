//! Session identity, configuration and the session state machine.

#![allow(missing_docs)]

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::breakpoints::BreakpointId;
use crate::config::{SessionConfig, SessionConfigUpdate};
use crate::control::ExecutionPoint;
use crate::error::{DebugError, Result};
use crate::event::{DebugEvent, EventBus, PauseReason};
use crate::slots::SessionSlots;

/// Session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    /// Statements may execute.
    Running,
    /// Forward progress is suspended until resume or step.
    Paused,
    /// Finished; terminal.
    Stopped,
    /// Failed unrecoverably; terminal.
    Error,
}

impl SessionStatus {
    /// Whether the state machine allows moving from `self` to `to`.
    #[must_use]
    pub fn can_transition(self, to: SessionStatus) -> bool {
        match (self, to) {
            (SessionStatus::Stopped | SessionStatus::Error, _) => false,
            (_, SessionStatus::Error)
            | (SessionStatus::Running, SessionStatus::Paused | SessionStatus::Stopped)
            | (SessionStatus::Paused, SessionStatus::Running | SessionStatus::Stopped) => true,
            _ => false,
        }
    }

    /// Stopped and errored sessions never change state again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Error)
    }
}

/// One frame of the session call stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    /// Procedure executing in this frame; `None` for the top-level script.
    pub procedure_id: Option<SmolStr>,
    /// Call depth, 0 for the script.
    pub depth: u32,
    /// Scope names visible in this frame, innermost first.
    pub scopes: Vec<SmolStr>,
}

/// Mutable execution state of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub status: SessionStatus,
    pub pause_reason: Option<PauseReason>,
    pub current_point: Option<ExecutionPoint>,
    pub breakpoints: Vec<BreakpointId>,
    pub call_stack: Vec<CallFrame>,
}

/// Per-session counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub statements_executed: u64,
    pub breakpoint_hits: u64,
    pub execution_time: Duration,
}

/// A debugging session bound to one user and one connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub user_id: SmolStr,
    pub connection_id: SmolStr,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub config: SessionConfig,
    pub state: SessionState,
    pub stats: SessionStats,
}

/// Owns every live session and enforces the state machine.
#[derive(Debug)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    defaults: SessionConfig,
    sessions: SessionSlots<Session>,
    events: Arc<EventBus>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(defaults: SessionConfig, events: Arc<EventBus>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            defaults,
            sessions: SessionSlots::new("session"),
            events,
        }
    }

    /// Create a running session with defaults merged with `update`.
    pub fn create(
        &self,
        user_id: &str,
        connection_id: &str,
        update: Option<SessionConfigUpdate>,
    ) -> Result<Session> {
        let mut config = self.defaults.clone();
        if let Some(update) = update {
            config.apply_update(update)?;
        }
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Session {
            id,
            user_id: SmolStr::new(user_id),
            connection_id: SmolStr::new(connection_id),
            created_at: OffsetDateTime::now_utc(),
            config,
            state: SessionState {
                status: SessionStatus::Running,
                pause_reason: None,
                current_point: None,
                breakpoints: Vec::new(),
                call_stack: Vec::new(),
            },
            stats: SessionStats::default(),
        };
        self.sessions.insert(id, session.clone());
        info!(session = %id, user = user_id, connection = connection_id, "session created");
        self.events.publish(DebugEvent::SessionCreated {
            session: id,
            user_id: session.user_id.clone(),
        });
        Ok(session)
    }

    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.with(id, |session| session.clone()).ok()
    }

    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains(id)
    }

    /// Sessions owned by `user_id`, oldest first.
    #[must_use]
    pub fn user_sessions(&self, user_id: &str) -> Vec<Session> {
        let mut sessions = self
            .sessions
            .filter_map(|session| (session.user_id == user_id).then(|| session.clone()));
        sessions.sort_by_key(|session| session.id);
        sessions
    }

    /// Every live session, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<Session> {
        let mut sessions = self.sessions.filter_map(|session| Some(session.clone()));
        sessions.sort_by_key(|session| session.id);
        sessions
    }

    /// Drop the session record. Returns whether a session existed.
    pub fn remove(&self, id: SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            info!(session = %id, "session deleted");
            self.events.publish(DebugEvent::SessionDeleted { session: id });
        }
        removed
    }

    pub fn status(&self, id: SessionId) -> Result<SessionStatus> {
        self.sessions.with(id, |session| session.state.status)
    }

    pub fn config(&self, id: SessionId) -> Result<SessionConfig> {
        self.sessions.with(id, |session| session.config.clone())
    }

    /// Move the session to `to`. Returns `Ok(false)` when it is already there.
    pub fn transition(
        &self,
        id: SessionId,
        to: SessionStatus,
        reason: Option<PauseReason>,
    ) -> Result<bool> {
        let from = self.sessions.with(id, |session| {
            let from = session.state.status;
            if from == to {
                return Ok(None);
            }
            if !from.can_transition(to) {
                warn!(session = %id, ?from, ?to, "rejected state transition");
                return Err(DebugError::invalid_state(format!(
                    "cannot move session {id} from {from:?} to {to:?}"
                )));
            }
            session.state.status = to;
            session.state.pause_reason = if to == SessionStatus::Paused {
                reason
            } else {
                None
            };
            if to.is_terminal() {
                session.state.call_stack.clear();
            }
            Ok(Some(from))
        })??;
        let Some(from) = from else {
            return Ok(false);
        };
        debug!(session = %id, ?from, ?to, "session state changed");
        self.events.publish(DebugEvent::SessionStateChanged {
            session: id,
            from,
            to,
        });
        Ok(true)
    }

    /// Record where the session currently is.
    pub fn set_position(
        &self,
        id: SessionId,
        point: Option<ExecutionPoint>,
        call_stack: Vec<CallFrame>,
    ) -> Result<()> {
        self.sessions.with(id, |session| {
            session.state.current_point = point;
            session.state.call_stack = call_stack;
        })
    }

    pub fn attach_breakpoint(&self, id: SessionId, breakpoint: BreakpointId) -> Result<()> {
        self.sessions.with(id, |session| {
            if !session.state.breakpoints.contains(&breakpoint) {
                session.state.breakpoints.push(breakpoint);
            }
        })
    }

    pub fn detach_breakpoint(&self, id: SessionId, breakpoint: BreakpointId) -> Result<()> {
        self.sessions.with(id, |session| {
            session.state.breakpoints.retain(|current| *current != breakpoint);
        })
    }

    pub fn record_statement(&self, id: SessionId, elapsed: Duration) -> Result<()> {
        self.sessions.with(id, |session| {
            session.stats.statements_executed += 1;
            session.stats.execution_time += elapsed;
        })
    }

    pub fn record_breakpoint_hits(&self, id: SessionId, hits: u64) -> Result<()> {
        self.sessions.with(id, |session| {
            session.stats.breakpoint_hits += hits;
        })
    }

    pub fn stats(&self, id: SessionId) -> Result<SessionStats> {
        self.sessions.with(id, |session| session.stats.clone())
    }

    /// Drop every session without cascading; used on engine shutdown.
    pub(crate) fn clear(&self) {
        self.sessions.clear();
    }
}
