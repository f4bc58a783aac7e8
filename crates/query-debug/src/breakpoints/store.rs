//! Breakpoint ownership and evaluation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use time::OffsetDateTime;
use tracing::{debug, trace};

use crate::error::{DebugError, Result};
use crate::event::{DebugEvent, EventBus};
use crate::session::SessionId;
use crate::slots::SessionSlots;
use crate::value::SqlValue;

use super::condition::{format_log_message, parse_condition, parse_log_message, Condition, LogFragment};
use super::types::{Breakpoint, BreakpointId, BreakpointRequest, BreakpointType, ExecutionContext};

#[derive(Debug, Clone)]
struct StoredBreakpoint {
    breakpoint: Breakpoint,
    condition: Option<Condition>,
    log: Option<Vec<LogFragment>>,
}

/// Result of evaluating breakpoints against one context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    /// First pausing breakpoint that matched, after its hit was counted.
    pub pause: Option<Breakpoint>,
    /// Every breakpoint whose hit count increased.
    pub hits: Vec<Breakpoint>,
    /// Messages produced by matching logpoints.
    pub logs: Vec<(BreakpointId, String)>,
}

/// Owns breakpoint definitions per session.
#[derive(Debug)]
pub struct BreakpointStore {
    next_id: AtomicU64,
    sessions: SessionSlots<IndexMap<BreakpointId, StoredBreakpoint>>,
    owners: RwLock<HashMap<BreakpointId, SessionId>>,
    events: Arc<EventBus>,
}

impl BreakpointStore {
    #[must_use]
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: SessionSlots::new("session"),
            owners: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn register_session(&self, session_id: SessionId) {
        self.sessions.insert(session_id, IndexMap::new());
    }

    /// Validate and store a new breakpoint with a zero hit count.
    pub fn create(&self, session_id: SessionId, request: BreakpointRequest) -> Result<Breakpoint> {
        request.kind.validate()?;
        let condition = request
            .condition
            .as_deref()
            .map(|text| {
                parse_condition(text).map_err(|err| {
                    DebugError::validation(format!("invalid condition '{text}': {err}"))
                })
            })
            .transpose()?;
        let log = request.log_message.as_deref().map(parse_log_message);
        let slot = self.sessions.get(session_id)?;
        let id = BreakpointId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let breakpoint = Breakpoint {
            id,
            session_id,
            enabled: request.enabled,
            hit_count: 0,
            last_hit: None,
            condition: request.condition,
            log_message: request.log_message,
            kind: request.kind,
        };
        {
            let mut breakpoints = slot.lock().expect("breakpoint slot poisoned");
            breakpoints.insert(
                id,
                StoredBreakpoint {
                    breakpoint: breakpoint.clone(),
                    condition,
                    log,
                },
            );
        }
        self.owners
            .write()
            .expect("breakpoint owners poisoned")
            .insert(id, session_id);
        debug!(session = %session_id, breakpoint = %id, kind = ?breakpoint.kind.breakpoint_type(), "breakpoint created");
        self.events.publish(DebugEvent::BreakpointCreated {
            breakpoint: breakpoint.clone(),
        });
        Ok(breakpoint)
    }

    fn owner(&self, id: BreakpointId) -> Result<SessionId> {
        self.owners
            .read()
            .expect("breakpoint owners poisoned")
            .get(&id)
            .copied()
            .ok_or_else(|| DebugError::not_found("breakpoint", id))
    }

    pub fn remove(&self, id: BreakpointId) -> Result<Breakpoint> {
        let session_id = self.owner(id)?;
        let removed = self
            .sessions
            .with(session_id, |breakpoints| breakpoints.shift_remove(&id))?
            .ok_or_else(|| DebugError::not_found("breakpoint", id))?;
        self.owners
            .write()
            .expect("breakpoint owners poisoned")
            .remove(&id);
        debug!(session = %session_id, breakpoint = %id, "breakpoint removed");
        self.events.publish(DebugEvent::BreakpointRemoved {
            session: session_id,
            breakpoint: id,
        });
        Ok(removed.breakpoint)
    }

    pub fn set_enabled(&self, id: BreakpointId, enabled: bool) -> Result<Breakpoint> {
        let session_id = self.owner(id)?;
        self.sessions
            .with(session_id, |breakpoints| {
                breakpoints.get_mut(&id).map(|stored| {
                    stored.breakpoint.enabled = enabled;
                    stored.breakpoint.clone()
                })
            })?
            .ok_or_else(|| DebugError::not_found("breakpoint", id))
    }

    #[must_use]
    pub fn get(&self, id: BreakpointId) -> Option<Breakpoint> {
        let session_id = self.owner(id).ok()?;
        self.sessions
            .with(session_id, |breakpoints| {
                breakpoints.get(&id).map(|stored| stored.breakpoint.clone())
            })
            .ok()
            .flatten()
    }

    /// Breakpoints of a session in creation order; empty for unknown sessions.
    #[must_use]
    pub fn for_session(&self, session_id: SessionId) -> Vec<Breakpoint> {
        self.sessions
            .with(session_id, |breakpoints| {
                breakpoints
                    .values()
                    .map(|stored| stored.breakpoint.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the session has an enabled breakpoint of the given type.
    #[must_use]
    pub fn has_enabled(&self, session_id: SessionId, kind: BreakpointType) -> bool {
        self.sessions
            .with(session_id, |breakpoints| {
                breakpoints.values().any(|stored| {
                    stored.breakpoint.enabled && stored.breakpoint.kind.breakpoint_type() == kind
                })
            })
            .unwrap_or(false)
    }

    /// Remove every breakpoint owned by the session. Returns how many were removed.
    pub fn clear_session(&self, session_id: SessionId) -> usize {
        let Some(slot) = self.sessions.remove(session_id) else {
            return 0;
        };
        let ids: Vec<BreakpointId> = {
            let mut breakpoints = slot.lock().expect("breakpoint slot poisoned");
            breakpoints.drain(..).map(|(id, _)| id).collect()
        };
        let mut owners = self.owners.write().expect("breakpoint owners poisoned");
        for id in &ids {
            owners.remove(id);
        }
        ids.len()
    }

    /// Total breakpoints across sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.owners.read().expect("breakpoint owners poisoned").len()
    }

    /// Evaluate enabled breakpoints of the context's session.
    ///
    /// Every match whose guard holds counts one hit. Logpoints emit their
    /// message; other matches emit a hit event and the first one is returned
    /// as the pause reason.
    pub fn evaluate(
        &self,
        context: &ExecutionContext,
        lookup: &dyn Fn(&str) -> Option<SqlValue>,
    ) -> Result<MatchOutcome> {
        let slot = self.sessions.get(context.session_id)?;
        let mut outcome = MatchOutcome::default();
        {
            let mut breakpoints = slot.lock().expect("breakpoint slot poisoned");
            for stored in breakpoints.values_mut() {
                if !stored.breakpoint.enabled || !stored.breakpoint.kind.matches(context) {
                    continue;
                }
                if let Some(condition) = &stored.condition {
                    if !condition.evaluate(lookup) {
                        trace!(breakpoint = %stored.breakpoint.id, "guard condition false");
                        continue;
                    }
                }
                stored.breakpoint.hit_count = stored.breakpoint.hit_count.saturating_add(1);
                stored.breakpoint.last_hit = Some(OffsetDateTime::now_utc());
                let hit = stored.breakpoint.clone();
                if let Some(fragments) = &stored.log {
                    outcome
                        .logs
                        .push((hit.id, format_log_message(fragments, lookup)));
                } else if outcome.pause.is_none() {
                    outcome.pause = Some(hit.clone());
                }
                outcome.hits.push(hit);
            }
        }
        for (id, message) in &outcome.logs {
            debug!(session = %context.session_id, breakpoint = %id, %message, "logpoint");
            self.events.publish(DebugEvent::BreakpointLogged {
                session: context.session_id,
                breakpoint: *id,
                message: message.clone(),
            });
        }
        for hit in outcome.hits.iter().filter(|hit| !hit.is_logpoint()) {
            debug!(session = %context.session_id, breakpoint = %hit.id, hits = hit.hit_count, "breakpoint hit");
            self.events.publish(DebugEvent::BreakpointHit {
                breakpoint: hit.clone(),
                context: context.clone(),
            });
        }
        Ok(outcome)
    }

    pub(crate) fn clear(&self) {
        self.sessions.clear();
        self.owners
            .write()
            .expect("breakpoint owners poisoned")
            .clear();
    }
}
