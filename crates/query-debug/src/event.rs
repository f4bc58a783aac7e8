//! Typed debugger events and an observer list to deliver them.

use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use smol_str::SmolStr;

use crate::breakpoints::{Breakpoint, BreakpointId, ExecutionContext};
use crate::control::{ExecutionPoint, PlanNode, StepKind};
use crate::error::RunnerError;
use crate::inspector::{DeadlockReport, TransactionStatus};
use crate::session::{SessionId, SessionStatus};
use crate::time_travel::RowChange;

/// Why a session paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum PauseReason {
    /// A breakpoint matched.
    Breakpoint {
        /// Breakpoint that caused the pause.
        id: BreakpointId,
    },
    /// A step completed.
    Step,
    /// Explicit pause request.
    Pause,
    /// Work was queued on an already paused session.
    Entry,
    /// The runner failed and an exception breakpoint matched.
    Exception {
        /// Breakpoint that caught the failure.
        id: BreakpointId,
    },
}

/// Event categories for filtered subscriptions.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Session,
    Breakpoint,
    Query,
    Control,
    TimeTravel,
    Transaction,
}

/// Notification published on every observable state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
#[allow(missing_docs)]
pub enum DebugEvent {
    SessionCreated {
        session: SessionId,
        user_id: SmolStr,
    },
    SessionStateChanged {
        session: SessionId,
        from: SessionStatus,
        to: SessionStatus,
    },
    SessionDeleted {
        session: SessionId,
    },
    BreakpointCreated {
        breakpoint: Breakpoint,
    },
    BreakpointHit {
        breakpoint: Breakpoint,
        context: ExecutionContext,
    },
    BreakpointLogged {
        session: SessionId,
        breakpoint: BreakpointId,
        message: String,
    },
    BreakpointRemoved {
        session: SessionId,
        breakpoint: BreakpointId,
    },
    QueryStarted {
        session: SessionId,
        point: ExecutionPoint,
        sql: String,
    },
    QueryCompleted {
        session: SessionId,
        query_id: u32,
        row_count: u64,
        elapsed: Duration,
    },
    QueryFailed {
        session: SessionId,
        query_id: u32,
        error: RunnerError,
    },
    /// Plan of a statement about to run; `detailed` level and above.
    PlanCaptured {
        session: SessionId,
        query_id: u32,
        plan: Vec<PlanNode>,
    },
    /// Rows a statement changed; `detailed` level and above.
    DataChanged {
        session: SessionId,
        query_id: u32,
        change: RowChange,
    },
    /// Breakpoints matched at a statement boundary; `verbose` level only.
    BoundaryEvaluated {
        session: SessionId,
        query_id: u32,
        matched: Vec<BreakpointId>,
        paused_by: Option<BreakpointId>,
    },
    Paused {
        session: SessionId,
        reason: PauseReason,
        point: Option<ExecutionPoint>,
    },
    Resumed {
        session: SessionId,
    },
    Stepped {
        session: SessionId,
        kind: StepKind,
    },
    Rewound {
        session: SessionId,
        operation: u64,
        sql: String,
    },
    TransactionUpdated {
        transaction: SmolStr,
        status: TransactionStatus,
    },
    DeadlockDetected {
        report: DeadlockReport,
    },
}

impl DebugEvent {
    /// Category used by filtered subscriptions.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            DebugEvent::SessionCreated { .. }
            | DebugEvent::SessionStateChanged { .. }
            | DebugEvent::SessionDeleted { .. } => EventKind::Session,
            DebugEvent::BreakpointCreated { .. }
            | DebugEvent::BreakpointHit { .. }
            | DebugEvent::BreakpointLogged { .. }
            | DebugEvent::BreakpointRemoved { .. } => EventKind::Breakpoint,
            DebugEvent::QueryStarted { .. }
            | DebugEvent::QueryCompleted { .. }
            | DebugEvent::QueryFailed { .. }
            | DebugEvent::PlanCaptured { .. }
            | DebugEvent::DataChanged { .. } => EventKind::Query,
            DebugEvent::BoundaryEvaluated { .. }
            | DebugEvent::Paused { .. }
            | DebugEvent::Resumed { .. }
            | DebugEvent::Stepped { .. } => EventKind::Control,
            DebugEvent::Rewound { .. } => EventKind::TimeTravel,
            DebugEvent::TransactionUpdated { .. } | DebugEvent::DeadlockDetected { .. } => {
                EventKind::Transaction
            }
        }
    }

    /// Session the event belongs to, if any.
    #[must_use]
    pub fn session(&self) -> Option<SessionId> {
        match self {
            DebugEvent::SessionCreated { session, .. }
            | DebugEvent::SessionStateChanged { session, .. }
            | DebugEvent::SessionDeleted { session }
            | DebugEvent::BreakpointLogged { session, .. }
            | DebugEvent::BreakpointRemoved { session, .. }
            | DebugEvent::QueryStarted { session, .. }
            | DebugEvent::QueryCompleted { session, .. }
            | DebugEvent::QueryFailed { session, .. }
            | DebugEvent::PlanCaptured { session, .. }
            | DebugEvent::DataChanged { session, .. }
            | DebugEvent::BoundaryEvaluated { session, .. }
            | DebugEvent::Paused { session, .. }
            | DebugEvent::Resumed { session }
            | DebugEvent::Stepped { session, .. }
            | DebugEvent::Rewound { session, .. } => Some(*session),
            DebugEvent::BreakpointCreated { breakpoint }
            | DebugEvent::BreakpointHit { breakpoint, .. } => Some(breakpoint.session_id),
            DebugEvent::TransactionUpdated { .. } | DebugEvent::DeadlockDetected { .. } => None,
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    kinds: Option<Vec<EventKind>>,
    tx: Sender<DebugEvent>,
}

#[derive(Debug)]
struct BusState {
    subscribers: Vec<Subscriber>,
    buffered: VecDeque<DebugEvent>,
    capacity: usize,
}

/// Observer list delivering events over channels, buffering while nobody listens.
#[derive(Debug)]
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    /// Create a bus that buffers at most `capacity` undelivered events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BusState {
                subscribers: Vec::new(),
                buffered: VecDeque::new(),
                capacity,
            }),
        }
    }

    /// Receive every event.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<DebugEvent> {
        self.add_subscriber(None)
    }

    /// Receive only events of the given categories.
    #[must_use]
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Receiver<DebugEvent> {
        self.add_subscriber(Some(kinds.to_vec()))
    }

    fn add_subscriber(&self, kinds: Option<Vec<EventKind>>) -> Receiver<DebugEvent> {
        let (tx, rx) = channel();
        let mut state = self.state.lock().expect("event bus poisoned");
        state.subscribers.push(Subscriber { kinds, tx });
        rx
    }

    /// Deliver an event to live subscribers; dropped receivers are pruned.
    pub fn publish(&self, event: DebugEvent) {
        let mut state = self.state.lock().expect("event bus poisoned");
        let kind = event.kind();
        state.subscribers.retain(|subscriber| {
            let wanted = subscriber
                .kinds
                .as_ref()
                .is_none_or(|kinds| kinds.contains(&kind));
            !wanted || subscriber.tx.send(event.clone()).is_ok()
        });
        if state.subscribers.is_empty() && state.capacity > 0 {
            if state.buffered.len() == state.capacity {
                state.buffered.pop_front();
            }
            state.buffered.push_back(event);
        }
    }

    /// Take buffered events published while nobody was subscribed.
    #[must_use]
    pub fn drain(&self) -> Vec<DebugEvent> {
        let mut state = self.state.lock().expect("event bus poisoned");
        state.buffered.drain(..).collect()
    }

    pub(crate) fn clear(&self) {
        let mut state = self.state.lock().expect("event bus poisoned");
        state.subscribers.clear();
        state.buffered.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resumed(id: u64) -> DebugEvent {
        DebugEvent::Resumed {
            session: SessionId(id),
        }
    }

    #[test]
    fn buffers_without_subscribers_and_drops_oldest() {
        let bus = EventBus::new(2);
        bus.publish(resumed(1));
        bus.publish(resumed(2));
        bus.publish(resumed(3));
        assert_eq!(bus.drain(), vec![resumed(2), resumed(3)]);
        assert!(bus.drain().is_empty());
    }

    #[test]
    fn filtered_subscriber_only_sees_its_kinds() {
        let bus = EventBus::new(8);
        let control = bus.subscribe_to(&[EventKind::Control]);
        bus.publish(DebugEvent::SessionDeleted {
            session: SessionId(1),
        });
        bus.publish(resumed(1));
        assert_eq!(control.try_recv().unwrap(), resumed(1));
        assert!(control.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = EventBus::new(8);
        drop(bus.subscribe());
        bus.publish(resumed(1));
        assert_eq!(bus.drain(), vec![resumed(1)]);
    }
}
