//! Transaction and lock state.

#![allow(missing_docs)]

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionStatus {
    Active,
    Preparing,
    Prepared,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TransactionStatus {
    /// Committed and aborted transactions no longer hold or wait for locks.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
}

impl IsolationLevel {
    /// Parse SQL spelling (`READ COMMITTED`, `repeatable read`, ...).
    #[must_use]
    pub fn from_sql(text: &str) -> Option<Self> {
        let words: Vec<String> = text
            .split_whitespace()
            .map(str::to_ascii_uppercase)
            .collect();
        match words.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            ["READ", "UNCOMMITTED", ..] => Some(Self::ReadUncommitted),
            ["READ", "COMMITTED", ..] => Some(Self::ReadCommitted),
            ["REPEATABLE", "READ", ..] => Some(Self::RepeatableRead),
            ["SNAPSHOT", ..] => Some(Self::Snapshot),
            ["SERIALIZABLE", ..] => Some(Self::Serializable),
            _ => None,
        }
    }
}

/// Transaction lifecycle events observable by breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionEvent {
    Begin,
    Commit,
    Rollback,
    Savepoint,
    Prepare,
}

/// Lock lifecycle events observable by breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockEvent {
    Acquire,
    Wait,
    Release,
    Deadlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockGranularity {
    Row,
    Page,
    Table,
    Database,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockMode {
    Shared,
    Exclusive,
    Update,
    IntentShared,
    IntentExclusive,
}

/// A lock held or awaited by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub id: SmolStr,
    /// Locked object (table name, `table:row`, ...).
    pub resource: SmolStr,
    pub granularity: LockGranularity,
    pub mode: LockMode,
    /// Transactions this lock request is waiting on.
    #[serde(default)]
    pub blocked_by: Vec<SmolStr>,
    /// Transactions waiting on this lock.
    #[serde(default)]
    pub blocking: Vec<SmolStr>,
}

impl LockInfo {
    #[must_use]
    pub fn new(
        id: impl Into<SmolStr>,
        resource: impl Into<SmolStr>,
        granularity: LockGranularity,
        mode: LockMode,
    ) -> Self {
        Self {
            id: id.into(),
            resource: resource.into(),
            granularity,
            mode,
            blocked_by: Vec::new(),
            blocking: Vec::new(),
        }
    }

    #[must_use]
    pub fn blocked_by(mut self, transaction: impl Into<SmolStr>) -> Self {
        self.blocked_by.push(transaction.into());
        self
    }

    #[must_use]
    pub fn blocking(mut self, transaction: impl Into<SmolStr>) -> Self {
        self.blocking.push(transaction.into());
        self
    }
}

/// Live state of one database transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionState {
    pub id: SmolStr,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub isolation_level: IsolationLevel,
    pub status: TransactionStatus,
    #[serde(default)]
    pub locks_held: Vec<LockInfo>,
    #[serde(default)]
    pub locks_waiting: Vec<LockInfo>,
    /// Modified row ids per table.
    #[serde(default)]
    pub modified: IndexMap<SmolStr, Vec<SmolStr>>,
}

impl TransactionState {
    /// An active transaction started now with no locks.
    #[must_use]
    pub fn new(id: impl Into<SmolStr>, isolation_level: IsolationLevel) -> Self {
        Self {
            id: id.into(),
            started_at: OffsetDateTime::now_utc(),
            isolation_level,
            status: TransactionStatus::Active,
            locks_held: Vec::new(),
            locks_waiting: Vec::new(),
            modified: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn holding(mut self, lock: LockInfo) -> Self {
        self.locks_held.push(lock);
        self
    }

    #[must_use]
    pub fn waiting_for(mut self, lock: LockInfo) -> Self {
        self.locks_waiting.push(lock);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    /// Record modified row ids for a table.
    pub fn record_modified(&mut self, table: impl Into<SmolStr>, rows: impl IntoIterator<Item = SmolStr>) {
        let entry = self.modified.entry(table.into()).or_default();
        for row in rows {
            if !entry.contains(&row) {
                entry.push(row);
            }
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.status.is_finished()
    }

    #[must_use]
    pub fn blocking_tree(&self) -> BlockingTree {
        let mut blocked_by = BTreeSet::new();
        let mut blocking = BTreeSet::new();
        for lock in self.locks_held.iter().chain(&self.locks_waiting) {
            blocked_by.extend(lock.blocked_by.iter().filter(|id| **id != self.id).cloned());
            blocking.extend(lock.blocking.iter().filter(|id| **id != self.id).cloned());
        }
        BlockingTree {
            transaction: self.id.clone(),
            blocked_by: blocked_by.into_iter().collect(),
            blocking: blocking.into_iter().collect(),
        }
    }
}

/// Held/waiting partition of a transaction's locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLocks {
    pub held: Vec<LockInfo>,
    pub waiting: Vec<LockInfo>,
}

/// Transactions blocking, and blocked by, one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingTree {
    pub transaction: SmolStr,
    pub blocked_by: Vec<SmolStr>,
    pub blocking: Vec<SmolStr>,
}

/// A lock event derived from two successive transaction states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LockChange {
    pub event: LockEvent,
    pub lock: LockInfo,
}

pub(crate) fn diff_locks(previous: Option<&TransactionState>, next: &TransactionState) -> Vec<LockChange> {
    let known = |locks: Option<&Vec<LockInfo>>, id: &SmolStr| {
        locks.is_some_and(|locks| locks.iter().any(|lock| lock.id == *id))
    };
    let prev_held = previous.map(|state| &state.locks_held);
    let prev_waiting = previous.map(|state| &state.locks_waiting);
    let mut changes = Vec::new();
    for lock in &next.locks_waiting {
        if !known(prev_waiting, &lock.id) {
            changes.push(LockChange {
                event: LockEvent::Wait,
                lock: lock.clone(),
            });
        }
    }
    for lock in &next.locks_held {
        if !known(prev_held, &lock.id) {
            changes.push(LockChange {
                event: LockEvent::Acquire,
                lock: lock.clone(),
            });
        }
    }
    if let Some(previous) = previous {
        for lock in &previous.locks_held {
            if !next.locks_held.iter().any(|current| current.id == lock.id) {
                changes.push(LockChange {
                    event: LockEvent::Release,
                    lock: lock.clone(),
                });
            }
        }
    }
    changes
}

/// Lifecycle event implied by a status change, if any.
pub(crate) fn status_event(
    previous: Option<TransactionStatus>,
    next: TransactionStatus,
) -> Option<TransactionEvent> {
    if previous == Some(next) {
        return None;
    }
    match next {
        TransactionStatus::Active if previous.is_none() => Some(TransactionEvent::Begin),
        TransactionStatus::Prepared => Some(TransactionEvent::Prepare),
        TransactionStatus::Committed => Some(TransactionEvent::Commit),
        TransactionStatus::Aborted => Some(TransactionEvent::Rollback),
        _ => None,
    }
}
