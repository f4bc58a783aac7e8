//! Per-session slots: an outer map keyed by session id, each entry behind its
//! own mutex so unrelated sessions never contend on one lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{DebugError, Result};
use crate::session::SessionId;

#[derive(Debug)]
pub(crate) struct SessionSlots<T> {
    kind: &'static str,
    slots: RwLock<HashMap<SessionId, Arc<Mutex<T>>>>,
}

impl<T> SessionSlots<T> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Register a slot; an existing slot for the id is kept.
    pub(crate) fn insert(&self, id: SessionId, value: T) {
        let mut slots = self.slots.write().expect("session slots poisoned");
        slots
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(value)));
    }

    pub(crate) fn get(&self, id: SessionId) -> Result<Arc<Mutex<T>>> {
        let slots = self.slots.read().expect("session slots poisoned");
        slots
            .get(&id)
            .cloned()
            .ok_or_else(|| DebugError::not_found(self.kind, id))
    }

    pub(crate) fn remove(&self, id: SessionId) -> Option<Arc<Mutex<T>>> {
        let mut slots = self.slots.write().expect("session slots poisoned");
        slots.remove(&id)
    }

    pub(crate) fn contains(&self, id: SessionId) -> bool {
        let slots = self.slots.read().expect("session slots poisoned");
        slots.contains_key(&id)
    }

    /// Run `f` with the slot locked.
    pub(crate) fn with<R>(&self, id: SessionId, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let slot = self.get(id)?;
        let mut guard = slot.lock().expect("session slot poisoned");
        Ok(f(&mut guard))
    }

    /// Visit every slot, in no particular order, keeping what `f` returns.
    ///
    /// Handles are snapshotted first so each slot is locked only while `f`
    /// looks at it and the outer map is never held across `f`.
    pub(crate) fn filter_map<R>(&self, mut f: impl FnMut(&T) -> Option<R>) -> Vec<R> {
        let handles: Vec<Arc<Mutex<T>>> = {
            let slots = self.slots.read().expect("session slots poisoned");
            slots.values().map(Arc::clone).collect()
        };
        handles
            .iter()
            .filter_map(|slot| f(&slot.lock().expect("session slot poisoned")))
            .collect()
    }

    pub(crate) fn clear(&self) {
        let mut slots = self.slots.write().expect("session slots poisoned");
        slots.clear();
    }
}
