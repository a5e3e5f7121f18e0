//! Bounded, time-evicting correlation table.
//!
//! Maps correlation ids to status records. Bounded by both capacity
//! (least-recently-touched eviction) and age (purged on access). Eviction is
//! an observable outcome: an evicted id reads as [`Lookup::Unknown`],
//! distinct from a fresh record that simply has not been updated yet.
//!
//! All mutation goes through the mutex, so writers serialize; readers always
//! get snapshot clones, never references into the table.
//!
//! When coupled to a [`PendingGate`], evicting a record that never reached a
//! terminal status releases its in-flight slot — no later update can.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::ClientError;
use crate::frame::CorrelationId;
use crate::gate::PendingGate;
use crate::record::{apply_update, Applied, StatusRecord, StatusUpdate};

/// Bounds for the correlation table.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Maximum number of tracked records.
    pub capacity: usize,
    /// Maximum record lifetime from creation.
    pub max_age: Duration,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            max_age: Duration::from_secs(300),
        }
    }
}

/// Result of a table lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Snapshot of the tracked record.
    Found(StatusRecord),
    /// Never tracked, or evicted by capacity/age. Not an error.
    Unknown,
}

impl Lookup {
    pub fn found(self) -> Option<StatusRecord> {
        match self {
            Self::Found(record) => Some(record),
            Self::Unknown => None,
        }
    }
}

struct Slot {
    record: StatusRecord,
    created_at: Instant,
    touched_at: Instant,
    notify: Arc<Notify>,
}

/// Thread-safe correlation id → status record store.
pub struct CorrelationTable {
    config: TableConfig,
    gate: Option<Arc<PendingGate>>,
    slots: Mutex<HashMap<CorrelationId, Slot>>,
}

impl CorrelationTable {
    pub fn new(config: TableConfig) -> Self {
        Self {
            config,
            gate: None,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Couple the table to the in-flight admission gate. Evicting or purging
    /// a record that never reached a terminal status frees its slot here —
    /// once the record is gone, no terminal update can release it anymore.
    pub fn with_gate(config: TableConfig, gate: Arc<PendingGate>) -> Self {
        Self {
            config,
            gate: Some(gate),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Track a new id with a fresh `Initiated` record. Fails if the id is
    /// already present.
    pub fn create(&self, id: CorrelationId) -> Result<(), ClientError> {
        let mut slots = self.slots.lock().unwrap();
        self.purge_expired(&mut slots);
        if slots.contains_key(&id) {
            return Err(ClientError::Duplicate(id));
        }
        if slots.len() >= self.config.capacity {
            self.evict_lru(&mut slots);
        }
        let now = Instant::now();
        slots.insert(
            id,
            Slot {
                record: StatusRecord::new(id),
                created_at: now,
                touched_at: now,
                notify: Arc::new(Notify::new()),
            },
        );
        Ok(())
    }

    /// Snapshot lookup.
    pub fn get(&self, id: CorrelationId) -> Lookup {
        let mut slots = self.slots.lock().unwrap();
        self.purge_expired(&mut slots);
        match slots.get_mut(&id) {
            Some(slot) => {
                slot.touched_at = Instant::now();
                Lookup::Found(slot.record.clone())
            }
            None => Lookup::Unknown,
        }
    }

    /// Atomically snapshot a record together with its wakeup handle, for
    /// blocking/async waiters.
    pub fn watch(&self, id: CorrelationId) -> Option<(StatusRecord, Arc<Notify>)> {
        let mut slots = self.slots.lock().unwrap();
        self.purge_expired(&mut slots);
        slots.get_mut(&id).map(|slot| {
            slot.touched_at = Instant::now();
            (slot.record.clone(), Arc::clone(&slot.notify))
        })
    }

    /// Apply one status update under the single-writer lock, waking any
    /// waiters. Returns `None` when the id is not tracked (late response
    /// after eviction — callers log and move on).
    pub fn update(&self, id: CorrelationId, update: &StatusUpdate) -> Option<Applied> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(&id)?;
        let applied = apply_update(&mut slot.record, update);
        slot.touched_at = Instant::now();
        slot.notify.notify_waiters();
        Some(applied)
    }

    /// Untrack an id (enqueue rollback). Waiters are woken and will observe
    /// `Unknown`. Slot accounting stays with the caller on this path — the
    /// rollback sequence releases the gate itself.
    pub fn remove(&self, id: CorrelationId) {
        if let Some(slot) = self.slots.lock().unwrap().remove(&id) {
            slot.notify.notify_waiters();
        }
    }

    /// Drop everything, waking all waiters (teardown path).
    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.values() {
            slot.notify.notify_waiters();
        }
        slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&self, slots: &mut HashMap<CorrelationId, Slot>) {
        let expired: Vec<CorrelationId> = slots
            .iter()
            .filter(|(_, slot)| slot.created_at.elapsed() >= self.config.max_age)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(slot) = slots.remove(&id) {
                tracing::debug!(id = %id, "correlation record expired");
                self.drop_slot(slot);
            }
        }
    }

    fn evict_lru(&self, slots: &mut HashMap<CorrelationId, Slot>) {
        let oldest = slots
            .iter()
            .min_by_key(|(_, slot)| slot.touched_at)
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            if let Some(slot) = slots.remove(&id) {
                tracing::debug!(id = %id, "correlation record evicted (capacity)");
                self.drop_slot(slot);
            }
        }
    }

    /// A record evicted before its first terminal transition still holds an
    /// in-flight slot; nothing else can release it now, so the table does.
    fn drop_slot(&self, slot: Slot) {
        if !slot.record.ever_terminal {
            if let Some(gate) = &self.gate {
                gate.release();
            }
        }
        slot.notify.notify_waiters();
    }
}
