//! State shared by the runtime loops and the caller-facing API.
//!
//! One `RuntimeShared` exists per connection; nothing here is process-wide,
//! so multiple clients coexist safely in one process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{watch, Notify};

use chainpipe_core::{
    CapabilitySet, CorrelationTable, EventRegistry, PendingGate, RuntimeConfig, TableConfig,
};

pub(crate) struct RuntimeShared {
    pub config: RuntimeConfig,
    pub table: CorrelationTable,
    pub registry: EventRegistry,
    pub capabilities: RwLock<CapabilitySet>,
    pub gate: Arc<PendingGate>,
    /// Woken whenever a capability grant lands.
    pub grant_notify: Notify,
    connected: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl RuntimeShared {
    pub fn new(config: RuntimeConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let gate = Arc::new(PendingGate::new(config.max_pending));
        Self {
            // Gate-coupled: evicting a record that never went terminal frees
            // its in-flight slot.
            table: CorrelationTable::with_gate(
                TableConfig {
                    capacity: config.table_capacity,
                    max_age: config.table_max_age,
                },
                Arc::clone(&gate),
            ),
            registry: EventRegistry::new(),
            capabilities: RwLock::new(CapabilitySet::new()),
            gate,
            grant_notify: Notify::new(),
            connected: AtomicBool::new(true),
            shutdown_tx,
            config,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Orderly stop (caller-requested destroy). Loops exit; state is cleaned
    /// up by the supervisor afterwards.
    pub fn shutdown(&self) {
        self.connected.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);
    }

    /// Failure stop (transport death or exhausted heartbeat tolerance).
    /// Flips state, stops every loop and wakes every waiter so outstanding
    /// blocking calls and futures resolve with a transport error instead of
    /// hanging. Idempotent.
    pub fn fail(&self, reason: &str) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::error!(reason, "runtime failed; reconnect required");
        let _ = self.shutdown_tx.send(true);
        self.table.clear();
        self.gate.reset();
        self.grant_notify.notify_waiters();
    }
}
