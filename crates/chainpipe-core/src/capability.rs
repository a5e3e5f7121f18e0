//! Capabilities granted by the connect-time handshake.
//!
//! The node pushes a grant frame during the handshake naming the categories
//! of operations this connection may use. The set is read-only after the
//! handshake and resets on reconnect.

use std::collections::HashMap;

use serde::Serialize;

/// Capability gating tracked submissions.
pub const TX_SUBMIT: &str = "tx.submit";
/// Capability gating untracked queries.
pub const STATE_QUERY: &str = "state.query";
/// Capability gating event subscriptions.
pub const EVENTS_SUBSCRIBE: &str = "events.subscribe";
/// Administrative operations; consumed by the domain layer above this core.
pub const ADMIN_CONTROL: &str = "admin.control";

/// Every capability name this build recognizes.
pub const RECOGNIZED: [&str; 4] = [TX_SUBMIT, STATE_QUERY, EVENTS_SUBSCRIBE, ADMIN_CONTROL];

/// Capability-name → granted mapping.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilitySet {
    granted: HashMap<String, bool>,
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilitySet {
    /// All recognized capabilities, none granted.
    pub fn new() -> Self {
        Self {
            granted: RECOGNIZED
                .iter()
                .map(|name| (name.to_string(), false))
                .collect(),
        }
    }

    /// Mark a capability granted. Returns `false` for unrecognized names,
    /// which are ignored.
    pub fn grant(&mut self, name: &str) -> bool {
        match self.granted.get_mut(name) {
            Some(flag) => {
                *flag = true;
                true
            }
            None => false,
        }
    }

    pub fn is_granted(&self, name: &str) -> bool {
        self.granted.get(name).copied().unwrap_or(false)
    }

    /// Returns `true` once any capability has been granted — the signal that
    /// the handshake's grant push has arrived.
    pub fn any_granted(&self) -> bool {
        self.granted.values().any(|g| *g)
    }

    /// Sorted list of granted names.
    pub fn granted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .granted
            .iter()
            .filter(|(_, g)| **g)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Revoke everything (reconnect path).
    pub fn reset(&mut self) {
        for flag in self.granted.values_mut() {
            *flag = false;
        }
    }
}
