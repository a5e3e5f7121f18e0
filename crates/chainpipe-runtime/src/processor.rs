//! The shared response processor.
//!
//! Every inbound frame that mutates client state funnels through here,
//! whichever loop received it first: the dispatch proxy's inline branch,
//! a worker's round-trip reply, or the callback listener. Frame-level
//! validation (header length, protocol version) already happened at decode;
//! this stage interprets the discriminator.

use std::sync::Arc;

use chainpipe_core::frame::{self, push};
use chainpipe_core::{ChainEvent, Frame, StatusUpdate};

use crate::shared::RuntimeShared;

#[derive(Clone)]
pub(crate) struct ResponseProcessor {
    shared: Arc<RuntimeShared>,
}

impl ResponseProcessor {
    pub fn new(shared: Arc<RuntimeShared>) -> Self {
        Self { shared }
    }

    pub fn process(&self, frame: &Frame) {
        match frame.code {
            push::EVENT_CALLBACK => self.on_events(&frame.payload),
            push::CAPABILITY_GRANT => self.on_grant(&frame.payload),
            code if frame::is_status_code(code) => self.on_status(frame),
            code => {
                tracing::warn!(code = format_args!("{code:#04x}"), "dropping frame with unexpected discriminator");
            }
        }
    }

    /// Zero or more event records per callback frame. Events whose topic has
    /// no registered queue are dropped silently.
    fn on_events(&self, payload: &[u8]) {
        let events: Vec<ChainEvent> = match serde_json::from_slice(payload) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "malformed event callback payload");
                return;
            }
        };
        for event in events {
            let topic = event.topic.clone();
            if !self.shared.registry.publish(event) {
                tracing::trace!(topic = %topic, "event dropped, no subscriber");
            }
        }
    }

    fn on_grant(&self, payload: &[u8]) {
        let names: Vec<String> = match serde_json::from_slice(payload) {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "malformed capability grant payload");
                return;
            }
        };
        {
            let mut caps = self.shared.capabilities.write().unwrap();
            for name in &names {
                if caps.grant(name) {
                    tracing::debug!(capability = %name, "capability granted");
                } else {
                    tracing::warn!(capability = %name, "ignoring unrecognized capability");
                }
            }
        }
        self.shared.grant_notify.notify_waiters();
    }

    fn on_status(&self, frame: &Frame) {
        let Some(id) = frame.correlation_id else {
            tracing::warn!("status frame without correlation id");
            return;
        };
        let Some(update) = StatusUpdate::from_frame(frame) else {
            tracing::warn!(id = %id, code = frame.code, "unparseable status frame");
            return;
        };
        match self.shared.table.update(id, &update) {
            Some(applied) => {
                if applied.became_terminal {
                    self.shared.gate.release();
                }
                tracing::debug!(
                    id = %id,
                    status = %update.status,
                    advanced = applied.advanced,
                    "status update applied"
                );
            }
            // Responses may legitimately arrive after table eviction.
            None => tracing::debug!(id = %id, "status update for untracked id"),
        }
    }
}
