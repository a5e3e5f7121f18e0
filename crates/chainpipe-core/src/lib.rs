//! chainpipe-core — foundation types for the ChainPipe dispatch runtime.
//!
//! # Overview
//!
//! ChainPipe is a client runtime for a blockchain node protocol: many
//! concurrent, independently tracked requests and unsolicited push events
//! multiplexed over one persistent connection. The core crate defines:
//!
//! - [`Frame`] / [`CorrelationId`] — the binary wire framing
//! - [`StatusCode`] / [`StatusRecord`] — the request status domain and the
//!   monotonic update rule
//! - [`CorrelationTable`] — bounded, age-evicting status store
//! - [`EventRegistry`] — per-topic push event queues
//! - [`CapabilitySet`] — permissions granted at connect time
//! - [`PendingGate`] — the hard cap on in-flight requests
//! - [`FrameTransport`] — the async trait every physical transport implements
//! - [`ClientError`] — structured error taxonomy

pub mod capability;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod gate;
pub mod record;
pub mod status;
pub mod table;
pub mod transport;

pub use capability::CapabilitySet;
pub use config::RuntimeConfig;
pub use error::{ClientError, FrameError};
pub use events::{ChainEvent, EventRegistry};
pub use frame::{CorrelationId, Frame};
pub use gate::PendingGate;
pub use record::{apply_update, Applied, StatusRecord, StatusUpdate};
pub use status::StatusCode;
pub use table::{CorrelationTable, Lookup, TableConfig};
pub use transport::FrameTransport;
