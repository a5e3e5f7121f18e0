//! The ordered request status domain.
//!
//! Progress codes rank strictly upward; failure codes sit outside the
//! ordering and always win. Terminal statuses are `Included`, `Dropped` and
//! every failure code — no further progress is expected from any of them,
//! though a late payload-bearing update may still attach data (see
//! [`crate::record::apply_update`]).

use serde::{Deserialize, Serialize};

/// Status of one tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// Record created, request not yet acknowledged by the node.
    Initiated,
    /// Node acknowledged receipt.
    Received,
    /// Dropped from the node's pool. Terminal, but a later pending update
    /// may legitimately re-open progress (the transaction re-entered).
    Dropped,
    /// Waiting for block inclusion; the value is the sub-phase.
    PendingInclusion(u8),
    /// Included in a block. Terminal.
    Included,
    /// Node-reported failure; the value is the raw wire code (high bit set).
    /// Always terminal.
    Failed(u8),
}

impl StatusCode {
    /// Decode from the wire `code`/`subcode` pair. Returns `None` for codes
    /// outside the status class.
    pub fn from_wire(code: u8, subcode: u8) -> Option<Self> {
        if code & 0x80 != 0 {
            return Some(Self::Failed(code));
        }
        match code {
            0x00 => Some(Self::Initiated),
            0x01 => Some(Self::Received),
            0x02 => Some(Self::Dropped),
            0x03 => Some(Self::PendingInclusion(subcode >> 1)),
            0x04 => Some(Self::Included),
            _ => None,
        }
    }

    /// The wire `code` byte for this status.
    pub fn wire_code(&self) -> u8 {
        match self {
            Self::Initiated => 0x00,
            Self::Received => 0x01,
            Self::Dropped => 0x02,
            Self::PendingInclusion(_) => 0x03,
            Self::Included => 0x04,
            Self::Failed(code) => *code,
        }
    }

    /// Returns `true` for statuses from which no further progress is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Included | Self::Dropped | Self::Failed(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Position in the domain ordering. Pending sub-phases rank within the
    /// pending band; failures rank above everything so that only another
    /// failure replaces them.
    fn rank(&self) -> (u8, u8) {
        match self {
            Self::Initiated => (0, 0),
            Self::Received => (1, 0),
            Self::Dropped => (2, 0),
            Self::PendingInclusion(phase) => (3, *phase),
            Self::Included => (4, 0),
            Self::Failed(code) => (5, *code),
        }
    }

    /// The monotonic advance test: a candidate replaces `current` when it
    /// ranks strictly higher, or when it is a failure code (always wins).
    pub fn supersedes(&self, current: StatusCode) -> bool {
        self.is_failure() || self.rank() > current.rank()
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiated => write!(f, "initiated"),
            Self::Received => write!(f, "received"),
            Self::Dropped => write!(f, "dropped"),
            Self::PendingInclusion(phase) => write!(f, "pending-inclusion/{phase}"),
            Self::Included => write!(f, "included"),
            Self::Failed(code) => write!(f, "failed({code:#04x})"),
        }
    }
}
