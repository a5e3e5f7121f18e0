//! Binary wire framing.
//!
//! Every message, in either direction, is one frame:
//!
//! ```text
//! [version: 1][code: 1][subcode: 1][correlation id: 8, tagged codes only][payload...]
//! ```
//!
//! The `code` byte is the discriminator the dispatch proxy classifies on.
//! Status codes occupy `0x00..=0x04`; any byte with the high bit set is a
//! terminal failure code; `0x20..=0x23` are client-originated operations and
//! `0x40..=0x43` are node-originated pushes and replies.
//!
//! For status updates the `subcode` byte packs two things: bit `0` marks a
//! payload-bearing update (the payload is a terminal result: 32-byte result
//! id followed by result bytes), and the remaining bits carry the
//! pending-inclusion sub-phase.

use crate::error::FrameError;

/// Protocol version this build speaks. Frames carrying any other version are
/// rejected at decode.
pub const PROTOCOL_VERSION: u8 = 2;

/// Minimal frame length: version + code + subcode.
pub const HEADER_LEN: usize = 3;

/// Header length for tagged frames (correlation id present).
pub const TAGGED_HEADER_LEN: usize = HEADER_LEN + CorrelationId::LEN;

/// Length of the result id prefix inside a payload-bearing status update.
pub const RESULT_ID_LEN: usize = 32;

/// Subcode bit marking a status update as payload-bearing.
pub const SUBCODE_RESULT: u8 = 0x01;

/// Client-originated operation codes.
pub mod op {
    /// Tracked request; tagged with a correlation id.
    pub const REQUEST: u8 = 0x20;
    /// Untracked single round-trip query.
    pub const QUERY: u8 = 0x21;
    /// Liveness probe.
    pub const HEARTBEAT_PROBE: u8 = 0x22;
    /// Connect-time hello carrying optional credentials.
    pub const HELLO: u8 = 0x23;
}

/// Node-originated discriminators.
pub mod push {
    /// Reply to a liveness probe.
    pub const HEARTBEAT_REPLY: u8 = 0x40;
    /// Zero or more queued events, JSON-encoded in the payload.
    pub const EVENT_CALLBACK: u8 = 0x41;
    /// Capability names granted by the handshake, JSON-encoded.
    pub const CAPABILITY_GRANT: u8 = 0x42;
    /// Reply to an untracked query.
    pub const QUERY_REPLY: u8 = 0x43;
}

/// Returns `true` if `code` is in the status class (progress or failure).
pub fn is_status_code(code: u8) -> bool {
    code <= 0x04 || code & 0x80 != 0
}

/// Returns `true` if frames with this code carry a correlation id.
pub fn is_tagged(code: u8) -> bool {
    is_status_code(code) || code == op::REQUEST
}

fn is_known(code: u8) -> bool {
    is_status_code(code) || matches!(code, 0x20..=0x23 | 0x40..=0x43)
}

/// Fixed-length opaque identifier binding a request to its responses.
///
/// Generated by the caller before enqueue and unique for the request's
/// entire lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId([u8; 8]);

impl CorrelationId {
    pub const LEN: usize = 8;

    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Generate a fresh id from a process-wide counter mixed with a time
    /// seed, so ids stay unique across reconnects within one process.
    pub fn generate() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::time::{SystemTime, UNIX_EPOCH};

        static NEXT: AtomicU64 = AtomicU64::new(0);
        let seq = NEXT.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let mixed = nanos.rotate_left(16) ^ seq.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Self(mixed.to_be_bytes())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CorrelationId({self})")
    }
}

/// One decoded wire frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub version: u8,
    pub code: u8,
    pub subcode: u8,
    pub correlation_id: Option<CorrelationId>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build an untagged frame at the current protocol version.
    pub fn new(code: u8, subcode: u8, payload: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            code,
            subcode,
            correlation_id: None,
            payload,
        }
    }

    /// Build a tagged frame at the current protocol version.
    pub fn tagged(code: u8, subcode: u8, id: CorrelationId, payload: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            code,
            subcode,
            correlation_id: Some(id),
            payload,
        }
    }

    /// Returns `true` if this status update carries a terminal result payload.
    pub fn has_result(&self) -> bool {
        self.subcode & SUBCODE_RESULT != 0
    }

    /// Pending-inclusion sub-phase carried in the subcode's upper bits.
    pub fn sub_phase(&self) -> u8 {
        self.subcode >> 1
    }

    pub fn encode(&self) -> Vec<u8> {
        let cid_len = if self.correlation_id.is_some() {
            CorrelationId::LEN
        } else {
            0
        };
        let mut out = Vec::with_capacity(HEADER_LEN + cid_len + self.payload.len());
        out.push(self.version);
        out.push(self.code);
        out.push(self.subcode);
        if let Some(id) = &self.correlation_id {
            out.extend_from_slice(id.as_bytes());
        }
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode one frame, enforcing the minimal header, the protocol version
    /// and a recognized code.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::Truncated { len: bytes.len() });
        }
        let version = bytes[0];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::VersionMismatch { got: version });
        }
        let code = bytes[1];
        if !is_known(code) {
            return Err(FrameError::UnknownCode { code });
        }
        let subcode = bytes[2];

        let (correlation_id, body_start) = if is_tagged(code) {
            if bytes.len() < TAGGED_HEADER_LEN {
                return Err(FrameError::Truncated { len: bytes.len() });
            }
            let mut cid = [0u8; CorrelationId::LEN];
            cid.copy_from_slice(&bytes[HEADER_LEN..TAGGED_HEADER_LEN]);
            (Some(CorrelationId::from_bytes(cid)), TAGGED_HEADER_LEN)
        } else {
            (None, HEADER_LEN)
        };

        Ok(Self {
            version,
            code,
            subcode,
            correlation_id,
            payload: bytes[body_start..].to_vec(),
        })
    }
}
