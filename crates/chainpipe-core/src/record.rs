//! Per-request status record and the status/payload update rule.

use serde::Serialize;

use crate::frame::{self, CorrelationId, Frame, RESULT_ID_LEN};
use crate::status::StatusCode;

/// Immutable snapshot of one tracked request's state.
///
/// Callers always receive a copy of this record, never a live reference;
/// mutation happens only inside the single-writer response processor path
/// through [`apply_update`].
#[derive(Debug, Clone, Serialize)]
pub struct StatusRecord {
    #[serde(serialize_with = "serialize_cid")]
    pub correlation_id: CorrelationId,
    pub status: StatusCode,
    pub previous_status: StatusCode,
    /// Hex-encoded result id (e.g. transaction id) from a terminal payload.
    pub result_id: Option<String>,
    /// Message carried by a failure update.
    pub error_message: Option<String>,
    /// Result bytes following the result id in a terminal payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_payload: Option<Vec<u8>>,
    /// The full undecoded terminal payload as received.
    #[serde(skip)]
    pub raw_terminal_payload: Option<Vec<u8>>,
    /// Set on the first transition into a terminal status and never cleared,
    /// even when a later pending update re-opens progress after `Dropped`.
    /// Keys the exactly-once in-flight slot release.
    #[serde(skip)]
    pub ever_terminal: bool,
}

fn serialize_cid<S: serde::Serializer>(id: &CorrelationId, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(id)
}

impl StatusRecord {
    /// Fresh record at enqueue time.
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            status: StatusCode::Initiated,
            previous_status: StatusCode::Initiated,
            result_id: None,
            error_message: None,
            result_payload: None,
            raw_terminal_payload: None,
            ever_terminal: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A candidate update decoded from one status frame.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: StatusCode,
    /// Terminal result payload, present when the frame's result tag is set.
    pub result: Option<Vec<u8>>,
    /// Failure message, present on untagged failure frames.
    pub error_message: Option<String>,
}

impl StatusUpdate {
    /// Decode a status-class frame. Returns `None` for non-status codes.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        if !frame::is_status_code(frame.code) {
            return None;
        }
        let status = StatusCode::from_wire(frame.code, frame.subcode)?;
        let (result, error_message) = if frame.has_result() {
            (Some(frame.payload.clone()), None)
        } else if status.is_failure() && !frame.payload.is_empty() {
            (
                None,
                Some(String::from_utf8_lossy(&frame.payload).into_owned()),
            )
        } else {
            (None, None)
        };
        Some(Self {
            status,
            result,
            error_message,
        })
    }
}

/// Outcome of applying one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// The status moved forward (or a failure replaced it).
    pub advanced: bool,
    /// The record crossed into a terminal status for the first time in its
    /// life; a record re-opened after `Dropped` never fires this again. Used
    /// for the exactly-once pending-gate release.
    pub became_terminal: bool,
}

/// The status/payload update rule.
///
/// The status advances only when the candidate strictly supersedes the
/// current one (or is a failure code, which always wins). Independently, a
/// carried result payload attaches to the record regardless of whether the
/// status moved — this is the "late update" path, where data arrives after
/// the terminal status was already recorded.
pub fn apply_update(record: &mut StatusRecord, update: &StatusUpdate) -> Applied {
    let mut advanced = false;

    if update.status.supersedes(record.status) {
        record.previous_status = record.status;
        record.status = update.status;
        if let Some(msg) = &update.error_message {
            record.error_message = Some(msg.clone());
        }
        advanced = true;
    }

    if let Some(raw) = &update.result {
        record.raw_terminal_payload = Some(raw.clone());
        if raw.len() >= RESULT_ID_LEN {
            let mut id_hex = String::with_capacity(RESULT_ID_LEN * 2);
            for b in &raw[..RESULT_ID_LEN] {
                id_hex.push_str(&format!("{b:02x}"));
            }
            record.result_id = Some(id_hex);
            record.result_payload = Some(raw[RESULT_ID_LEN..].to_vec());
        } else {
            record.result_payload = Some(raw.clone());
        }
    }

    let became_terminal = !record.ever_terminal && record.is_terminal();
    if became_terminal {
        record.ever_terminal = true;
    }

    Applied {
        advanced,
        became_terminal,
    }
}
