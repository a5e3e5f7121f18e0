//! Error taxonomy for the dispatch runtime.

use thiserror::Error;

use crate::frame::CorrelationId;

/// Frame-level protocol violations. Logged where they occur; a bad frame is
/// dropped, it never crashes a loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Shorter than the minimal header for its shape.
    #[error("frame too short ({len} bytes)")]
    Truncated { len: usize },

    /// Protocol version this build does not speak.
    #[error("unsupported protocol version {got}")]
    VersionMismatch { got: u8 },

    /// Discriminator outside every known code class.
    #[error("unrecognized message code {code:#04x}")]
    UnknownCode { code: u8 },
}

/// Errors surfaced by the client runtime.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connect/send failed, or a reply was expected and nothing came back.
    /// Not auto-retried; recovery is teardown plus manual reconnect.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Malformed or unrecognized wire traffic.
    #[error("protocol violation: {0}")]
    Protocol(#[from] FrameError),

    /// The in-flight request limit is reached. Returned synchronously at
    /// enqueue.
    #[error("pending request limit reached ({limit})")]
    Capacity { limit: usize },

    /// A blocking wait exceeded its configured duration. The underlying
    /// request may still be live server-side.
    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Heartbeat tolerance exhausted; the runtime has been torn down.
    #[error("connection liveness lost after {misses} consecutive missed heartbeats")]
    LivenessLost { misses: u32 },

    /// Operation requires a capability the handshake did not grant.
    #[error("capability '{name}' not granted")]
    Privilege { name: String },

    /// Operation requires an established connection.
    #[error("not connected")]
    NotConnected,

    /// A connection already exists and `reconnect` was not requested.
    #[error("already connected (set reconnect to replace the connection)")]
    AlreadyConnected,

    /// Endpoint URL failed validation.
    #[error("endpoint URL must not be empty")]
    EmptyUrl,

    /// The correlation id is already tracked.
    #[error("correlation id {0} already tracked")]
    Duplicate(CorrelationId),

    /// The correlation id was evicted from the table mid-wait.
    #[error("correlation id {0} is no longer tracked")]
    Untracked(CorrelationId),
}

impl ClientError {
    /// Shorthand for the disconnected-runtime error every dependent
    /// operation reports instead of hanging.
    pub fn disconnected() -> Self {
        Self::Transport("connection is down".into())
    }

    /// Returns `true` if this error means the whole runtime is unusable
    /// until the caller reconnects.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::LivenessLost { .. })
    }
}
