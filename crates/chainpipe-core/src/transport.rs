//! The `FrameTransport` trait — the one physical connection the dispatch
//! proxy owns.

use async_trait::async_trait;

use crate::error::ClientError;
use crate::frame::Frame;

/// A bidirectional, frame-oriented connection to one node.
///
/// The dispatch proxy is the sole owner; no other task touches the
/// transport. Implementations must be `Send` so the proxy task can run on
/// any runtime thread.
#[async_trait]
pub trait FrameTransport: Send + 'static {
    /// Write one frame. An error here is fatal to the connection.
    async fn send(&mut self, frame: Frame) -> Result<(), ClientError>;

    /// Read the next frame.
    ///
    /// - `Some(Ok(frame))` — a well-formed frame.
    /// - `Some(Err(e))` — a malformed frame; the caller logs it and keeps
    ///   reading (protocol errors never kill the loop).
    /// - `None` — the connection is gone (closed or failed). Fatal.
    async fn recv(&mut self) -> Option<Result<Frame, ClientError>>;

    /// Release the underlying resource. Default is a no-op for transports
    /// that close on drop.
    async fn close(&mut self) {}
}
