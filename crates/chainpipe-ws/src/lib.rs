//! chainpipe-ws — WebSocket transport for ChainPipe.
//!
//! Carries ChainPipe's binary frames as WebSocket binary messages over one
//! persistent connection. Reconnect is deliberately not handled here: the
//! runtime's recovery model is teardown plus a caller-driven reconnect.

pub mod transport;

pub use transport::WsTransport;
