//! chainpipe-runtime — the dispatch runtime behind one node connection.
//!
//! # Overview
//!
//! One [`NodeClient`] owns one physical connection and multiplexes many
//! concurrent tracked requests plus unsolicited push events over it:
//!
//! - the **dispatch proxy** task owns the transport and classifies every
//!   inbound frame to exactly one routing target
//! - **N workers** pull from a shared bounded queue, one round trip each
//! - the **heartbeat monitor** probes liveness and tears the runtime down
//!   when its tolerance is exhausted
//! - the **callback listener** drains out-of-band pushes through the same
//!   response-processing path
//!
//! Callers track requests through the correlation table: poll
//! ([`NodeClient::get_status`]), block ([`NodeClient::send_blocking`]) or
//! await a future ([`NodeClient::send_async`]).

pub mod client;
mod dispatch;
mod heartbeat;
mod listener;
mod processor;
mod shared;
mod worker;

pub use client::{ConnState, ConnectOptions, NodeClient, StatusFuture};
