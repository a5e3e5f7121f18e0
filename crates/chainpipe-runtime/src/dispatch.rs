//! The dispatch proxy — the single loop owning the physical connection.
//!
//! Outbound traffic (worker requests, untracked queries, heartbeat probes,
//! the handshake hello) arrives on one command channel and is written to the
//! transport verbatim, FIFO. Inbound frames are classified by their
//! discriminator to exactly one target:
//!
//! - status update with a pending worker entry → that worker's reply channel
//! - status update with no entry (late update)  → response processor, inline
//! - heartbeat reply                            → heartbeat channel
//! - query reply                                → oldest untracked-query waiter
//! - event callback / capability grant          → response processor, inline
//!
//! Any transport failure is fatal to the loop: shared state flips to
//! disconnected, query waiters resolve with a transport error, table waiters
//! wake. The supervisor observes this and reports every dependent operation
//! as a transport error until the caller reconnects.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use chainpipe_core::frame::{self, push};
use chainpipe_core::{ClientError, CorrelationId, Frame, FrameTransport};

use crate::processor::ResponseProcessor;
use crate::shared::RuntimeShared;

/// Commands from the runtime's other loops and the caller-facing API.
pub(crate) enum Outbound {
    /// Tracked request from worker `worker`; its replies route back to that
    /// worker's channel.
    Request { frame: Frame, worker: usize },
    /// Untracked single round trip; the reply resolves the oneshot.
    Query {
        frame: Frame,
        reply: oneshot::Sender<Result<Vec<u8>, ClientError>>,
    },
    /// Heartbeat probe.
    Probe(Frame),
    /// Connect-time hello with optional credentials.
    Hello(Frame),
}

pub(crate) fn spawn<T: FrameTransport>(
    transport: T,
    cmd_rx: mpsc::Receiver<Outbound>,
    worker_replies: Vec<mpsc::Sender<Frame>>,
    heartbeat_reply: mpsc::Sender<Frame>,
    processor: ResponseProcessor,
    shared: Arc<RuntimeShared>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run(
        transport,
        cmd_rx,
        worker_replies,
        heartbeat_reply,
        processor,
        shared,
        shutdown,
    ))
}

async fn run<T: FrameTransport>(
    mut transport: T,
    mut cmd_rx: mpsc::Receiver<Outbound>,
    worker_replies: Vec<mpsc::Sender<Frame>>,
    heartbeat_reply: mpsc::Sender<Frame>,
    processor: ResponseProcessor,
    shared: Arc<RuntimeShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Correlation id → originating worker, recorded as each request frame
    // passes through on its way out.
    let mut pending_workers: HashMap<CorrelationId, usize> = HashMap::new();
    // FIFO of untracked-query waiters; replies pair up in order.
    let mut query_waiters: VecDeque<oneshot::Sender<Result<Vec<u8>, ClientError>>> =
        VecDeque::new();

    let failure: Option<&str> = loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break None;
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    // Supervisor dropped the command channel: orderly stop.
                    None => break None,
                    Some(Outbound::Request { frame, worker }) => {
                        if let Some(id) = frame.correlation_id {
                            pending_workers.insert(id, worker);
                        }
                        if let Err(e) = transport.send(frame).await {
                            tracing::warn!(error = %e, "transport send failed");
                            break Some("transport send failed");
                        }
                    }
                    Some(Outbound::Query { frame, reply }) => {
                        match transport.send(frame).await {
                            Ok(()) => query_waiters.push_back(reply),
                            Err(e) => {
                                tracing::warn!(error = %e, "transport send failed");
                                let _ = reply.send(Err(ClientError::disconnected()));
                                break Some("transport send failed");
                            }
                        }
                    }
                    Some(Outbound::Probe(frame)) | Some(Outbound::Hello(frame)) => {
                        if let Err(e) = transport.send(frame).await {
                            tracing::warn!(error = %e, "transport send failed");
                            break Some("transport send failed");
                        }
                    }
                }
            }
            inbound = transport.recv() => {
                match inbound {
                    None => break Some("transport closed"),
                    Some(Err(e)) => {
                        // Malformed frame: log, drop, keep the loop alive.
                        tracing::warn!(error = %e, "dropping malformed frame");
                    }
                    Some(Ok(frame)) => classify(
                        frame,
                        &worker_replies,
                        &heartbeat_reply,
                        &mut pending_workers,
                        &mut query_waiters,
                        &processor,
                    ),
                }
            }
        }
    };

    for waiter in query_waiters {
        let _ = waiter.send(Err(ClientError::disconnected()));
    }
    transport.close().await;
    if let Some(reason) = failure {
        shared.fail(reason);
    }
}

fn classify(
    frame: Frame,
    worker_replies: &[mpsc::Sender<Frame>],
    heartbeat_reply: &mpsc::Sender<Frame>,
    pending_workers: &mut HashMap<CorrelationId, usize>,
    query_waiters: &mut VecDeque<oneshot::Sender<Result<Vec<u8>, ClientError>>>,
    processor: &ResponseProcessor,
) {
    match frame.code {
        push::HEARTBEAT_REPLY => {
            if heartbeat_reply.try_send(frame).is_err() {
                tracing::debug!("heartbeat reply dropped (monitor not waiting)");
            }
        }
        push::QUERY_REPLY => match query_waiters.pop_front() {
            Some(waiter) => {
                let _ = waiter.send(Ok(frame.payload));
            }
            None => tracing::warn!("query reply with no outstanding query"),
        },
        push::EVENT_CALLBACK | push::CAPABILITY_GRANT => processor.process(&frame),
        code if frame::is_status_code(code) => {
            let worker = frame
                .correlation_id
                .and_then(|id| pending_workers.remove(&id));
            match worker {
                Some(idx) => {
                    if let Err(e) = worker_replies[idx].try_send(frame) {
                        // Worker moved on (its receive timed out); process
                        // the update inline so it is not lost.
                        processor.process(&e.into_inner());
                    }
                }
                // No worker waiting: a late update for a request whose round
                // trip already finished.
                None => processor.process(&frame),
            }
        }
        code => {
            tracing::warn!(code = format_args!("{code:#04x}"), "unrecognized discriminator, dropping frame");
        }
    }
}
