//! The worker pool.
//!
//! Each worker loops: claim one request from the shared bounded queue, push
//! its frame through the dispatch proxy, wait on its private reply channel
//! under the configured receive timeout, feed whatever comes back to the
//! response processor. A timed-out or missing reply is logged and the worker
//! moves on — the status record catches up later through the proxy's inline
//! path. Workers share nothing with each other beyond the queue and (through
//! the processor) the correlation table.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;

use chainpipe_core::frame::op;
use chainpipe_core::{CorrelationId, Frame};

use crate::dispatch::Outbound;
use crate::processor::ResponseProcessor;
use crate::shared::RuntimeShared;

/// One enqueued request, exclusively owned by the queue until a worker
/// claims it.
pub(crate) struct PendingRequest {
    pub id: CorrelationId,
    pub payload: Vec<u8>,
    pub enqueued_at: Instant,
}

pub(crate) fn spawn(
    index: usize,
    queue: Arc<Mutex<mpsc::Receiver<PendingRequest>>>,
    cmd_tx: mpsc::Sender<Outbound>,
    reply_rx: mpsc::Receiver<Frame>,
    processor: ResponseProcessor,
    shared: Arc<RuntimeShared>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run(
        index, queue, cmd_tx, reply_rx, processor, shared, shutdown,
    ))
}

async fn run(
    index: usize,
    queue: Arc<Mutex<mpsc::Receiver<PendingRequest>>>,
    cmd_tx: mpsc::Sender<Outbound>,
    mut reply_rx: mpsc::Receiver<Frame>,
    processor: ResponseProcessor,
    shared: Arc<RuntimeShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let request = {
            let mut queue = queue.lock().await;
            tokio::select! {
                _ = shutdown.changed() => None,
                request = queue.recv() => request,
            }
        };
        let Some(request) = request else {
            if *shutdown.borrow() {
                return;
            }
            // Queue sender dropped without a shutdown signal: supervisor is
            // tearing down anyway.
            return;
        };

        tracing::debug!(
            worker = index,
            id = %request.id,
            queued_ms = request.enqueued_at.elapsed().as_millis() as u64,
            "worker claimed request"
        );

        let frame = Frame::tagged(op::REQUEST, 0, request.id, request.payload);
        if cmd_tx.send(Outbound::Request { frame, worker: index }).await.is_err() {
            // Dispatch proxy is gone; nothing more this worker can do.
            return;
        }

        match time::timeout(shared.config.receive_timeout, reply_rx.recv()).await {
            Ok(Some(reply)) => processor.process(&reply),
            Ok(None) => return,
            Err(_) => {
                tracing::warn!(
                    worker = index,
                    id = %request.id,
                    timeout_ms = shared.config.receive_timeout.as_millis() as u64,
                    "no response within receive timeout"
                );
            }
        }
    }
}
