//! The heartbeat monitor.
//!
//! Probes the node on a fixed interval, carrying a credit counter that
//! starts at the configured tolerance. A well-formed reply refills the
//! credits; anything else burns one. At zero credits the monitor fails the
//! whole runtime — every outstanding blocking call and future then resolves
//! with a transport error. An explicit shutdown interrupts the monitor
//! without counting as a miss.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;

use chainpipe_core::frame::{op, push};
use chainpipe_core::Frame;

use crate::dispatch::Outbound;
use crate::shared::RuntimeShared;

pub(crate) fn spawn(
    cmd_tx: mpsc::Sender<Outbound>,
    reply_rx: mpsc::Receiver<Frame>,
    shared: Arc<RuntimeShared>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run(cmd_tx, reply_rx, shared, shutdown))
}

async fn run(
    cmd_tx: mpsc::Sender<Outbound>,
    mut reply_rx: mpsc::Receiver<Frame>,
    shared: Arc<RuntimeShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let tolerance = shared.config.heartbeat_tolerance;
    let mut credits = tolerance;

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = time::sleep(shared.config.heartbeat_interval) => {}
        }

        if cmd_tx
            .send(Outbound::Probe(Frame::new(op::HEARTBEAT_PROBE, 0, Vec::new())))
            .await
            .is_err()
        {
            return;
        }

        let reply = tokio::select! {
            _ = shutdown.changed() => return,
            reply = time::timeout(shared.config.heartbeat_reply_timeout, reply_rx.recv()) => reply,
        };

        match reply {
            Ok(Some(frame)) if frame.code == push::HEARTBEAT_REPLY => {
                if credits < tolerance {
                    tracing::info!("heartbeat recovered");
                }
                credits = tolerance;
            }
            // Reply channel closed: the dispatch proxy already failed.
            Ok(None) => return,
            _ => {
                credits = credits.saturating_sub(1);
                tracing::warn!(remaining = credits, "heartbeat probe missed");
                if credits == 0 {
                    shared.fail("heartbeat tolerance exhausted");
                    return;
                }
            }
        }
    }
}
