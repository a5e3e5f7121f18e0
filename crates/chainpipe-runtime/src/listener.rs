//! The callback listener.
//!
//! Drains the out-of-band push channel and feeds every frame through the
//! same classification-and-processing path as the dispatch proxy's inline
//! branch, so events and capability grants are handled identically whichever
//! loop received them first. Transports with a secondary delivery path (and
//! tests) push frames into this channel through the supervisor.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use chainpipe_core::Frame;

use crate::processor::ResponseProcessor;

pub(crate) fn spawn(
    oob_rx: mpsc::Receiver<Frame>,
    processor: ResponseProcessor,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run(oob_rx, processor, shutdown))
}

async fn run(
    mut oob_rx: mpsc::Receiver<Frame>,
    processor: ResponseProcessor,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            frame = oob_rx.recv() => match frame {
                None => return,
                Some(frame) => processor.process(&frame),
            }
        }
    }
}
