//! Inbound receive worker: one thread per bound channel.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ipclink_frame::{Frame, Reassembler};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::channel::ChannelCore;
use crate::handler::{MessageHandler, TeardownReason};
use crate::reliability::FaultReporter;

pub(crate) fn spawn<H: MessageHandler>(
    core: Arc<ChannelCore>,
    queue: mpsc::Receiver<Frame>,
    handler: H,
    max_message_size: usize,
    faults: FaultReporter,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("ipclink-in-{}", core.id()))
        .spawn(move || run(core, queue, handler, max_message_size, faults))
}

fn run<H: MessageHandler>(
    core: Arc<ChannelCore>,
    mut queue: mpsc::Receiver<Frame>,
    mut handler: H,
    max_message_size: usize,
    faults: FaultReporter,
) {
    let mut reassembler = Reassembler::with_max_message_size(core.id().clone(), max_message_size);

    while let Some(frame) = queue.blocking_recv() {
        if core.is_discarding_inbound() {
            continue;
        }
        core.stats().record_frame_received();

        match reassembler.push(frame) {
            Ok(None) => {}
            Ok(Some(message)) => {
                core.stats().record_message_received();
                debug!(
                    channel = %core.id(),
                    sequence = message.sequence,
                    size = message.payload.len(),
                    "message received"
                );
                let payload = message.payload;
                if panic::catch_unwind(AssertUnwindSafe(|| handler.on_message(payload))).is_err() {
                    error!(
                        channel = %core.id(),
                        sequence = message.sequence,
                        "message handler panicked"
                    );
                }
            }
            Err(err) => {
                error!(channel = %core.id(), error = %err, "inbound protocol violation");
                core.stop_accepting();
                core.discard_inbound();
                faults.report(TeardownReason::ProtocolViolation, err.to_string());
            }
        }
    }

    reassembler.clear();
    debug!(channel = %core.id(), "inbound worker stopped");
}
