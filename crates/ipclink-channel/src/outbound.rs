//! Outbound delivery worker: one thread per bound channel.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ipclink_frame::{split_message, Frame, Message};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::channel::{ChannelCore, Outgoing};
use crate::config::LinkConfig;
use crate::error::{LinkError, TransportError};
use crate::handler::TeardownReason;
use crate::reliability::FaultReporter;
use crate::transport::FrameTransport;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) max_attempts: u32,
    pub(crate) backoff: Duration,
}

impl From<&LinkConfig> for RetryPolicy {
    fn from(config: &LinkConfig) -> Self {
        Self {
            max_attempts: config.max_send_attempts,
            backoff: config.retry_backoff,
        }
    }
}

pub(crate) fn spawn(
    core: Arc<ChannelCore>,
    queue: mpsc::Receiver<Outgoing>,
    transport: Arc<dyn FrameTransport>,
    policy: RetryPolicy,
    faults: FaultReporter,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("ipclink-out-{}", core.id()))
        .spawn(move || run(core, queue, transport, policy, faults))
}

fn run(
    core: Arc<ChannelCore>,
    mut queue: mpsc::Receiver<Outgoing>,
    transport: Arc<dyn FrameTransport>,
    policy: RetryPolicy,
    faults: FaultReporter,
) {
    while let Some(Outgoing { message, reply }) = queue.blocking_recv() {
        if !core.is_accepting() {
            let _ = reply.send(Err(LinkError::ChannelTornDown(core.id().to_string())));
            continue;
        }

        let sequence = message.sequence;
        match deliver(&core, transport.as_ref(), policy, &message) {
            Ok(frames) => {
                core.stats().record_sent(frames as u64);
                debug!(channel = %core.id(), sequence, frames, "message delivered");
                let _ = reply.send(Ok(sequence));
            }
            Err(err) => {
                error!(channel = %core.id(), sequence, error = %err, "message delivery failed");
                core.stop_accepting();
                faults.report(TeardownReason::TransportFailure, err.to_string());
                let _ = reply.send(Err(err));
            }
        }
    }
    debug!(channel = %core.id(), "outbound worker stopped");
}

/// Split and transmit one message, frames strictly in index order.
fn deliver(
    core: &ChannelCore,
    transport: &dyn FrameTransport,
    policy: RetryPolicy,
    message: &Message,
) -> Result<usize, LinkError> {
    let frames = split_message(core.id(), message, core.max_frame_size())?;
    for frame in &frames {
        transmit(core, transport, policy, frame).map_err(|source| {
            LinkError::TransportFailure {
                channel: core.id().to_string(),
                attempts: policy.max_attempts,
                source,
            }
        })?;
    }
    Ok(frames.len())
}

fn transmit(
    core: &ChannelCore,
    transport: &dyn FrameTransport,
    policy: RetryPolicy,
    frame: &Frame,
) -> Result<(), TransportError> {
    let mut attempt = 1;
    loop {
        match transport.transmit_frame(frame) {
            Ok(()) => return Ok(()),
            Err(err) if attempt < policy.max_attempts => {
                warn!(
                    channel = %core.id(),
                    sequence = frame.sequence,
                    index = frame.index,
                    attempt,
                    error = %err,
                    "frame transmit failed; retrying"
                );
                core.stats().record_retry();
                if !policy.backoff.is_zero() {
                    thread::sleep(policy.backoff);
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
