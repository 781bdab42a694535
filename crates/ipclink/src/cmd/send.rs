use std::collections::VecDeque;
use std::fs;
use std::time::Duration;

use bytes::Bytes;
use ipclink_channel::{
    Channel, ChannelId, DeliveryReceipt, Link, LinkConfig, LinkError, SocketConfig,
    SocketTransport, TeardownReason,
};
use tracing::{debug, warn};

use crate::cmd::{socket_config, SendArgs};
use crate::exit::{io_error, link_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_summary, OutputFormat, SendSummary};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    if args.repeat == 0 {
        return Err(CliError::new(USAGE, "--repeat must be greater than zero"));
    }
    let payload = Bytes::from(resolve_payload(&args)?);

    let socket = SocketConfig {
        open_timeout: timeout,
        ..socket_config(args.max_frame_size)
    };
    let transport = SocketTransport::connect(&args.path, socket)
        .map_err(|err| link_error("connect failed", err))?;
    let config = LinkConfig {
        default_max_frame_size: args.max_frame_size,
        bind_timeout: timeout,
        ..LinkConfig::default()
    };
    let link =
        Link::new(transport.clone(), config).map_err(|err| link_error("link setup failed", err))?;
    transport
        .attach(link.router())
        .map_err(|err| link_error("link setup failed", err))?;

    let channel = link
        .bind(
            &args.channel,
            args.max_frame_size,
            |payload: Bytes| debug!(size = payload.len(), "ignoring reply"),
            |channel: &ChannelId, reason: TeardownReason| {
                if reason != TeardownReason::ExplicitUnbind {
                    warn!(%channel, %reason, "channel closed before sending finished");
                }
            },
        )
        .map_err(|err| link_error("bind failed", err))?;
    transport
        .wait_for_peer(channel.id(), timeout)
        .map_err(|err| link_error("peer never opened the channel", err))?;

    let last_sequence =
        send_all(&channel, &payload, args.repeat).map_err(|err| link_error("send failed", err))?;
    let stats = channel.stats();
    link.unbind(&args.channel)
        .map_err(|err| link_error("unbind failed", err))?;
    link.shutdown();

    print_summary(
        &SendSummary {
            channel: args.channel,
            max_frame_size: args.max_frame_size,
            messages: args.repeat,
            payload_size: payload.len(),
            last_sequence,
            stats,
        },
        format,
    );
    Ok(SUCCESS)
}

/// Trait seam over [`Channel`] so the backpressure loop can be tested without a link.
trait MessageSink {
    fn try_send(&self, payload: Bytes) -> Result<DeliveryReceipt, LinkError>;
}

impl MessageSink for Channel {
    fn try_send(&self, payload: Bytes) -> Result<DeliveryReceipt, LinkError> {
        self.send(payload)
    }
}

/// Queue `repeat` copies of `payload`, waiting on the oldest receipt whenever
/// the channel pushes back. Returns the last delivered sequence number.
fn send_all<S: MessageSink>(
    sender: &S,
    payload: &Bytes,
    repeat: usize,
) -> Result<Option<u64>, LinkError> {
    let mut pending: VecDeque<DeliveryReceipt> = VecDeque::new();
    let mut last = None;
    for _ in 0..repeat {
        loop {
            match sender.try_send(payload.clone()) {
                Ok(receipt) => {
                    pending.push_back(receipt);
                    break;
                }
                Err(err @ LinkError::Backpressure { .. }) => {
                    let Some(oldest) = pending.pop_front() else {
                        return Err(err);
                    };
                    last = Some(oldest.wait()?);
                }
                Err(err) => return Err(err),
            }
        }
    }
    for receipt in pending {
        last = Some(receipt.wait()?);
    }
    Ok(last)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
