use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use ipclink_channel::{ChannelId, Link, LinkConfig, SocketListener, SocketTransport, TeardownReason};
use tracing::info;

use crate::cmd::{socket_config, ListenArgs};
use crate::exit::{frame_error, io_error, link_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_message, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum Event {
    Message { channel: ChannelId, payload: Bytes },
    Closed { channel: ChannelId, reason: TeardownReason },
}

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let listener = SocketListener::bind_with_config(&args.path, socket_config(args.max_frame_size))
        .map_err(|err| link_error("bind failed", err))?;
    info!(path = %listener.path().display(), "listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let Some(transport) = accept(listener, &running)? else {
        return Ok(SUCCESS);
    };

    let config = LinkConfig {
        default_max_frame_size: args.max_frame_size,
        ..LinkConfig::default()
    };
    let link =
        Link::new(transport.clone(), config).map_err(|err| link_error("link setup failed", err))?;
    transport
        .attach(link.router())
        .map_err(|err| link_error("link setup failed", err))?;

    let (events_tx, events) = mpsc::channel();
    for name in &args.channel {
        bind_channel(&link, name, args.max_frame_size, &events_tx)?;
    }
    drop(events_tx);
    info!(channels = ?args.channel, "channels bound");

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(POLL_INTERVAL) {
            Ok(Event::Message { channel, payload }) => {
                print_message(channel.as_str(), &payload, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            Ok(Event::Closed { channel, reason }) => info!(%channel, %reason, "channel closed"),
            Err(RecvTimeoutError::Timeout) => {}
            // Handlers and listeners are dropped once their channel is torn
            // down and drained, so this means nothing more can arrive.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    link.shutdown();
    Ok(SUCCESS)
}

fn accept(listener: SocketListener, running: &AtomicBool) -> CliResult<Option<SocketTransport>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("ipclink-accept".to_string())
        .spawn(move || {
            let _ = tx.send(listener.accept());
        })
        .map_err(|err| io_error("accept failed", err))?;

    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(result) => {
                let transport = result.map_err(|err| link_error("accept failed", err))?;
                info!("peer connected");
                return Ok(Some(transport));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CliError::new(INTERNAL, "accept thread exited"));
            }
        }
    }
    Ok(None)
}

fn bind_channel(
    link: &Link,
    name: &str,
    max_frame_size: usize,
    events: &mpsc::Sender<Event>,
) -> CliResult<()> {
    let id = ChannelId::new(name).map_err(|err| frame_error("invalid channel", err))?;
    let messages = events.clone();
    let handler = move |payload: Bytes| {
        let _ = messages.send(Event::Message {
            channel: id.clone(),
            payload,
        });
    };
    let closed = events.clone();
    let listener = move |channel: &ChannelId, reason: TeardownReason| {
        let _ = closed.send(Event::Closed {
            channel: channel.clone(),
            reason,
        });
    };

    link.bind(name, max_frame_size, handler, listener)
        .map_err(|err| link_error(&format!("binding '{name}' failed"), err))?;
    Ok(())
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
