//! Byte streams fetched from, or pushed to, the peer by stream id.
//!
//! Streams ride on ordinary channels. Requests travel as JSON messages on
//! [`STREAM_CONTROL_CHANNEL`], which both sides bind through [`Streams::new`].
//! The bytes of stream `id` travel on the channel `stream/<id>`, one message
//! per write; an empty message marks the end of the stream.
//!
//! A fetch binds the data channel before asking, so the provider may write
//! as soon as its own side is bound. A push waits for the peer to confirm
//! that its side is bound before the writer is handed out.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::{Buf, Bytes};
use ipclink_frame::ChannelId;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::channel::Channel;
use crate::error::{LinkError, Result, TransportError};
use crate::handler::TeardownReason;
use crate::link::{Link, WeakLink};
use crate::lock;
use crate::receipt::DeliveryReceipt;

/// Channel carrying stream requests between two [`Streams`] endpoints.
pub const STREAM_CONTROL_CHANNEL: &str = "ipclink/streams";

/// Name of the channel carrying the bytes of `stream`.
pub fn data_channel(stream: &str) -> String {
    format!("stream/{stream}")
}

/// A request on the stream control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StreamRequest {
    /// The sender has bound the data channel and wants the stream's bytes.
    Fetch { stream: String },
    /// The sender no longer wants a stream it fetched.
    CancelFetch { stream: String },
    /// The sender wants to write a stream to the receiver.
    Push { stream: String },
    /// The receiver has bound the data channel for a push.
    PushReady { stream: String },
}

impl StreamRequest {
    pub fn to_bytes(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|err| TransportError::Control(err.to_string()).into())
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|err| TransportError::Control(err.to_string()).into())
    }
}

/// Serves the peer's stream requests.
///
/// `on_stream_requested` and `on_stream_pushed` run on a thread of their own
/// per stream and may block for the whole transfer. `on_fetch_cancelled`
/// runs on the control channel's worker and should return promptly.
pub trait StreamProvider: Send + Sync + 'static {
    /// The peer fetched `stream`. Whatever is written before `writer` is
    /// finished or dropped is what the peer reads.
    fn on_stream_requested(&self, stream: &str, writer: StreamWriter) {
        debug!(stream, "nothing to serve for fetched stream");
        drop(writer);
    }

    /// The peer gave up on a fetch of `stream`. Writes to it start failing.
    fn on_fetch_cancelled(&self, _stream: &str) {}

    /// The peer is pushing `stream`.
    fn on_stream_pushed(&self, stream: &str, reader: StreamReader) {
        debug!(stream, "nobody reads pushed stream");
        drop(reader);
    }
}

/// Serves nothing: fetched streams are empty and pushed streams are dropped unread.
impl StreamProvider for () {}

struct Shared {
    link: WeakLink,
    provider: Box<dyn StreamProvider>,
    pushes: Mutex<HashMap<String, std_mpsc::Sender<()>>>,
}

impl Shared {
    fn on_request(self: &Arc<Self>, body: &[u8]) {
        let request = match StreamRequest::from_bytes(body) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "ignoring malformed stream request");
                return;
            }
        };
        let Some(link) = self.link.upgrade() else {
            return;
        };
        match request {
            StreamRequest::Fetch { stream } => self.serve_fetch(&link, stream),
            StreamRequest::CancelFetch { stream } => {
                info!(%stream, "peer cancelled fetch");
                self.provider.on_fetch_cancelled(&stream);
            }
            StreamRequest::Push { stream } => self.accept_push(&link, stream),
            StreamRequest::PushReady { stream } => match lock(&self.pushes).remove(&stream) {
                Some(ready) => {
                    let _ = ready.send(());
                }
                None => debug!(%stream, "push ready arrived after the push gave up"),
            },
        }
    }

    fn serve_fetch(self: &Arc<Self>, link: &Link, stream: String) {
        let writer = match StreamWriter::open(link, &stream) {
            Ok(writer) => writer,
            Err(err) => {
                error!(%stream, error = %err, "cannot serve fetched stream");
                return;
            }
        };
        info!(%stream, "serving fetched stream");
        let shared = Arc::clone(self);
        spawn_transfer(stream, move |stream| {
            shared.provider.on_stream_requested(stream, writer)
        });
    }

    fn accept_push(self: &Arc<Self>, link: &Link, stream: String) {
        let reader = match StreamReader::open(link, &stream) {
            Ok(reader) => reader,
            Err(err) => {
                error!(%stream, error = %err, "cannot accept pushed stream");
                return;
            }
        };
        let ready = StreamRequest::PushReady {
            stream: stream.clone(),
        };
        if let Err(err) = ready
            .to_bytes()
            .and_then(|body| link.send(STREAM_CONTROL_CHANNEL, body))
        {
            error!(%stream, error = %err, "cannot confirm pushed stream");
            return;
        }
        info!(%stream, "accepting pushed stream");
        let shared = Arc::clone(self);
        spawn_transfer(stream, move |stream| {
            shared.provider.on_stream_pushed(stream, reader)
        });
    }
}

/// Run one provider callback on its own thread. If the thread cannot start,
/// the callback is dropped along with its reader or writer.
fn spawn_transfer(stream: String, transfer: impl FnOnce(&str) + Send + 'static) {
    let name = format!("ipclink-stream-{stream}");
    if let Err(err) = thread::Builder::new()
        .name(name)
        .spawn(move || transfer(&stream))
    {
        error!(error = %err, "stream thread failed to start");
    }
}

fn control_teardown(_: &ChannelId, reason: TeardownReason) {
    if reason != TeardownReason::ExplicitUnbind {
        warn!(%reason, "stream control channel torn down");
    }
}

fn data_teardown(channel: &ChannelId, reason: TeardownReason) {
    debug!(%channel, %reason, "stream channel closed");
}

fn into_io(err: LinkError) -> io::Error {
    let kind = match &err {
        LinkError::ChannelTornDown(_) | LinkError::NotBound(_) | LinkError::Shutdown => {
            io::ErrorKind::BrokenPipe
        }
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}

/// Fetch and push endpoint for one link.
///
/// Both sides of a link create one; either side can then fetch from or push
/// to the other. Requests the peer makes are served by the [`StreamProvider`]
/// given to [`new`](Self::new).
#[derive(Clone)]
pub struct Streams {
    link: Link,
    shared: Arc<Shared>,
}

impl Streams {
    /// Bind [`STREAM_CONTROL_CHANNEL`] on `link`.
    pub fn new(link: &Link, provider: impl StreamProvider) -> Result<Self> {
        let shared = Arc::new(Shared {
            link: link.downgrade(),
            provider: Box::new(provider),
            pushes: Mutex::new(HashMap::new()),
        });
        let handler = {
            let shared = Arc::clone(&shared);
            move |body: Bytes| shared.on_request(&body)
        };
        link.bind_default(STREAM_CONTROL_CHANNEL, handler, control_teardown)?;
        Ok(Self {
            link: link.clone(),
            shared,
        })
    }

    /// Ask the peer for `stream` and read its bytes.
    ///
    /// Nothing confirms the peer took the request; use
    /// [`StreamReader::set_read_timeout`] to bound the wait.
    pub fn fetch(&self, stream: &str) -> Result<StreamReader> {
        let reader = StreamReader::open(&self.link, stream)?;
        self.request(StreamRequest::Fetch {
            stream: stream.to_string(),
        })?;
        debug!(stream, "fetch requested");
        Ok(reader)
    }

    /// Tell the peer to stop serving `stream` and stop reading it here.
    ///
    /// A reader still held for it fails with [`io::ErrorKind::UnexpectedEof`].
    pub fn cancel_fetch(&self, stream: &str) -> Result<()> {
        self.request(StreamRequest::CancelFetch {
            stream: stream.to_string(),
        })?;
        match self.link.unbind(&data_channel(stream)) {
            Ok(()) | Err(LinkError::NotBound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Offer `stream` to the peer and return a writer once it is ready to
    /// read. Fails with [`LinkError::BindTimeout`] if the peer does not answer
    /// within the link's `bind_timeout`.
    pub fn push(&self, stream: &str) -> Result<StreamWriter> {
        let name = data_channel(stream);
        ChannelId::new(&name)?;

        let (ready_tx, ready_rx) = std_mpsc::channel();
        {
            let mut pushes = lock(&self.shared.pushes);
            if pushes.contains_key(stream) {
                return Err(LinkError::AlreadyBound(name));
            }
            pushes.insert(stream.to_string(), ready_tx);
        }

        let timeout = self.link.config().bind_timeout;
        let answered = self
            .request(StreamRequest::Push {
                stream: stream.to_string(),
            })
            .and_then(|()| {
                ready_rx
                    .recv_timeout(timeout)
                    .map_err(|_| LinkError::BindTimeout {
                        channel: name.clone(),
                        timeout,
                    })
            });
        lock(&self.shared.pushes).remove(stream);
        if let Err(err) = answered {
            warn!(stream, error = %err, "push not accepted");
            return Err(err);
        }
        StreamWriter::open(&self.link, stream)
    }

    /// Stop serving the peer's requests.
    pub fn close(&self) -> Result<()> {
        self.link.unbind(STREAM_CONTROL_CHANNEL)
    }

    fn request(&self, request: StreamRequest) -> Result<()> {
        self.link
            .send(STREAM_CONTROL_CHANNEL, request.to_bytes()?)?
            .wait()
            .map(|_| ())
    }
}

/// Writes one stream's bytes to the peer.
///
/// Each `write` becomes one message on the stream's channel. The stream ends
/// when the writer is [`finish`](Self::finish)ed or dropped. A writer dropped
/// while its thread panics ends the stream without the end marker, so the
/// reader sees an error instead of a clean end.
pub struct StreamWriter {
    link: Link,
    channel: Channel,
    pending: VecDeque<DeliveryReceipt>,
    finished: bool,
}

impl StreamWriter {
    fn open(link: &Link, stream: &str) -> Result<Self> {
        let channel = link.bind_default(&data_channel(stream), |_: Bytes| {}, data_teardown)?;
        Ok(Self {
            link: link.clone(),
            channel,
            pending: VecDeque::new(),
            finished: false,
        })
    }

    /// The channel carrying this stream.
    pub fn channel(&self) -> &ChannelId {
        self.channel.id()
    }

    /// End the stream once everything written has reached the transport.
    pub fn finish(mut self) -> io::Result<()> {
        self.end()
    }

    fn end(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let result = self.enqueue(Bytes::new()).and_then(|()| self.flush());
        self.link.release(&self.channel);
        result
    }

    /// Drop receipts of writes that already went out.
    fn reap(&mut self) -> io::Result<()> {
        while let Some(oldest) = self.pending.front_mut() {
            match oldest.try_result() {
                None => break,
                Some(result) => {
                    self.pending.pop_front();
                    result.map_err(into_io)?;
                }
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, payload: Bytes) -> io::Result<()> {
        self.reap()?;
        loop {
            match self.channel.send(payload.clone()) {
                Ok(receipt) => {
                    self.pending.push_back(receipt);
                    return Ok(());
                }
                Err(LinkError::Backpressure { .. }) => match self.pending.pop_front() {
                    Some(oldest) => {
                        oldest.wait().map_err(into_io)?;
                    }
                    None => thread::sleep(Duration::from_millis(1)),
                },
                Err(err) => return Err(into_io(err)),
            }
        }
    }
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min(self.link.config().max_message_size);
        self.enqueue(Bytes::copy_from_slice(&buf[..len]))?;
        Ok(len)
    }

    /// Wait until every write has been handed to the transport.
    fn flush(&mut self) -> io::Result<()> {
        while let Some(receipt) = self.pending.pop_front() {
            receipt.wait().map_err(into_io)?;
        }
        Ok(())
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if thread::panicking() {
            self.finished = true;
            self.link.release(&self.channel);
            return;
        }
        if let Err(err) = self.end() {
            warn!(channel = %self.channel.id(), error = %err, "stream ended with an error");
        }
    }
}

/// Reads one stream's bytes from the peer.
///
/// `read` returns 0 once the writer has finished. A stream that stops without
/// its end marker (the peer unbound it early or died, or the fetch was
/// cancelled) fails once with [`io::ErrorKind::UnexpectedEof`].
pub struct StreamReader {
    link: Link,
    channel: Channel,
    incoming: std_mpsc::Receiver<Bytes>,
    chunk: Bytes,
    timeout: Option<Duration>,
    done: bool,
}

impl StreamReader {
    fn open(link: &Link, stream: &str) -> Result<Self> {
        let (tx, incoming) = std_mpsc::channel();
        let handler = move |payload: Bytes| {
            let _ = tx.send(payload);
        };
        let channel = link.bind_default(&data_channel(stream), handler, data_teardown)?;
        Ok(Self {
            link: link.clone(),
            channel,
            incoming,
            chunk: Bytes::new(),
            timeout: None,
            done: false,
        })
    }

    /// The channel carrying this stream.
    pub fn channel(&self) -> &ChannelId {
        self.channel.id()
    }

    /// Bound how long one `read` waits for data. `None` waits forever.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// The next chunk, or `None` at the end of the stream.
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let received = match self.timeout {
            Some(timeout) => self.incoming.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "no stream data within the read timeout",
                )),
                RecvTimeoutError::Disconnected => None,
            }),
            None => self.incoming.recv().map_err(|_| None),
        };
        match received {
            Ok(chunk) if chunk.is_empty() => Ok(None),
            Ok(chunk) => Ok(Some(chunk)),
            Err(Some(timed_out)) => Err(timed_out),
            Err(None) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream on '{}' closed before its end", self.channel.id()),
            )),
        }
    }

    fn close(&mut self) {
        if !self.done {
            self.done = true;
            self.link.release(&self.channel);
        }
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.chunk.is_empty() {
            if self.done {
                return Ok(0);
            }
            match self.next_chunk() {
                Ok(Some(chunk)) => self.chunk = chunk,
                Ok(None) => self.close(),
                Err(err) => {
                    if err.kind() != io::ErrorKind::TimedOut {
                        self.close();
                    }
                    return Err(err);
                }
            }
        }
        let len = buf.len().min(self.chunk.len());
        buf[..len].copy_from_slice(&self.chunk[..len]);
        self.chunk.advance(len);
        Ok(len)
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.close();
    }
}
