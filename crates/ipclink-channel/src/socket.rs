//! Unix domain socket transport.
//!
//! One stream carries every channel. Data frames and JSON control packets
//! share the wire codec from `ipclink-frame`; a single reader thread per
//! connection routes what arrives.

use std::collections::{HashMap, HashSet};
use std::net::Shutdown;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use ipclink_frame::{ChannelId, Frame, FrameError, Packet, PacketConfig, PacketReader, PacketWriter};
use tracing::{debug, info, warn};

use crate::config::SocketConfig;
use crate::control::{
    ControlMessage, CONTROL_CLOSE, CONTROL_OPEN, CONTROL_OPEN_ACK, CONTROL_OPEN_REJECT,
};
use crate::error::{LinkError, Result, TransportError};
use crate::lock;
use crate::transport::{FrameTransport, InboundRouter};

type OpenResult = std::result::Result<(), TransportError>;

/// Listening socket that yields one [`SocketTransport`] per accepted peer.
pub struct SocketListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
    config: SocketConfig,
}

impl SocketListener {
    /// Permission mode applied to the socket file.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS and the BSDs.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_config(path, SocketConfig::default())
    }

    /// Bind at `path`, replacing a stale socket file but never any other file.
    pub fn bind_with_config(path: impl AsRef<Path>, config: SocketConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let bind_err = |path: &Path, source: std::io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            }
            .into());
        }

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                )
                .into());
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(|e| bind_err(&path, e))?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE))
            .map_err(|e| bind_err(&path, e))?;
        let metadata = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;

        info!(?path, "listening on unix domain socket");
        Ok(Self {
            listener,
            path,
            created_inode: (metadata.dev(), metadata.ino()),
            config,
        })
    }

    /// Wait for the next peer (blocking).
    pub fn accept(&self) -> Result<SocketTransport> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Io)?;
        info!(path = ?self.path, "accepted peer connection");
        SocketTransport::from_stream(stream, self.config.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        let Ok(metadata) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        if metadata.file_type().is_socket() && (metadata.dev(), metadata.ino()) == self.created_inode
        {
            debug!(path = ?self.path, "cleaning up socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
        }
    }
}

/// [`FrameTransport`] over one Unix domain socket connection.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct SocketTransport {
    shared: Arc<Shared>,
}

struct Shared {
    stream: UnixStream,
    writer: Mutex<PacketWriter<UnixStream>>,
    reader: Mutex<Option<PacketReader<UnixStream>>>,
    pending_opens: Mutex<HashMap<ChannelId, std_mpsc::Sender<OpenResult>>>,
    peer_opened: Mutex<HashSet<ChannelId>>,
    peer_open_changed: Condvar,
    connected: AtomicBool,
    config: SocketConfig,
}

impl SocketTransport {
    /// Connect to a listening [`SocketListener`].
    pub fn connect(path: impl AsRef<Path>, config: SocketConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "connected to unix domain socket");
        Self::from_stream(stream, config)
    }

    fn from_stream(stream: UnixStream, config: SocketConfig) -> Result<Self> {
        let packets = PacketConfig {
            max_payload_size: config.max_packet_payload,
            write_timeout: config.write_timeout,
        };
        let write_half = stream.try_clone().map_err(TransportError::Io)?;
        write_half
            .set_write_timeout(packets.write_timeout)
            .map_err(TransportError::Io)?;
        let read_half = stream.try_clone().map_err(TransportError::Io)?;

        Ok(Self {
            shared: Arc::new(Shared {
                stream,
                writer: Mutex::new(PacketWriter::with_config(write_half, packets.clone())),
                reader: Mutex::new(Some(PacketReader::with_config(read_half, packets))),
                pending_opens: Mutex::new(HashMap::new()),
                peer_opened: Mutex::new(HashSet::new()),
                peer_open_changed: Condvar::new(),
                connected: AtomicBool::new(true),
                config,
            }),
        })
    }

    /// Start routing inbound packets to `router`. Can be called once.
    pub fn attach(&self, router: InboundRouter) -> Result<()> {
        let reader = lock(&self.shared.reader).take().ok_or_else(|| {
            LinkError::Transport(TransportError::Control(
                "socket transport already attached".to_string(),
            ))
        })?;
        let shared = Arc::downgrade(&self.shared);
        thread::Builder::new()
            .name("ipclink-socket-reader".to_string())
            .spawn(move || read_loop(shared, reader, router))
            .map_err(LinkError::Spawn)?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Close the connection. The reader reports peer loss to the router.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Block until the peer has opened `channel`.
    ///
    /// The peer opens a channel while binding it, and holds frames that
    /// arrive before its bind completes, so sends issued after this returns
    /// are not dropped as unbound.
    pub fn wait_for_peer(&self, channel: &ChannelId, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut opened = lock(&self.shared.peer_opened);
        loop {
            if opened.contains(channel) {
                return Ok(());
            }
            if !self.is_connected() {
                return Err(TransportError::Closed.into());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout(timeout).into());
            }
            opened = self
                .shared
                .peer_open_changed
                .wait_timeout(opened, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| PoisonError::into_inner(poisoned).0);
        }
    }
}

impl Shared {
    fn write(&self, packet: &Packet) -> OpenResult {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let result = lock(&self.writer).write_packet(packet);
        result.map_err(|err| {
            // A failed write may leave half a packet on the stream.
            if !matches!(err, FrameError::PayloadTooLarge { .. }) {
                self.disconnect();
            }
            TransportError::from_wire(err)
        })
    }

    fn send_control(&self, channel: &ChannelId, message: &ControlMessage) -> OpenResult {
        self.write(&Packet::Control {
            channel: channel.clone(),
            body: message.to_bytes()?,
        })
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            debug!("closing socket connection");
            let _ = self.stream.shutdown(Shutdown::Both);
            let _opened = lock(&self.peer_opened);
            self.peer_open_changed.notify_all();
        }
    }

    fn set_peer_opened(&self, channel: &ChannelId, opened: bool) {
        let mut set = lock(&self.peer_opened);
        if opened {
            set.insert(channel.clone());
        } else {
            set.remove(channel);
        }
        self.peer_open_changed.notify_all();
    }

    fn complete_open(&self, channel: &ChannelId, result: OpenResult) {
        match lock(&self.pending_opens).remove(channel) {
            Some(waiter) => {
                let _ = waiter.send(result);
            }
            None => debug!(%channel, "open answer with no pending request"),
        }
    }

    fn handle_control(&self, router: &InboundRouter, channel: ChannelId, body: &[u8]) {
        let message = match ControlMessage::from_bytes(body) {
            Ok(message) => message,
            Err(err) => {
                warn!(%channel, error = %err, "ignoring malformed control packet");
                return;
            }
        };

        match message.msg_type.as_str() {
            CONTROL_OPEN => {
                let accept = router.is_open();
                let reply = if accept {
                    ControlMessage::open_ack()
                } else {
                    ControlMessage::open_reject("link is shut down")
                };
                debug!(%channel, reply = %reply.msg_type, "peer opened channel");
                match self.send_control(&channel, &reply) {
                    Ok(()) if accept => self.set_peer_opened(&channel, true),
                    Ok(()) => {}
                    Err(err) => warn!(%channel, error = %err, "failed to answer open request"),
                }
            }
            CONTROL_OPEN_ACK => self.complete_open(&channel, Ok(())),
            CONTROL_OPEN_REJECT => {
                let reason = message
                    .reason
                    .unwrap_or_else(|| "no reason given".to_string());
                self.complete_open(&channel, Err(TransportError::Rejected(reason)));
            }
            CONTROL_CLOSE => {
                debug!(%channel, "peer closed channel");
                self.set_peer_opened(&channel, false);
                router.on_peer_disconnected(&channel);
            }
            other => warn!(%channel, msg_type = other, "ignoring unknown control message"),
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn read_loop(shared: Weak<Shared>, mut reader: PacketReader<UnixStream>, router: InboundRouter) {
    loop {
        let packet = match reader.read_packet() {
            Ok(packet) => packet,
            Err(FrameError::ConnectionClosed) => {
                info!("peer closed the connection");
                break;
            }
            Err(err) => {
                warn!(error = %err, "socket read failed; dropping connection");
                break;
            }
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match packet {
            Packet::Data(frame) => router.on_frame_received(frame),
            Packet::Control { channel, body } => shared.handle_control(&router, channel, &body),
        }
    }

    if let Some(shared) = shared.upgrade() {
        shared.disconnect();
        lock(&shared.pending_opens).clear();
    }
    router.on_peer_lost();
}

impl FrameTransport for SocketTransport {
    fn open_channel(&self, channel: &ChannelId) -> OpenResult {
        let shared = &self.shared;
        let (tx, rx) = std_mpsc::channel();
        lock(&shared.pending_opens).insert(channel.clone(), tx);

        // The reader clears pending opens when the connection dies; re-check
        // so a request registered after that cannot wait out the timeout.
        let sent = if self.is_connected() {
            shared.send_control(channel, &ControlMessage::open())
        } else {
            Err(TransportError::Closed)
        };
        if let Err(err) = sent {
            lock(&shared.pending_opens).remove(channel);
            return Err(err);
        }

        let timeout = shared.config.open_timeout;
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                lock(&shared.pending_opens).remove(channel);
                Err(TransportError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn transmit_frame(&self, frame: &Frame) -> OpenResult {
        self.shared.write(&Packet::Data(frame.clone()))
    }

    fn close_channel(&self, channel: &ChannelId) {
        if let Err(err) = self.shared.send_control(channel, &ControlMessage::close()) {
            debug!(%channel, error = %err, "could not tell peer about closed channel");
        }
    }
}

impl std::fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTransport")
            .field("connected", &self.is_connected())
            .field("max_packet_payload", &self.shared.config.max_packet_payload)
            .finish()
    }
}
