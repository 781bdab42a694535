use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_packet, Packet, PacketConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete packets to any `Write` stream.
pub struct PacketWriter<T> {
    inner: T,
    buf: BytesMut,
    config: PacketConfig,
}

impl<T: Write> PacketWriter<T> {
    /// Create a new packet writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, PacketConfig::default())
    }

    /// Create a new packet writer with explicit configuration.
    pub fn with_config(inner: T, config: PacketConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and write a complete packet (blocking), then flush.
    ///
    /// A write that hits the stream's write timeout surfaces as `FrameError::Io`
    /// and may leave a partial packet on the stream; the connection must be
    /// considered broken afterwards.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let body_len = packet.body().len();
        if body_len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: body_len,
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_packet(packet, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::{Bytes, BytesMut};

    use super::*;
    use crate::channel::ChannelId;
    use crate::codec::decode_packet;
    use crate::frame::Frame;

    fn packet(payload: &'static [u8]) -> Packet {
        Packet::Data(Frame::single(
            ChannelId::new("A").unwrap(),
            0,
            Bytes::from_static(payload),
        ))
    }

    #[test]
    fn write_single_packet() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_packet(&packet(b"hello")).unwrap();

        let mut wire = BytesMut::from(writer.into_inner().into_inner().as_slice());
        let decoded = decode_packet(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(decoded, packet(b"hello"));
    }

    #[test]
    fn payload_too_large_rejected() {
        let cfg = PacketConfig {
            max_payload_size: 4,
            ..PacketConfig::default()
        };
        let mut writer = PacketWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer.write_packet(&packet(b"oversized")).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
        assert!(writer.get_ref().get_ref().is_empty());
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = PacketWriter::new(sink);

        writer.write_packet(&packet(b"x")).unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let mut writer = PacketWriter::new(InterruptedOnce {
            wrote_once: false,
            flushed_once: false,
            data: Vec::new(),
        });
        writer.write_packet(&packet(b"retry")).unwrap();
        assert!(!writer.into_inner().data.is_empty());
    }

    #[test]
    fn would_block_is_reported() {
        let mut writer = PacketWriter::new(WouldBlockWriter);
        let err = writer.write_packet(&packet(b"x")).unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = PacketWriter::new(ZeroWriter);
        let err = writer.write_packet(&packet(b"x")).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptedOnce {
        wrote_once: bool,
        flushed_once: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flushed_once {
                self.flushed_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct WouldBlockWriter;

    impl Write for WouldBlockWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
