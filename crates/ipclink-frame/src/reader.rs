use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_packet, Packet, PacketConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete packets from any `Read` stream.
///
/// Handles partial reads internally; callers always get whole packets.
pub struct PacketReader<T> {
    inner: T,
    buf: BytesMut,
    config: PacketConfig,
}

impl<T: Read> PacketReader<T> {
    /// Create a new packet reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, PacketConfig::default())
    }

    /// Create a new packet reader with explicit configuration.
    pub fn with_config(inner: T, config: PacketConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete packet (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_packet(&mut self) -> Result<Packet> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(packet) = decode_packet(&mut self.buf, self.config.max_payload_size)? {
                return Ok(packet);
            }

            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current packet reader configuration.
    pub fn config(&self) -> &PacketConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;
    use crate::channel::ChannelId;
    use crate::codec::{encode_packet, MAGIC};
    use crate::frame::Frame;

    fn packet(name: &str, sequence: u64, payload: &[u8]) -> Packet {
        Packet::Data(Frame::single(
            ChannelId::new(name).unwrap(),
            sequence,
            Bytes::copy_from_slice(payload),
        ))
    }

    fn wire(packets: &[Packet]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for p in packets {
            encode_packet(p, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_packet() {
        let sent = packet("A", 0, b"hello");
        let mut reader = PacketReader::new(Cursor::new(wire(&[sent.clone()])));

        assert_eq!(reader.read_packet().unwrap(), sent);
    }

    #[test]
    fn read_multiple_packets() {
        let sent = vec![packet("A", 0, b"one"), packet("B", 0, b"two"), packet("A", 1, b"three")];
        let mut reader = PacketReader::new(Cursor::new(wire(&sent)));

        for expected in &sent {
            assert_eq!(&reader.read_packet().unwrap(), expected);
        }
        assert!(matches!(
            reader.read_packet(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn read_packet_with_large_payload() {
        let payload = vec![0xAB; 64 * 1024];
        let sent = packet("bulk", 9, &payload);
        let mut reader = PacketReader::new(Cursor::new(wire(&[sent.clone()])));

        assert_eq!(reader.read_packet().unwrap(), sent);
    }

    #[test]
    fn partial_read_handling() {
        let sent = packet("slow", 4, b"slow");
        let byte_reader = ByteByByteReader {
            bytes: wire(&[sent.clone()]),
            pos: 0,
        };
        let mut reader = PacketReader::new(byte_reader);

        assert_eq!(reader.read_packet().unwrap(), sent);
    }

    #[test]
    fn connection_closed_mid_packet() {
        let mut partial = BytesMut::from(wire(&[packet("A", 0, b"only-part")]).as_slice());
        partial.truncate(partial.len() - 3);

        let mut reader = PacketReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn invalid_magic_in_stream() {
        let mut bytes = wire(&[packet("A", 0, b"x")]);
        bytes[0] = 0;
        let mut reader = PacketReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.read_packet(),
            Err(FrameError::InvalidMagic)
        ));
    }

    #[test]
    fn oversized_packet_in_stream() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(&MAGIC);
        bytes.put_u8(0);
        bytes.put_u8(1);
        bytes.put_u16_le(1);
        bytes.put_u64_le(0);
        bytes.put_u32_le(0);
        bytes.put_u32_le(1);
        bytes.put_u32_le(1024);

        let cfg = PacketConfig {
            max_payload_size: 16,
            ..PacketConfig::default()
        };
        let mut reader = PacketReader::with_config(Cursor::new(bytes.to_vec()), cfg);
        assert!(matches!(
            reader.read_packet(),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn interrupted_read_retries() {
        let sent = packet("A", 8, b"ok");
        let reader = InterruptedThenData {
            interrupted: false,
            bytes: wire(&[sent.clone()]),
            pos: 0,
        };
        let mut framed = PacketReader::new(reader);
        assert_eq!(framed.read_packet().unwrap(), sent);
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::PacketWriter::new(left);
        let mut reader = PacketReader::new(right);

        let sent = packet("ping", 0, b"ping");
        writer.write_packet(&sent).unwrap();
        assert_eq!(reader.read_packet().unwrap(), sent);
    }

    #[test]
    #[cfg(unix)]
    fn concurrent_reader_writer_threads() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::PacketWriter::new(left);
        let mut reader = PacketReader::new(right);

        let reader_thread = std::thread::spawn(move || {
            for expected in 0..64u64 {
                let Packet::Data(frame) = reader.read_packet().unwrap() else {
                    panic!("expected data packet");
                };
                assert_eq!(frame.sequence, expected);
                assert_eq!(frame.payload.as_ref(), format!("msg-{expected}").as_bytes());
            }
        });

        for i in 0..64u64 {
            writer
                .write_packet(&packet("A", i, format!("msg-{i}").as_bytes()))
                .unwrap();
        }

        reader_thread.join().unwrap();
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let n = (self.bytes.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
