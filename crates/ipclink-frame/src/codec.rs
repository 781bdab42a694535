use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::channel::{ChannelId, MAX_CHANNEL_NAME_LEN};
use crate::error::{FrameError, Result};
use crate::frame::Frame;

/// Packet header size in bytes (see [`encode_packet`]).
pub const HEADER_SIZE: usize = 26;

/// Magic bytes: "IL" (0x49 0x4C).
pub const MAGIC: [u8; 2] = [0x49, 0x4C];

/// Default maximum packet payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

const KIND_DATA: u8 = 0;
const KIND_CONTROL: u8 = 1;
const FLAG_FINAL: u8 = 0b0000_0001;

/// A unit on a byte stream: either a data frame or a control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A chunk of a channel message.
    Data(Frame),
    /// Transport-level signalling scoped to a channel (open/close handshakes).
    Control { channel: ChannelId, body: Bytes },
}

impl Packet {
    /// The channel this packet is addressed to.
    pub fn channel(&self) -> &ChannelId {
        match self {
            Packet::Data(frame) => &frame.channel,
            Packet::Control { channel, .. } => channel,
        }
    }

    /// The bytes carried after the header and channel name.
    pub fn body(&self) -> &Bytes {
        match self {
            Packet::Data(frame) => &frame.payload,
            Packet::Control { body, .. } => body,
        }
    }

    /// The total wire size of this packet (header + name + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.channel().as_str().len() + self.body().len()
    }
}

/// Encode a packet into the wire format.
///
/// Wire format (all integers little-endian):
/// ```text
/// ┌───────┬──────┬───────┬──────────┬──────────┬───────┬───────┬─────────────┬──────┬─────────┐
/// │ magic │ kind │ flags │ name_len │ sequence │ index │ total │ payload_len │ name │ payload │
/// │ "IL"  │ 1B   │ 1B    │ 2B       │ 8B       │ 4B    │ 4B    │ 4B          │      │         │
/// └───────┴──────┴───────┴──────────┴──────────┴───────┴───────┴─────────────┴──────┴─────────┘
/// ```
/// Control packets carry zero sequence, index and total.
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<()> {
    let (kind, flags, sequence, index, total, payload) = match packet {
        Packet::Data(frame) => (
            KIND_DATA,
            if frame.is_final { FLAG_FINAL } else { 0 },
            frame.sequence,
            frame.index,
            frame.total,
            frame.payload.as_ref(),
        ),
        Packet::Control { body, .. } => (KIND_CONTROL, 0, 0, 0, 0, body.as_ref()),
    };

    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }

    let name = packet.channel().as_str().as_bytes();
    dst.reserve(HEADER_SIZE + name.len() + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u8(kind);
    dst.put_u8(flags);
    dst.put_u16_le(name.len() as u16);
    dst.put_u64_le(sequence);
    dst.put_u32_le(index);
    dst.put_u32_le(total);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(name);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a packet from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut, max_payload: usize) -> Result<Option<Packet>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let mut header = &src[2..HEADER_SIZE];
    let kind = header.get_u8();
    let flags = header.get_u8();
    let name_len = header.get_u16_le() as usize;
    let sequence = header.get_u64_le();
    let index = header.get_u32_le();
    let total = header.get_u32_le();
    let payload_len = header.get_u32_le() as usize;

    if kind != KIND_DATA && kind != KIND_CONTROL {
        return Err(FrameError::UnknownPacketKind(kind));
    }
    if name_len == 0 || name_len > MAX_CHANNEL_NAME_LEN {
        return Err(FrameError::InvalidChannelName(format!(
            "header declares {name_len}-byte name"
        )));
    }
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + name_len + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let name = src.split_to(name_len);
    let name = std::str::from_utf8(&name)
        .map_err(|_| FrameError::InvalidChannelName("name is not valid UTF-8".to_string()))?;
    let channel = ChannelId::new(name)?;
    let payload = src.split_to(payload_len).freeze();

    let packet = if kind == KIND_DATA {
        Packet::Data(Frame {
            channel,
            sequence,
            index,
            total,
            is_final: flags & FLAG_FINAL != 0,
            payload,
        })
    } else {
        Packet::Control {
            channel,
            body: payload,
        }
    };
    Ok(Some(packet))
}

/// Configuration for packet readers and writers.
#[derive(Debug, Clone)]
pub struct PacketConfig {
    /// Maximum packet payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            write_timeout: None,
        }
    }
}
