//! Message chunking, ordered reassembly and wire framing for ipclink.
//!
//! A logical message larger than a transport's frame limit is split into
//! numbered frames by [`split_message`] and rebuilt on the other side by a
//! per-channel [`Reassembler`]. Stream transports put frames on the wire with
//! a fixed 26-byte header (see [`encode_packet`]):
//! - A 2-byte magic number ("IL") for stream synchronization
//! - Packet kind and flags (data/control, final frame)
//! - Channel name length, sequence number, frame index and frame count
//! - Payload length, followed by the channel name and payload bytes

pub mod channel;
pub mod chunk;
pub mod codec;
pub mod error;
pub mod frame;
pub mod reader;
pub mod reassembly;
pub mod writer;

pub use channel::{ChannelId, MAX_CHANNEL_NAME_LEN};
pub use chunk::{frame_count, split_message};
pub use codec::{
    decode_packet, encode_packet, Packet, PacketConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use frame::{Frame, Message};
pub use reader::PacketReader;
pub use reassembly::Reassembler;
pub use writer::PacketWriter;
