use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// CONTROL message type: request to open a channel.
pub const CONTROL_OPEN: &str = "open";
/// CONTROL message type: the peer accepted an open request.
pub const CONTROL_OPEN_ACK: &str = "open_ack";
/// CONTROL message type: the peer refused an open request.
pub const CONTROL_OPEN_REJECT: &str = "open_reject";
/// CONTROL message type: the sender is done with the channel.
pub const CONTROL_CLOSE: &str = "close";

/// JSON body of a control packet. The channel travels in the packet header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ControlMessage {
    fn new(msg_type: &str, reason: Option<String>) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            reason,
        }
    }

    pub fn open() -> Self {
        Self::new(CONTROL_OPEN, None)
    }

    pub fn open_ack() -> Self {
        Self::new(CONTROL_OPEN_ACK, None)
    }

    pub fn open_reject(reason: &str) -> Self {
        Self::new(CONTROL_OPEN_REJECT, Some(reason.to_string()))
    }

    pub fn close() -> Self {
        Self::new(CONTROL_CLOSE, None)
    }

    pub fn to_bytes(&self) -> Result<Bytes, TransportError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|err| TransportError::Control(err.to_string()))
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(body).map_err(|err| TransportError::Control(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_serializes_without_reason() {
        let bytes = ControlMessage::open().to_bytes().expect("serializes");
        assert_eq!(bytes.as_ref(), br#"{"type":"open"}"#);
    }

    #[test]
    fn reject_carries_reason() {
        let bytes = ControlMessage::open_reject("link is shut down")
            .to_bytes()
            .expect("serializes");
        let parsed = ControlMessage::from_bytes(&bytes).expect("parses");
        assert_eq!(parsed.msg_type, CONTROL_OPEN_REJECT);
        assert_eq!(parsed.reason.as_deref(), Some("link is shut down"));
    }

    #[test]
    fn garbage_is_a_control_error() {
        assert!(matches!(
            ControlMessage::from_bytes(b"not json"),
            Err(TransportError::Control(_))
        ));
    }
}
