use std::time::Duration;

use ipclink_frame::DEFAULT_MAX_PAYLOAD;

use crate::error::{LinkError, Result};

/// Largest payload carried by one frame when a channel is bound with
/// [`Link::bind_default`](crate::Link::bind_default).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 400_000;

/// Tuning for a [`Link`](crate::Link).
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Frame size used by `bind_default`.
    pub default_max_frame_size: usize,
    /// Outbound messages buffered per channel before `send` reports backpressure.
    pub queue_capacity: usize,
    /// Inbound frames buffered per channel before the channel is torn down.
    pub inbound_capacity: usize,
    /// Total transmit attempts per frame, including the first.
    pub max_send_attempts: u32,
    /// Pause between transmit attempts.
    pub retry_backoff: Duration,
    /// Upper bound on how long the transport may take to open a channel.
    pub bind_timeout: Duration,
    /// Largest message an inbound channel will reassemble.
    pub max_message_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            default_max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            queue_capacity: 64,
            inbound_capacity: 1024,
            max_send_attempts: 3,
            retry_backoff: Duration::from_millis(10),
            bind_timeout: Duration::from_secs(5),
            max_message_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl LinkConfig {
    /// Reject values the pipelines cannot run with.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("default_max_frame_size", self.default_max_frame_size == 0),
            ("queue_capacity", self.queue_capacity == 0),
            ("inbound_capacity", self.inbound_capacity == 0),
            ("max_send_attempts", self.max_send_attempts == 0),
            ("bind_timeout", self.bind_timeout.is_zero()),
            ("max_message_size", self.max_message_size == 0),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(LinkError::InvalidConfig(format!(
                "{name} must be greater than zero"
            )));
        }
        // tokio's bounded channel panics above this.
        let limit = usize::MAX >> 3;
        if self.queue_capacity > limit || self.inbound_capacity > limit {
            return Err(LinkError::InvalidConfig(
                "queue capacity is too large".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tuning for [`SocketTransport`](crate::SocketTransport) connections.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Largest packet payload accepted or written. Must cover the largest
    /// frame size bound over this connection.
    pub max_packet_payload: usize,
    /// How long `open_channel` waits for the peer's answer.
    pub open_timeout: Duration,
    /// Write timeout on the socket; `None` blocks indefinitely.
    pub write_timeout: Option<Duration>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            max_packet_payload: DEFAULT_MAX_PAYLOAD,
            open_timeout: Duration::from_secs(5),
            write_timeout: None,
        }
    }
}

impl SocketConfig {
    /// Reject values the socket transport cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_packet_payload == 0 {
            return Err(LinkError::InvalidConfig(
                "max_packet_payload must be greater than zero".to_string(),
            ));
        }
        if self.open_timeout.is_zero() {
            return Err(LinkError::InvalidConfig(
                "open_timeout must be greater than zero".to_string(),
            ));
        }
        if self.write_timeout.is_some_and(|t| t.is_zero()) {
            return Err(LinkError::InvalidConfig(
                "write_timeout must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = LinkConfig::default();
        cfg.validate().expect("defaults should validate");
        assert_eq!(cfg.default_max_frame_size, 400_000);
        assert_eq!(cfg.max_send_attempts, 3);
        SocketConfig::default()
            .validate()
            .expect("socket defaults should validate");
    }

    #[test]
    fn zero_values_rejected() {
        let cases = [
            LinkConfig {
                queue_capacity: 0,
                ..LinkConfig::default()
            },
            LinkConfig {
                inbound_capacity: 0,
                ..LinkConfig::default()
            },
            LinkConfig {
                max_send_attempts: 0,
                ..LinkConfig::default()
            },
            LinkConfig {
                bind_timeout: Duration::ZERO,
                ..LinkConfig::default()
            },
            LinkConfig {
                default_max_frame_size: 0,
                ..LinkConfig::default()
            },
        ];
        for cfg in cases {
            assert!(matches!(cfg.validate(), Err(LinkError::InvalidConfig(_))));
        }
    }

    #[test]
    fn zero_backoff_allowed() {
        let cfg = LinkConfig {
            retry_backoff: Duration::ZERO,
            ..LinkConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn socket_zero_write_timeout_rejected() {
        let cfg = SocketConfig {
            write_timeout: Some(Duration::ZERO),
            ..SocketConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(LinkError::InvalidConfig(_))));
    }
}
