use std::fmt;
use std::io;

use ipclink_channel::{LinkError, TransportError};
use ipclink_frame::FrameError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    let code = match err {
        FrameError::Io(source) => return io_error(context, source),
        FrameError::InvalidChannelName(_) | FrameError::InvalidFrameSize => USAGE,
        FrameError::PayloadTooLarge { .. } | FrameError::MessageTooLarge { .. } => DATA_INVALID,
        FrameError::InvalidMagic
        | FrameError::UnknownPacketKind(_)
        | FrameError::ChannelMismatch { .. }
        | FrameError::SequenceConflict { .. }
        | FrameError::MalformedFrame(_) => DATA_INVALID,
        FrameError::ConnectionClosed => FAILURE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Frame(err) => frame_error(context, err),
        TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        TransportError::Closed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Transport(err) => transport_error(context, err),
        LinkError::Frame(err) => frame_error(context, err),
        LinkError::Spawn(err) => io_error(context, err),
        LinkError::AlreadyBound(_) | LinkError::InvalidConfig(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        LinkError::BindTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        LinkError::TransportFailure { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn bind_timeout_maps_to_timeout() {
        let err = link_error(
            "bind failed",
            LinkError::BindTimeout {
                channel: "A".to_string(),
                timeout: Duration::from_secs(1),
            },
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("bind failed: "));
    }

    #[test]
    fn nested_errors_keep_their_codes() {
        let too_large = LinkError::Frame(FrameError::PayloadTooLarge { size: 9, max: 4 });
        assert_eq!(link_error("send", too_large).code, DATA_INVALID);

        let refused = LinkError::Transport(TransportError::Connect {
            path: "/tmp/none.sock".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        });
        assert_eq!(link_error("connect", refused).code, FAILURE);

        let exhausted = LinkError::TransportFailure {
            channel: "A".to_string(),
            attempts: 3,
            source: TransportError::Closed,
        };
        assert_eq!(link_error("send", exhausted).code, TRANSPORT_ERROR);
        assert_eq!(
            link_error("bind", LinkError::AlreadyBound("A".to_string())).code,
            USAGE
        );
    }
}
