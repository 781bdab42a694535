use std::path::PathBuf;

use clap::{Args, Subcommand};
use ipclink_channel::{SocketConfig, DEFAULT_MAX_FRAME_SIZE};
use ipclink_frame::DEFAULT_MAX_PAYLOAD;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a message on a channel.
    Send(SendArgs),
    /// Accept one peer and print messages received on the given channels.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Channel to send on.
    #[arg(long, short = 'c')]
    pub channel: String,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Send the payload this many times.
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,
    /// Largest payload carried by one frame.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,
    /// How long to wait for the peer to open the channel (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Channels to bind (comma-separated).
    #[arg(long, short = 'c', value_delimiter = ',', required = true)]
    pub channel: Vec<String>,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Largest payload carried by one frame.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Socket settings that can carry frames of `max_frame_size`.
fn socket_config(max_frame_size: usize) -> SocketConfig {
    SocketConfig {
        max_packet_payload: max_frame_size.max(DEFAULT_MAX_PAYLOAD),
        ..SocketConfig::default()
    }
}
