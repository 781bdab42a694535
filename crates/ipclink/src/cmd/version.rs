use ipclink_channel::{LinkConfig, DEFAULT_MAX_FRAME_SIZE};
use ipclink_frame::{DEFAULT_MAX_PAYLOAD, HEADER_SIZE};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("ipclink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let defaults = LinkConfig::default();
    println!("name: ipclink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("IPCLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("wire_header_bytes: {HEADER_SIZE}");
    println!("max_packet_payload: {DEFAULT_MAX_PAYLOAD}");
    println!("default_max_frame_size: {DEFAULT_MAX_FRAME_SIZE}");
    println!("queue_capacity: {}", defaults.queue_capacity);
    println!("max_send_attempts: {}", defaults.max_send_attempts);

    Ok(SUCCESS)
}
