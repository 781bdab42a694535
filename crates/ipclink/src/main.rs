mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ipclink", version, about = "Named message channels over Unix sockets")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "IPCLINK_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "ipclink",
            "send",
            "/tmp/test.sock",
            "--channel",
            "events",
            "--data",
            "hello",
            "--repeat",
            "3",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.channel, "events");
        assert_eq!(args.repeat, 3);
        assert_eq!(args.max_frame_size, 400_000);
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "ipclink",
            "send",
            "/tmp/test.sock",
            "--channel",
            "A",
            "--file",
            "/tmp/payload.bin",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn listen_splits_channel_list() {
        let cli = Cli::try_parse_from([
            "ipclink",
            "listen",
            "/tmp/test.sock",
            "--channel",
            "A,B",
            "--count",
            "2",
            "--max-frame-size",
            "4",
        ])
        .expect("listen args should parse");

        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.channel, vec!["A", "B"]);
        assert_eq!(args.count, Some(2));
        assert_eq!(args.max_frame_size, 4);
    }

    #[test]
    fn listen_requires_a_channel() {
        let err = Cli::try_parse_from(["ipclink", "listen", "/tmp/test.sock"])
            .expect_err("missing channel should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
