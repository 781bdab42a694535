use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ipclink_channel::StatsSnapshot;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    channel: &'a str,
    size: usize,
    payload: String,
    timestamp: String,
}

/// Print one message received by `listen`.
pub fn print_message(channel: &str, payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                channel,
                size: payload.len(),
                payload: payload_preview(payload),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["CHANNEL", "SIZE", "PAYLOAD"]);
            table.add_row(vec![
                channel.to_string(),
                payload.len().to_string(),
                payload_preview(payload),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} size={} payload={}",
                channel,
                payload.len(),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

/// Result of a `send` run.
#[derive(Debug, Serialize)]
pub struct SendSummary {
    pub channel: String,
    pub max_frame_size: usize,
    pub messages: usize,
    pub payload_size: usize,
    pub last_sequence: Option<u64>,
    pub stats: StatsSnapshot,
}

pub fn print_summary(summary: &SendSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Table => {
            let mut table = new_table(vec![
                "CHANNEL", "MESSAGES", "BYTES", "FRAMES", "RETRIES", "FRAME SIZE",
            ]);
            table.add_row(vec![
                summary.channel.clone(),
                summary.messages.to_string(),
                summary.payload_size.to_string(),
                summary.stats.frames_sent.to_string(),
                summary.stats.retries.to_string(),
                summary.max_frame_size.to_string(),
            ]);
            println!("{table}");
        }
        // Raw output carries payloads only; a summary has none.
        OutputFormat::Raw => {}
        OutputFormat::Pretty => {
            println!(
                "channel={} messages={} bytes={} frames={} retries={} last_sequence={}",
                summary.channel,
                summary.messages,
                summary.payload_size,
                summary.stats.frames_sent,
                summary.stats.retries,
                summary
                    .last_sequence
                    .map_or_else(|| "-".to_string(), |s| s.to_string()),
            );
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
