//! Chunked echo over a Unix socket: the server echoes every message back on
//! the channel it arrived on, and both sides use a tiny frame size so each
//! message crosses the wire as several frames.
//!
//! Run with:
//!   cargo run --example chunked-echo

use std::fs;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use ipclink::{
    ChannelId, Link, LinkConfig, SocketConfig, SocketListener, SocketTransport, TeardownReason,
};

const FRAME_SIZE: usize = 8;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("ipclink-echo-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("echo.sock");
    let listener = SocketListener::bind(&sock_path)?;

    let server = thread::spawn(move || -> Result<(), ipclink::LinkError> {
        let transport = listener.accept()?;
        let link = Link::new(transport.clone(), LinkConfig::default())?;
        transport.attach(link.router())?;

        let (done_tx, done_rx) = mpsc::channel();
        let echo_link = link.clone();
        link.bind(
            "echo",
            FRAME_SIZE,
            move |payload: Bytes| {
                eprintln!(
                    "[server] {} bytes: {}",
                    payload.len(),
                    String::from_utf8_lossy(&payload)
                );
                if let Err(err) = echo_link.send("echo", payload) {
                    eprintln!("[server] echo failed: {err}");
                }
            },
            move |channel: &ChannelId, reason: TeardownReason| {
                eprintln!("[server] {channel} closed: {reason}");
                let _ = done_tx.send(());
            },
        )?;
        let _ = done_rx.recv();
        link.shutdown();
        Ok(())
    });

    let transport = SocketTransport::connect(&sock_path, SocketConfig::default())?;
    let link = Link::new(transport.clone(), LinkConfig::default())?;
    transport.attach(link.router())?;

    let (reply_tx, replies) = mpsc::channel();
    let channel = link.bind(
        "echo",
        FRAME_SIZE,
        move |payload: Bytes| {
            let _ = reply_tx.send(payload);
        },
        |_: &ChannelId, _: TeardownReason| {},
    )?;
    transport.wait_for_peer(channel.id(), Duration::from_secs(5))?;

    for text in ["hello", "a message longer than one frame", ""] {
        channel.send(text)?.wait()?;
        let reply = replies.recv_timeout(Duration::from_secs(5))?;
        eprintln!("[client] echoed {:?}", String::from_utf8_lossy(&reply));
    }
    eprintln!("[client] stats: {:?}", channel.stats());

    link.unbind("echo")?;
    server.join().expect("server thread should not panic")?;
    let _ = fs::remove_dir_all(&sock_dir);
    Ok(())
}
